//! Picture descriptions handed over by the reference scheduler.
//!
//! The scheduler decides picture types, encode order and references; the
//! header generator only reads these records.

use crate::encoder::Rational;

/// Picture role decided by the reference scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureType {
    /// Instantaneous decoder refresh.
    Idr,
    /// Intra refresh without resetting the decoder (clean random access).
    I,
    /// Predicted from one reference.
    P,
    /// Bi-predicted from two references.
    B,
}

impl PictureType {
    /// Whether this is an intra random access point (IDR or CRA).
    pub fn is_irap(&self) -> bool {
        matches!(self, Self::Idr | Self::I)
    }

    /// Whether this is an IDR picture.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::Idr)
    }

    /// Whether other pictures may reference this one.
    pub fn is_reference(&self) -> bool {
        !matches!(self, Self::B)
    }

    /// Number of references a picture of this type must carry.
    pub fn required_reference_count(&self) -> usize {
        match self {
            Self::Idr | Self::I => 0,
            Self::P => 1,
            Self::B => 2,
        }
    }
}

/// Opaque handle of a reconstructed surface owned by the hardware layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u32);

impl SurfaceId {
    /// Sentinel used by hardware records for unused picture slots.
    pub const INVALID: SurfaceId = SurfaceId(u32::MAX);

    /// Whether this handle refers to a real surface.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Snapshot of a referenced picture.
///
/// The encode order identifies the picture within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceInfo {
    pub encode_order: u64,
    pub display_order: u64,
    pub picture_type: PictureType,
    pub recon_surface: SurfaceId,
}

/// One picture in the encoder pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPicture {
    /// Position in presentation order.
    pub display_order: u64,
    /// Position in coding order.
    pub encode_order: u64,
    /// Role decided by the scheduler.
    pub picture_type: PictureType,
    /// References in list order: backward first, forward second.
    pub refs: Vec<ReferenceInfo>,
    /// Surface holding the reconstructed picture.
    pub recon_surface: SurfaceId,
    /// Metadata attached to the source frame.
    pub side_data: FrameSideData,
}

impl EncodedPicture {
    /// Create a picture with no references and no side data.
    pub fn new(
        display_order: u64,
        encode_order: u64,
        picture_type: PictureType,
        recon_surface: SurfaceId,
    ) -> Self {
        Self {
            display_order,
            encode_order,
            picture_type,
            refs: Vec::new(),
            recon_surface,
            side_data: FrameSideData::default(),
        }
    }

    /// Append a reference to this picture's list.
    #[must_use]
    pub fn with_reference(mut self, reference: &EncodedPicture) -> Self {
        self.refs.push(reference.as_reference());
        self
    }

    /// Attach side data to this picture.
    #[must_use]
    pub fn with_side_data(mut self, side_data: FrameSideData) -> Self {
        self.side_data = side_data;
        self
    }

    /// Snapshot used when another picture references this one.
    pub fn as_reference(&self) -> ReferenceInfo {
        ReferenceInfo {
            encode_order: self.encode_order,
            display_order: self.display_order,
            picture_type: self.picture_type,
            recon_surface: self.recon_surface,
        }
    }

    /// Whether this picture's references are exactly `[first, second]`.
    pub fn references_exactly(&self, first: u64, second: u64) -> bool {
        matches!(
            self.refs.as_slice(),
            [a, b] if a.encode_order == first && b.encode_order == second
        )
    }

    /// Whether the picture with the given encode order is one of this picture's references.
    pub fn references(&self, encode_order: u64) -> bool {
        self.refs.iter().any(|r| r.encode_order == encode_order)
    }
}

/// Mastering display colour volume as attached to a source frame.
///
/// Primaries are in R, G, B order; every chromaticity is a CIE 1931 xy value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasteringDisplayMetadata {
    pub display_primaries: [[Rational; 2]; 3],
    pub white_point: [Rational; 2],
    /// Minimum luminance in cd/m².
    pub min_luminance: Rational,
    /// Maximum luminance in cd/m².
    pub max_luminance: Rational,
    pub has_primaries: bool,
    pub has_luminance: bool,
}

/// Content light level as attached to a source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLightMetadata {
    /// MaxCLL in cd/m².
    pub max_cll: u32,
    /// MaxFALL in cd/m².
    pub max_fall: u32,
}

/// Side data of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameSideData {
    pub mastering_display: Option<MasteringDisplayMetadata>,
    pub content_light_level: Option<ContentLightMetadata>,
}
