//! Picture type classification.
//!
//! Maps the scheduler's picture role and references to the NAL unit type,
//! slice type and AUD `pic_type`, and tracks the last IDR so picture order
//! counts can be expressed relative to it.

use tracing::debug;

use super::syntax::{NalUnitType, SliceType};
use crate::encoder::picture::{EncodedPicture, PictureType};
use crate::error::{HevcError, Result};

/// Classification of one picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureClass {
    pub picture_type: PictureType,
    pub nal_unit_type: NalUnitType,
    pub slice_type: SliceType,
    /// `pic_type` of the access unit delimiter (0 = I, 1 = P/I, 2 = B/P/I).
    pub aud_pic_type: u8,
    /// Picture order count relative to the last IDR.
    pub pic_order_cnt: i32,
}

/// Per-pipeline stream state carried from picture to picture.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    last_idr_display_order: Option<u64>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display order of the most recent IDR picture.
    pub fn last_idr_display_order(&self) -> Option<u64> {
        self.last_idr_display_order
    }

    /// Classify `picture`, updating the IDR origin when it is an IDR.
    ///
    /// Pictures with the wrong number of references, IDR pictures that are
    /// reordered, and pictures that precede the current IDR are rejected with
    /// [`HevcError::Precondition`]; the state is left unchanged in that case.
    pub fn classify(&mut self, picture: &EncodedPicture) -> Result<PictureClass> {
        let expected = picture.picture_type.required_reference_count();
        if picture.refs.len() != expected {
            return Err(HevcError::Precondition(format!(
                "{:?} picture {} carries {} references, expected {}",
                picture.picture_type,
                picture.display_order,
                picture.refs.len(),
                expected
            )));
        }
        if let Some(reference) = picture
            .refs
            .iter()
            .find(|r| r.encode_order >= picture.encode_order)
        {
            return Err(HevcError::Precondition(format!(
                "picture {} references picture {} which is not yet encoded",
                picture.encode_order, reference.encode_order
            )));
        }

        let last_idr = if picture.picture_type.is_idr() {
            if picture.display_order != picture.encode_order {
                return Err(HevcError::Precondition(format!(
                    "IDR picture must not be reordered (display {}, encode {})",
                    picture.display_order, picture.encode_order
                )));
            }
            picture.display_order
        } else {
            match self.last_idr_display_order {
                Some(last) if picture.encode_order > last && picture.display_order > last => last,
                Some(last) => {
                    return Err(HevcError::Precondition(format!(
                        "picture {} (display {}) does not follow the IDR at {}",
                        picture.encode_order, picture.display_order, last
                    )))
                }
                None => {
                    return Err(HevcError::Precondition(
                        "stream must start with an IDR picture".to_string(),
                    ))
                }
            }
        };

        let (nal_unit_type, slice_type, aud_pic_type) = match picture.picture_type {
            PictureType::Idr => (NalUnitType::IdrWRadl, SliceType::I, 0),
            PictureType::I => (NalUnitType::CraNut, SliceType::I, 0),
            PictureType::P => (NalUnitType::TrailR, SliceType::P, 1),
            PictureType::B => {
                // A B picture whose forward reference is a random access point
                // leads that point and cannot be decoded when starting there.
                let nal_unit_type = if picture.refs[1].picture_type.is_irap() {
                    NalUnitType::RaslN
                } else {
                    NalUnitType::TrailN
                };
                (nal_unit_type, SliceType::B, 2)
            }
        };

        let pic_order_cnt = i32::try_from(picture.display_order - last_idr).map_err(|_| {
            HevcError::Precondition(format!(
                "picture order count of picture {} overflows",
                picture.display_order
            ))
        })?;

        if picture.picture_type.is_idr() {
            self.last_idr_display_order = Some(last_idr);
        }

        let class = PictureClass {
            picture_type: picture.picture_type,
            nal_unit_type,
            slice_type,
            aud_pic_type,
            pic_order_cnt,
        };
        debug!(
            "Classified picture {} (display {}): {:?}, slice {:?}, POC {}",
            picture.encode_order, picture.display_order, nal_unit_type, slice_type, pic_order_cnt
        );
        Ok(class)
    }
}
