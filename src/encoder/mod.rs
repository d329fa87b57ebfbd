//! Encoder types, configuration, and shared utilities.
//!
//! This module provides:
//! - Core configuration (`EncodeConfig`) and the codec-agnostic `HeaderGenerator` interface.
//! - Picture descriptions consumed from the reference scheduler (`picture` module).
//! - A reference GOP scheduler (`gop` module) that plans pictures and live windows.
//! - The bit writer shared by the bitstream serializers (`bitwriter` module).

pub mod bitwriter;
pub mod gop;
pub mod h265;
pub mod picture;

use bitflags::bitflags;

use crate::encoder::h265::hw::{PictureParams, SliceParams};
use crate::encoder::h265::params::{H265Level, H265Profile, H265Tier};
use crate::encoder::picture::EncodedPicture;
use crate::error::{HevcError, Result};

// Default encoder configuration constants.

/// Default target bitrate in bits per second (4 Mbps).
pub const DEFAULT_TARGET_BITRATE: u32 = 4_000_000;

/// Default frame rate (frames per second).
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Default GOP (Group of Pictures) size.
pub const DEFAULT_GOP_SIZE: u32 = 30;

/// Default QP (quantization parameter) for H.265 P pictures in constant-QP mode.
pub const DEFAULT_H265_QP: u32 = 25;

/// Default QP used for every picture type under bitrate-driven rate control.
pub const DEFAULT_RATE_CONTROLLED_QP: u32 = 30;

/// Default factor between P and B picture QP.
pub const DEFAULT_B_QUANT_FACTOR: f32 = 6.0 / 5.0;

/// Surfaces handed to the hardware are aligned to this many pixels.
pub const SURFACE_ALIGNMENT: u32 = 16;

/// Highest QP accepted by HEVC for 8-bit content.
pub const MAX_QP: u32 = 51;

/// Largest picture or surface dimension accepted (level 6.2 luma width limit).
pub const MAX_DIMENSION: u32 = 16888;

/// Video codec types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// H.265/HEVC codec.
    H265,
}

/// A rational number, used for frame rates, time bases and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Whether the denominator is non-zero.
    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// Convert to a float; `NaN` when the denominator is zero.
    pub fn to_f64(self) -> f64 {
        if !self.is_valid() {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// Reduce to lowest terms with a positive denominator.
    pub fn reduce(self) -> Self {
        if !self.is_valid() {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if g == 0 {
            return self;
        }
        let g = g as i32;
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Pixel format descriptor.
///
/// Only the properties that shape the parameter sets are carried: component
/// count, chroma subsampling (as log2 shifts) and bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of colour components (1 for monochrome).
    pub nb_components: u8,
    /// log2 of the horizontal chroma subsampling factor.
    pub log2_chroma_w: u8,
    /// log2 of the vertical chroma subsampling factor.
    pub log2_chroma_h: u8,
    /// Bits per component.
    pub bit_depth: u8,
}

impl PixelFormat {
    /// 8-bit 4:2:0.
    pub const NV12: Self = Self::new(3, 1, 1, 8);
    /// 10-bit 4:2:0.
    pub const P010: Self = Self::new(3, 1, 1, 10);
    /// 8-bit 4:2:2.
    pub const YUV422P: Self = Self::new(3, 1, 0, 8);
    /// 10-bit 4:2:2.
    pub const YUV422P10: Self = Self::new(3, 1, 0, 10);
    /// 8-bit 4:4:4.
    pub const YUV444P: Self = Self::new(3, 0, 0, 8);
    /// 10-bit 4:4:4.
    pub const YUV444P10: Self = Self::new(3, 0, 0, 10);
    /// 8-bit luma only.
    pub const GRAY8: Self = Self::new(1, 0, 0, 8);
    /// 10-bit luma only.
    pub const GRAY10: Self = Self::new(1, 0, 0, 10);

    pub const fn new(nb_components: u8, log2_chroma_w: u8, log2_chroma_h: u8, bit_depth: u8) -> Self {
        Self {
            nb_components,
            log2_chroma_w,
            log2_chroma_h,
            bit_depth,
        }
    }

    /// Whether the format carries chroma planes.
    pub fn has_chroma(&self) -> bool {
        self.nb_components > 1
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::NV12
    }
}

/// Rate control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateControlMode {
    /// Disabled rate control - constant QP.
    #[default]
    Disabled,
    /// Constant QP mode.
    Cqp,
    /// Constant bitrate mode.
    Cbr,
    /// Variable bitrate mode.
    Vbr,
}

impl RateControlMode {
    /// Whether every picture is coded with a fixed QP.
    pub fn is_constant_qp(&self) -> bool {
        matches!(self, Self::Disabled | Self::Cqp)
    }
}

/// Sample value range signalled in the VUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRange {
    /// Studio swing (16..235 for 8-bit luma).
    Limited,
    /// Full swing.
    Full,
}

/// Chroma sample location, numbered as in the VUI syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChromaLocation {
    Left = 0,
    Center = 1,
    TopLeft = 2,
    Top = 3,
    BottomLeft = 4,
    Bottom = 5,
}

bitflags! {
    /// SEI messages the generator may attach to key pictures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SeiFlags: u32 {
        /// Mastering display colour volume (payload type 137).
        const MASTERING_DISPLAY   = 1 << 3;
        /// Content light level information (payload type 144).
        const CONTENT_LIGHT_LEVEL = 1 << 4;
    }
}

impl Default for SeiFlags {
    fn default() -> Self {
        Self::MASTERING_DISPLAY | Self::CONTENT_LIGHT_LEVEL
    }
}

/// Video dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Round both dimensions up to a multiple of `alignment` (a power of two).
    pub fn aligned(&self, alignment: u32) -> Self {
        Self {
            width: (self.width + alignment - 1) & !(alignment - 1),
            height: (self.height + alignment - 1) & !(alignment - 1),
        }
    }
}

/// Encode configuration.
#[derive(Debug, Clone)]
#[must_use]
pub struct EncodeConfig {
    /// Video codec to use.
    pub codec: Codec,
    /// Requested output dimensions.
    pub dimensions: Dimensions,
    /// Dimensions of the surfaces handed to the hardware; aligned to 16 when unset.
    pub surface_dimensions: Option<Dimensions>,
    /// Pixel format of the input surfaces.
    pub pixel_format: PixelFormat,
    /// Profile; derived from the pixel format when unset.
    pub profile: Option<H265Profile>,
    /// Tier.
    pub tier: H265Tier,
    /// Level.
    pub level: H265Level,
    /// Rate control mode.
    pub rate_control_mode: RateControlMode,
    /// Target bitrate in bits per second.
    pub target_bitrate: u32,
    /// Quality level for CQP mode (QP of P pictures).
    pub quality_level: u32,
    /// Factor between P and intra picture QP; zero keeps the P QP.
    pub i_quant_factor: f32,
    /// Offset added after `i_quant_factor`.
    pub i_quant_offset: f32,
    /// Factor between P and B picture QP; zero keeps the P QP.
    pub b_quant_factor: f32,
    /// Offset added after `b_quant_factor`.
    pub b_quant_offset: f32,
    /// Frame rate numerator.
    pub frame_rate_numerator: u32,
    /// Frame rate denominator.
    pub frame_rate_denominator: u32,
    /// Time base used for timing info when no frame rate is known.
    pub time_base: Rational,
    /// GOP size (distance between intra pictures).
    pub gop_size: u32,
    /// Number of consecutive B-frames.
    pub b_frame_count: u32,
    /// Sample aspect ratio, if signalled.
    pub sample_aspect_ratio: Option<Rational>,
    /// Sample range, if signalled.
    pub color_range: Option<ColorRange>,
    /// Colour primaries code point, if signalled.
    pub color_primaries: Option<u8>,
    /// Transfer characteristics code point, if signalled.
    pub transfer_characteristics: Option<u8>,
    /// Matrix coefficients code point, if signalled.
    pub matrix_coefficients: Option<u8>,
    /// Chroma sample location, if signalled.
    pub chroma_location: Option<ChromaLocation>,
    /// Emit an access unit delimiter at the start of every access unit.
    pub aud: bool,
    /// SEI messages to attach to key pictures.
    pub sei: SeiFlags,
}

impl EncodeConfig {
    /// Create a new H.265/HEVC encode configuration with default settings.
    pub fn h265(width: u32, height: u32) -> Self {
        Self {
            codec: Codec::H265,
            dimensions: Dimensions { width, height },
            surface_dimensions: None,
            pixel_format: PixelFormat::NV12,
            profile: None,
            tier: H265Tier::Main,
            level: H265Level::L5_1,
            rate_control_mode: RateControlMode::Disabled,
            target_bitrate: DEFAULT_TARGET_BITRATE,
            quality_level: DEFAULT_H265_QP,
            i_quant_factor: 1.0,
            i_quant_offset: 0.0,
            b_quant_factor: DEFAULT_B_QUANT_FACTOR,
            b_quant_offset: 0.0,
            frame_rate_numerator: DEFAULT_FRAME_RATE,
            frame_rate_denominator: 1,
            time_base: Rational::new(1, DEFAULT_FRAME_RATE as i32),
            gop_size: DEFAULT_GOP_SIZE,
            b_frame_count: 0,
            sample_aspect_ratio: None,
            color_range: None,
            color_primaries: None,
            transfer_characteristics: None,
            matrix_coefficients: None,
            chroma_location: None,
            aud: false,
            sei: SeiFlags::default(),
        }
    }

    /// Set the surface dimensions explicitly.
    pub fn with_surface_dimensions(mut self, width: u32, height: u32) -> Self {
        self.surface_dimensions = Some(Dimensions { width, height });
        self
    }

    /// Set the pixel format.
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set the profile.
    pub fn with_profile(mut self, profile: H265Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Set the tier.
    pub fn with_tier(mut self, tier: H265Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the level.
    pub fn with_level(mut self, level: H265Level) -> Self {
        self.level = level;
        self
    }

    /// Set the rate control mode.
    pub fn with_rate_control(mut self, mode: RateControlMode) -> Self {
        self.rate_control_mode = mode;
        self
    }

    /// Set the quality level (QP for CQP mode).
    pub fn with_quality_level(mut self, level: u32) -> Self {
        self.quality_level = level;
        self
    }

    /// Set the intra QP factor and offset.
    pub fn with_i_quant(mut self, factor: f32, offset: f32) -> Self {
        self.i_quant_factor = factor;
        self.i_quant_offset = offset;
        self
    }

    /// Set the B QP factor and offset.
    pub fn with_b_quant(mut self, factor: f32, offset: f32) -> Self {
        self.b_quant_factor = factor;
        self.b_quant_offset = offset;
        self
    }

    /// Set the frame rate.
    pub fn with_frame_rate(mut self, numerator: u32, denominator: u32) -> Self {
        self.frame_rate_numerator = numerator;
        self.frame_rate_denominator = denominator;
        self
    }

    /// Set the time base.
    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    /// Set the GOP size.
    pub fn with_gop_size(mut self, size: u32) -> Self {
        self.gop_size = size;
        self
    }

    /// Set the number of B-frames.
    pub fn with_b_frames(mut self, count: u32) -> Self {
        self.b_frame_count = count;
        self
    }

    /// Set the target bitrate.
    pub fn with_target_bitrate(mut self, bitrate: u32) -> Self {
        self.target_bitrate = bitrate;
        self
    }

    /// Set the sample aspect ratio.
    pub fn with_sample_aspect_ratio(mut self, sar: Rational) -> Self {
        self.sample_aspect_ratio = Some(sar);
        self
    }

    /// Set the sample range.
    pub fn with_color_range(mut self, range: ColorRange) -> Self {
        self.color_range = Some(range);
        self
    }

    /// Set colour primaries, transfer characteristics and matrix coefficients.
    pub fn with_color_description(mut self, primaries: u8, transfer: u8, matrix: u8) -> Self {
        self.color_primaries = Some(primaries);
        self.transfer_characteristics = Some(transfer);
        self.matrix_coefficients = Some(matrix);
        self
    }

    /// Set the chroma sample location.
    pub fn with_chroma_location(mut self, location: ChromaLocation) -> Self {
        self.chroma_location = Some(location);
        self
    }

    /// Enable or disable access unit delimiters.
    pub fn with_aud(mut self, enabled: bool) -> Self {
        self.aud = enabled;
        self
    }

    /// Select the SEI messages attached to key pictures.
    pub fn with_sei(mut self, sei: SeiFlags) -> Self {
        self.sei = sei;
        self
    }

    /// Surface size used for the coded picture.
    pub fn surface(&self) -> Dimensions {
        self.surface_dimensions
            .unwrap_or_else(|| self.dimensions.aligned(SURFACE_ALIGNMENT))
    }

    /// Frame rate as a rational, if one is known.
    pub fn frame_rate(&self) -> Option<Rational> {
        if self.frame_rate_numerator == 0 || self.frame_rate_denominator == 0 {
            return None;
        }
        let num = i32::try_from(self.frame_rate_numerator).ok()?;
        let den = i32::try_from(self.frame_rate_denominator).ok()?;
        Some(Rational::new(num, den))
    }

    /// Check codec-independent limits.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.width == 0 || self.dimensions.height == 0 {
            return Err(HevcError::Configuration(format!(
                "dimensions must be non-zero, got {}x{}",
                self.dimensions.width, self.dimensions.height
            )));
        }
        if self.dimensions.width > MAX_DIMENSION || self.dimensions.height > MAX_DIMENSION {
            return Err(HevcError::Configuration(format!(
                "dimensions {}x{} exceed {}",
                self.dimensions.width, self.dimensions.height, MAX_DIMENSION
            )));
        }
        let surface = self.surface();
        if surface.width > MAX_DIMENSION || surface.height > MAX_DIMENSION {
            return Err(HevcError::Configuration(format!(
                "surface {}x{} exceeds {}",
                surface.width, surface.height, MAX_DIMENSION
            )));
        }
        if surface.width < self.dimensions.width || surface.height < self.dimensions.height {
            return Err(HevcError::Configuration(format!(
                "surface {}x{} is smaller than the picture {}x{}",
                surface.width, surface.height, self.dimensions.width, self.dimensions.height
            )));
        }
        if self.gop_size == 0 {
            return Err(HevcError::Configuration(
                "GOP size must be at least 1".to_string(),
            ));
        }
        if self.quality_level > MAX_QP {
            return Err(HevcError::Configuration(format!(
                "QP {} is outside 0..={}",
                self.quality_level, MAX_QP
            )));
        }
        if self.pixel_format.nb_components == 0 {
            return Err(HevcError::Configuration(
                "pixel format has no components".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hardware-facing records produced when a picture enters the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureSetup {
    pub picture: PictureParams,
    pub slice: SliceParams,
}

/// Codec-specific generator of packed headers.
///
/// One instance serves one encode pipeline. Pictures must be submitted in
/// encode order; each `begin_picture` call starts a new access unit and the
/// `write_*` calls emit its packed headers into caller-owned buffers, returning
/// the exact number of bits written.
pub trait HeaderGenerator: Send {
    /// Codec this generator produces headers for.
    fn codec(&self) -> Codec;

    /// Classify the picture and prepare its slice header and metadata.
    ///
    /// `live` is the scheduler's window of live pictures ordered by encode order.
    fn begin_picture(
        &mut self,
        picture: &EncodedPicture,
        live: &[EncodedPicture],
    ) -> Result<PictureSetup>;

    /// Emit the parameter sets of the sequence.
    fn write_sequence_header(&mut self, out: &mut [u8]) -> Result<usize>;

    /// Emit the slice header of the current picture.
    fn write_slice_header(&mut self, out: &mut [u8]) -> Result<usize>;

    /// Emit extra headers of the current picture; `None` when nothing applies.
    ///
    /// Must precede `write_slice_header` for the same picture.
    fn write_extra_header(&mut self, out: &mut [u8]) -> Result<Option<usize>>;
}

/// Create the header generator for the configured codec.
pub fn create_header_generator(config: &EncodeConfig) -> Result<Box<dyn HeaderGenerator>> {
    match config.codec {
        Codec::H265 => Ok(Box::new(h265::H265HeaderGenerator::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod rational_tests {
        use super::*;

        #[test]
        fn test_reduce() {
            assert_eq!(Rational::new(64, 48).reduce(), Rational::new(4, 3));
            assert_eq!(Rational::new(3, -6).reduce(), Rational::new(-1, 2));
            assert_eq!(Rational::new(1, 0).reduce(), Rational::new(1, 0));
        }

        #[test]
        fn test_to_f64() {
            assert!(Rational::new(1, 4).is_valid());
            assert!(!Rational::new(1, 0).is_valid());
            assert_eq!(Rational::new(1, 4).to_f64(), 0.25);
            assert!(Rational::new(1, 0).to_f64().is_nan());
        }
    }

    mod pixel_format_tests {
        use super::*;

        #[test]
        fn test_default_is_nv12() {
            assert_eq!(PixelFormat::default(), PixelFormat::NV12);
        }

        #[test]
        fn test_chroma_presence() {
            assert!(PixelFormat::P010.has_chroma());
            assert!(!PixelFormat::GRAY8.has_chroma());
        }
    }

    mod rate_control_tests {
        use super::*;

        #[test]
        fn test_default() {
            assert_eq!(RateControlMode::default(), RateControlMode::Disabled);
        }

        #[test]
        fn test_constant_qp_modes() {
            assert!(RateControlMode::Disabled.is_constant_qp());
            assert!(RateControlMode::Cqp.is_constant_qp());
            assert!(!RateControlMode::Cbr.is_constant_qp());
            assert!(!RateControlMode::Vbr.is_constant_qp());
        }
    }

    mod encode_config_tests {
        use super::*;

        #[test]
        fn test_h265_defaults() {
            let config = EncodeConfig::h265(1920, 1080);

            assert_eq!(config.codec, Codec::H265);
            assert_eq!(config.dimensions.width, 1920);
            assert_eq!(config.dimensions.height, 1080);
            assert_eq!(config.pixel_format, PixelFormat::NV12);
            assert_eq!(config.rate_control_mode, RateControlMode::Disabled);
            assert_eq!(config.quality_level, 25);
            assert_eq!(config.gop_size, 30);
            assert_eq!(config.b_frame_count, 0);
            assert_eq!(config.level, H265Level::L5_1);
            assert!(!config.aud);
            assert_eq!(
                config.sei,
                SeiFlags::MASTERING_DISPLAY | SeiFlags::CONTENT_LIGHT_LEVEL
            );
        }

        #[test]
        fn test_surface_defaults_to_16_alignment() {
            let config = EncodeConfig::h265(1920, 1080);
            assert_eq!(
                config.surface(),
                Dimensions {
                    width: 1920,
                    height: 1088
                }
            );

            let config = EncodeConfig::h265(1920, 1080).with_surface_dimensions(1920, 1080);
            assert_eq!(config.surface().height, 1080);
        }

        #[test]
        fn test_builder_chain() {
            let config = EncodeConfig::h265(1280, 720)
                .with_b_frames(3)
                .with_gop_size(60)
                .with_aud(true)
                .with_color_range(ColorRange::Full)
                .with_chroma_location(ChromaLocation::TopLeft)
                .with_sei(SeiFlags::CONTENT_LIGHT_LEVEL);

            assert_eq!(config.b_frame_count, 3);
            assert_eq!(config.gop_size, 60);
            assert!(config.aud);
            assert_eq!(config.color_range, Some(ColorRange::Full));
            assert_eq!(config.chroma_location, Some(ChromaLocation::TopLeft));
            assert_eq!(config.sei, SeiFlags::CONTENT_LIGHT_LEVEL);
        }

        #[test]
        fn test_frame_rate_absent_when_zero() {
            let config = EncodeConfig::h265(640, 480).with_frame_rate(0, 1);
            assert_eq!(config.frame_rate(), None);

            let config = EncodeConfig::h265(640, 480).with_frame_rate(30000, 1001);
            assert_eq!(config.frame_rate(), Some(Rational::new(30000, 1001)));
        }

        #[test]
        fn test_validate_rejects_zero_dimensions() {
            let err = EncodeConfig::h265(0, 1080).validate().unwrap_err();
            assert!(matches!(err, HevcError::Configuration(_)));
        }

        #[test]
        fn test_validate_rejects_small_surface() {
            let err = EncodeConfig::h265(1920, 1080)
                .with_surface_dimensions(1920, 1072)
                .validate()
                .unwrap_err();
            assert!(matches!(err, HevcError::Configuration(_)));
        }

        #[test]
        fn test_validate_rejects_huge_dimensions() {
            let err = EncodeConfig::h265(u32::MAX - 3, 1080).validate().unwrap_err();
            assert!(matches!(err, HevcError::Configuration(_)));

            let err = EncodeConfig::h265(1920, 1080)
                .with_surface_dimensions(u32::MAX, 1088)
                .validate()
                .unwrap_err();
            assert!(matches!(err, HevcError::Configuration(_)));
        }

        #[test]
        fn test_validate_rejects_out_of_range_qp() {
            let err = EncodeConfig::h265(1920, 1080)
                .with_quality_level(52)
                .validate()
                .unwrap_err();
            assert!(matches!(err, HevcError::Configuration(_)));
        }
    }

    mod codec_tests {
        use super::*;

        #[test]
        fn test_h265_generator_is_created() {
            let generator = create_header_generator(&EncodeConfig::h265(1920, 1080)).unwrap();
            assert_eq!(generator.codec(), Codec::H265);
        }
    }
}
