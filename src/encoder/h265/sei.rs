//! HDR metadata SEI composition for key pictures.

use tracing::debug;

use super::classify::PictureClass;
use super::syntax::{ContentLightLevelInfo, MasteringDisplayColourVolume, SeiMessage};
use crate::encoder::picture::{ContentLightMetadata, FrameSideData, MasteringDisplayMetadata};
use crate::encoder::{Rational, SeiFlags};

/// Chromaticity coordinates are coded in units of 0.00002.
pub const CHROMA_DENOMINATOR: u32 = 50_000;

/// Luminance is coded in units of 0.0001 cd/m².
pub const LUMA_DENOMINATOR: u32 = 10_000;

/// Syntax position `i` carries input primary `PRIMARY_ORDER[i]` (G, B, R from R, G, B).
const PRIMARY_ORDER: [usize; 3] = [1, 2, 0];

/// SEI messages to attach to a picture.
///
/// Only IRAP pictures carry metadata; each message is gated by its flag and
/// by the presence of the corresponding side data.
pub fn compose_sei(
    flags: SeiFlags,
    class: &PictureClass,
    side_data: &FrameSideData,
) -> Vec<SeiMessage> {
    let mut messages = Vec::new();
    if !class.picture_type.is_irap() {
        return messages;
    }

    if flags.contains(SeiFlags::MASTERING_DISPLAY) {
        if let Some(mdcv) = side_data
            .mastering_display
            .as_ref()
            .and_then(mastering_display_colour_volume)
        {
            messages.push(SeiMessage::MasteringDisplayColourVolume(mdcv));
        }
    }
    if flags.contains(SeiFlags::CONTENT_LIGHT_LEVEL) {
        if let Some(cll) = &side_data.content_light_level {
            messages.push(SeiMessage::ContentLightLevelInfo(content_light_level_info(cll)));
        }
    }

    if !messages.is_empty() {
        debug!(
            "Picture with POC {} carries {} SEI message(s)",
            class.pic_order_cnt,
            messages.len()
        );
    }
    messages
}

/// Quantize mastering display metadata; `None` unless both primaries and
/// luminance are present.
pub fn mastering_display_colour_volume(
    metadata: &MasteringDisplayMetadata,
) -> Option<MasteringDisplayColourVolume> {
    if !(metadata.has_primaries && metadata.has_luminance) {
        return None;
    }

    let mut display_primaries_x = [0u16; 3];
    let mut display_primaries_y = [0u16; 3];
    for (i, &source) in PRIMARY_ORDER.iter().enumerate() {
        display_primaries_x[i] = quantize_chromaticity(metadata.display_primaries[source][0]);
        display_primaries_y[i] = quantize_chromaticity(metadata.display_primaries[source][1]);
    }

    let max_display_mastering_luminance = quantize_luminance(metadata.max_luminance);
    let min_display_mastering_luminance =
        quantize_luminance(metadata.min_luminance).min(max_display_mastering_luminance);

    Some(MasteringDisplayColourVolume {
        display_primaries_x,
        display_primaries_y,
        white_point_x: quantize_chromaticity(metadata.white_point[0]),
        white_point_y: quantize_chromaticity(metadata.white_point[1]),
        max_display_mastering_luminance,
        min_display_mastering_luminance,
    })
}

pub fn content_light_level_info(metadata: &ContentLightMetadata) -> ContentLightLevelInfo {
    let clamp = |v: u32| v.min(u32::from(u16::MAX)) as u16;
    ContentLightLevelInfo {
        max_content_light_level: clamp(metadata.max_cll),
        max_pic_average_light_level: clamp(metadata.max_fall),
    }
}

/// CIE 1931 coordinate in 0.00002 steps, rounded half to even, within 0..=50000.
pub fn quantize_chromaticity(value: Rational) -> u16 {
    let scaled = scale(value, CHROMA_DENOMINATOR);
    scaled.clamp(0.0, f64::from(CHROMA_DENOMINATOR)) as u16
}

/// Luminance in 0.0001 cd/m² steps, rounded half to even.
pub fn quantize_luminance(value: Rational) -> u32 {
    let scaled = scale(value, LUMA_DENOMINATOR);
    scaled.clamp(0.0, f64::from(u32::MAX)) as u32
}

fn scale(value: Rational, denominator: u32) -> f64 {
    let scaled = (value.to_f64() * f64::from(denominator)).round_ties_even();
    if scaled.is_nan() {
        0.0
    } else {
        scaled
    }
}
