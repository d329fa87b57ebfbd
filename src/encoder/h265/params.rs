//! Parameter set derivation.
//!
//! VPS, SPS and PPS are derived once from the encode configuration and are
//! immutable afterwards. Everything downstream (slice headers, hardware
//! records) reads from the resulting [`ParameterState`].

use tracing::{info, warn};

use super::hw::SequenceParams;
use super::syntax::{
    AspectRatioInfo, BitstreamRestriction, ChromaLocInfo, ConformanceWindow, Pps,
    ProfileTierLevel, Sps, SubLayerOrdering, TimingInfo, VideoSignalType, Vps, Vui,
};
use super::CTB_SIZE;
use crate::encoder::picture::PictureType;
use crate::encoder::{
    ColorRange, Dimensions, EncodeConfig, PixelFormat, Rational, DEFAULT_RATE_CONTROLLED_QP,
    MAX_QP,
};
use crate::error::{HevcError, Result};

/// log2 of the maximum POC LSB value, minus 4.
pub const LOG2_MAX_PIC_ORDER_CNT_LSB_MINUS4: u32 = 8;

/// Smallest coding block (8x8) the hardware is configured for.
pub const MIN_CB_SIZE: u32 = 8;

/// Code point meaning "unspecified" for primaries, transfer and matrix.
const COLOUR_UNSPECIFIED: u8 = 2;

/// `video_format` value meaning "unspecified video format".
const VIDEO_FORMAT_UNSPECIFIED: u8 = 5;

/// `aspect_ratio_idc` signalling an explicit SAR.
pub const EXTENDED_SAR: u8 = 255;

/// Sample aspect ratios indexed by `aspect_ratio_idc` (Table E-1).
const SAR_TABLE: [(i32, i32); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// General profiles supported by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum H265Profile {
    /// 8-bit 4:2:0.
    Main = 1,
    /// Up to 10-bit 4:2:0.
    Main10 = 2,
    /// 8-bit 4:2:0, intra only.
    MainStillPicture = 3,
    /// Format range extensions (4:0:0, 4:2:2, 4:4:4, up to 12-bit here).
    Rext = 4,
}

impl H265Profile {
    pub fn idc(self) -> u8 {
        self as u8
    }

    /// Profile implied by a pixel format when none is configured.
    pub fn for_format(chroma_format_idc: u8, bit_depth: u8) -> Self {
        match (chroma_format_idc, bit_depth) {
            (1, 8) => Self::Main,
            (1, 10) => Self::Main10,
            _ => Self::Rext,
        }
    }
}

/// Tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum H265Tier {
    #[default]
    Main,
    High,
}

/// Levels of Table A.8; `idc` is 30 times the level number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum H265Level {
    L1 = 30,
    L2 = 60,
    L2_1 = 63,
    L3 = 90,
    L3_1 = 93,
    L4 = 120,
    L4_1 = 123,
    L5 = 150,
    L5_1 = 153,
    L5_2 = 156,
    L6 = 180,
    L6_1 = 183,
    L6_2 = 186,
}

impl H265Level {
    const ALL: [H265Level; 13] = [
        Self::L1,
        Self::L2,
        Self::L2_1,
        Self::L3,
        Self::L3_1,
        Self::L4,
        Self::L4_1,
        Self::L5,
        Self::L5_1,
        Self::L5_2,
        Self::L6,
        Self::L6_1,
        Self::L6_2,
    ];

    pub fn idc(self) -> u8 {
        self as u8
    }

    /// Look up a level by its `general_level_idc`.
    pub fn from_idc(idc: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.idc() == idc)
            .ok_or_else(|| HevcError::Configuration(format!("unknown level_idc {idc}")))
    }
}

/// Fixed QP per picture type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedQp {
    pub idr: u32,
    pub p: u32,
    pub b: u32,
}

impl FixedQp {
    /// Derive per-type QPs from the rate control configuration.
    pub fn derive(config: &EncodeConfig) -> Self {
        if !config.rate_control_mode.is_constant_qp() {
            // The hardware rate control overrides these; they only seed init_qp.
            return Self {
                idr: DEFAULT_RATE_CONTROLLED_QP,
                p: DEFAULT_RATE_CONTROLLED_QP,
                b: DEFAULT_RATE_CONTROLLED_QP,
            };
        }

        let p = config.quality_level;
        let scaled = |factor: f32, offset: f32, name: &str| -> u32 {
            if factor <= 0.0 {
                return p;
            }
            let qp = (p as f32 * factor + offset + 0.5) as i64;
            if !(0..=i64::from(MAX_QP)).contains(&qp) {
                warn!("Derived {} QP {} clamped to 0..={}", name, qp, MAX_QP);
            }
            qp.clamp(0, i64::from(MAX_QP)) as u32
        };

        Self {
            idr: scaled(config.i_quant_factor, config.i_quant_offset, "intra"),
            p,
            b: scaled(config.b_quant_factor, config.b_quant_offset, "B"),
        }
    }

    /// QP for the slices of a picture of the given type.
    pub fn for_picture(&self, picture_type: PictureType) -> u32 {
        match picture_type {
            PictureType::B => self.b,
            PictureType::P => self.p,
            PictureType::Idr | PictureType::I => self.idr,
        }
    }
}

/// Immutable per-sequence state shared by every picture of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState {
    pub vps: Vps,
    pub sps: Sps,
    pub pps: Pps,
    /// Requested output size.
    pub dimensions: Dimensions,
    /// Coded (surface) size.
    pub surface: Dimensions,
    /// Coding tree units per row.
    pub ctu_width: u32,
    /// Coding tree unit rows.
    pub ctu_height: u32,
    pub fixed_qp: FixedQp,
    /// Hardware-facing copy of the sequence level fields.
    pub sequence_params: SequenceParams,
}

impl ParameterState {
    /// Derive all parameter sets from the configuration.
    pub fn derive(config: &EncodeConfig) -> Result<Self> {
        config.validate()?;

        let format = config.pixel_format;
        let chroma_format_idc = chroma_format_idc(&format)?;
        let bit_depth = format.bit_depth;
        let profile = config
            .profile
            .unwrap_or_else(|| H265Profile::for_format(chroma_format_idc, bit_depth));
        validate_profile(profile, config, chroma_format_idc, bit_depth)?;

        let surface = config.surface();
        if surface.width % MIN_CB_SIZE != 0 || surface.height % MIN_CB_SIZE != 0 {
            return Err(HevcError::Configuration(format!(
                "surface {}x{} is not a multiple of the {}x{} minimum coding block",
                surface.width, surface.height, MIN_CB_SIZE, MIN_CB_SIZE
            )));
        }
        let aligned = surface.aligned(CTB_SIZE);
        let ctu_width = aligned.width / CTB_SIZE;
        let ctu_height = aligned.height / CTB_SIZE;

        info!(
            "Deriving H.265 parameter sets: {}x{} (surface: {}x{}, CTU grid: {}x{}), profile={:?}, level={:?}, tier={:?}",
            config.dimensions.width,
            config.dimensions.height,
            surface.width,
            surface.height,
            ctu_width,
            ctu_height,
            profile,
            config.level,
            config.tier
        );

        let fixed_qp = FixedQp::derive(config);
        let ptl = profile_tier_level(profile, config, chroma_format_idc, bit_depth);
        let ordering = sub_layer_ordering(config.b_frame_count);
        let timing_info = timing_info(config);

        let vps = Vps {
            vps_video_parameter_set_id: 0,
            vps_base_layer_internal_flag: true,
            vps_base_layer_available_flag: true,
            vps_max_layers_minus1: 0,
            vps_max_sub_layers_minus1: 0,
            vps_temporal_id_nesting_flag: true,
            profile_tier_level: ptl.clone(),
            vps_sub_layer_ordering_info_present_flag: false,
            ordering,
            vps_max_layer_id: 0,
            vps_num_layer_sets_minus1: 0,
            timing_info,
        };

        let conformance_window = conformance_window(chroma_format_idc, config.dimensions, surface);

        let vui = Vui {
            aspect_ratio: config
                .sample_aspect_ratio
                .map(aspect_ratio_info)
                .transpose()?
                .flatten(),
            video_signal_type_present_flag: signal_type_specified(config),
            video_signal_type: video_signal_type(config),
            chroma_loc_info: config.chroma_location.map(|location| ChromaLocInfo {
                chroma_sample_loc_type_top_field: location as u32,
                chroma_sample_loc_type_bottom_field: location as u32,
            }),
            timing_info,
            bitstream_restriction: Some(BitstreamRestriction {
                tiles_fixed_structure_flag: false,
                motion_vectors_over_pic_boundaries_flag: true,
                restricted_ref_pic_lists_flag: true,
                min_spatial_segmentation_idc: 0,
                max_bytes_per_pic_denom: 0,
                max_bits_per_min_cu_denom: 0,
                log2_max_mv_length_horizontal: 15,
                log2_max_mv_length_vertical: 15,
            }),
        };

        let sps = Sps {
            sps_video_parameter_set_id: vps.vps_video_parameter_set_id,
            sps_max_sub_layers_minus1: vps.vps_max_sub_layers_minus1,
            sps_temporal_id_nesting_flag: vps.vps_temporal_id_nesting_flag,
            profile_tier_level: ptl,
            sps_seq_parameter_set_id: 0,
            chroma_format_idc,
            separate_colour_plane_flag: false,
            pic_width_in_luma_samples: surface.width,
            pic_height_in_luma_samples: surface.height,
            conformance_window,
            bit_depth_luma_minus8: u32::from(bit_depth - 8),
            bit_depth_chroma_minus8: u32::from(bit_depth - 8),
            log2_max_pic_order_cnt_lsb_minus4: LOG2_MAX_PIC_ORDER_CNT_LSB_MINUS4,
            sps_sub_layer_ordering_info_present_flag: vps.vps_sub_layer_ordering_info_present_flag,
            ordering,
            // Coding blocks from 8x8 to 32x32.
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 2,
            // Transform blocks from 4x4 to 32x32.
            log2_min_luma_transform_block_size_minus2: 0,
            log2_diff_max_min_luma_transform_block_size: 3,
            max_transform_hierarchy_depth_inter: 3,
            max_transform_hierarchy_depth_intra: 3,
            scaling_list_enabled_flag: false,
            amp_enabled_flag: true,
            sample_adaptive_offset_enabled_flag: false,
            pcm_enabled_flag: false,
            // Reference picture sets are coded in every slice header.
            num_short_term_ref_pic_sets: 0,
            long_term_ref_pics_present_flag: false,
            sps_temporal_mvp_enabled_flag: false,
            strong_intra_smoothing_enabled_flag: false,
            vui: Some(vui),
        };

        let pps = Pps {
            pps_pic_parameter_set_id: 0,
            pps_seq_parameter_set_id: sps.sps_seq_parameter_set_id,
            dependent_slice_segments_enabled_flag: false,
            output_flag_present_flag: false,
            num_extra_slice_header_bits: 0,
            sign_data_hiding_enabled_flag: false,
            cabac_init_present_flag: false,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            init_qp_minus26: fixed_qp.idr as i32 - 26,
            constrained_intra_pred_flag: false,
            transform_skip_enabled_flag: false,
            cu_qp_delta_enabled_flag: !config.rate_control_mode.is_constant_qp(),
            diff_cu_qp_delta_depth: 0,
            pps_cb_qp_offset: 0,
            pps_cr_qp_offset: 0,
            pps_slice_chroma_qp_offsets_present_flag: false,
            weighted_pred_flag: false,
            weighted_bipred_flag: false,
            transquant_bypass_enabled_flag: false,
            tiles_enabled_flag: false,
            entropy_coding_sync_enabled_flag: false,
            pps_loop_filter_across_slices_enabled_flag: true,
            deblocking_filter_control_present_flag: false,
            pps_scaling_list_data_present_flag: false,
            lists_modification_present_flag: false,
            log2_parallel_merge_level_minus2: 0,
            slice_segment_header_extension_present_flag: false,
        };

        let sequence_params = SequenceParams::derive(config, &sps);

        Ok(Self {
            vps,
            sps,
            pps,
            dimensions: config.dimensions,
            surface,
            ctu_width,
            ctu_height,
            fixed_qp,
            sequence_params,
        })
    }

    /// Maximum number of entries a reference picture set may carry.
    pub fn max_rps_entries(&self) -> usize {
        self.sps.ordering.max_dec_pic_buffering_minus1 as usize
    }

    /// Mask applied to picture order counts to obtain `slice_pic_order_cnt_lsb`.
    pub fn pic_order_cnt_lsb_mask(&self) -> u64 {
        (1u64 << self.sps.log2_max_pic_order_cnt_lsb()) - 1
    }

    /// Slice QP implied by the PPS when `slice_qp_delta` is zero.
    pub fn init_qp(&self) -> i32 {
        26 + self.pps.init_qp_minus26
    }
}

/// `chroma_format_idc` of a pixel format.
pub fn chroma_format_idc(format: &PixelFormat) -> Result<u8> {
    if !format.has_chroma() {
        return Ok(0);
    }
    match (format.log2_chroma_w, format.log2_chroma_h) {
        (1, 1) => Ok(1),
        (1, 0) => Ok(2),
        (0, 0) => Ok(3),
        (w, h) => Err(HevcError::Configuration(format!(
            "chroma subsampling with log2 factors {w}x{h} is not supported"
        ))),
    }
}

/// SubWidthC and SubHeightC (Table 6-1).
fn chroma_subsampling(chroma_format_idc: u8) -> (u32, u32) {
    match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    }
}

fn validate_profile(
    profile: H265Profile,
    config: &EncodeConfig,
    chroma_format_idc: u8,
    bit_depth: u8,
) -> Result<()> {
    let supported = match profile {
        H265Profile::Main => chroma_format_idc == 1 && bit_depth == 8,
        H265Profile::Main10 => chroma_format_idc == 1 && (8..=10).contains(&bit_depth),
        H265Profile::MainStillPicture => {
            chroma_format_idc == 1 && bit_depth == 8 && config.gop_size == 1
        }
        H265Profile::Rext => (8..=12).contains(&bit_depth),
    };
    if !supported {
        return Err(HevcError::Configuration(format!(
            "profile {:?} does not support chroma_format_idc {} at {} bits",
            profile, chroma_format_idc, bit_depth
        )));
    }
    if config.tier == H265Tier::High && config.level < H265Level::L4 {
        return Err(HevcError::Configuration(format!(
            "high tier is not defined for level {:?}",
            config.level
        )));
    }
    Ok(())
}

fn profile_tier_level(
    profile: H265Profile,
    config: &EncodeConfig,
    chroma_format_idc: u8,
    bit_depth: u8,
) -> ProfileTierLevel {
    let mut compatibility = [false; 32];
    if chroma_format_idc == 1 {
        compatibility[1] = bit_depth == 8;
        compatibility[2] = bit_depth <= 10;
    }
    compatibility[4] = true;

    ProfileTierLevel {
        general_profile_space: 0,
        general_tier_flag: config.tier == H265Tier::High,
        general_profile_idc: profile.idc(),
        general_profile_compatibility_flag: compatibility,
        general_progressive_source_flag: true,
        general_interlaced_source_flag: false,
        general_non_packed_constraint_flag: true,
        general_frame_only_constraint_flag: true,
        general_max_12bit_constraint_flag: bit_depth <= 12,
        general_max_10bit_constraint_flag: bit_depth <= 10,
        general_max_8bit_constraint_flag: bit_depth == 8,
        general_max_422chroma_constraint_flag: chroma_format_idc <= 2,
        general_max_420chroma_constraint_flag: chroma_format_idc <= 1,
        general_max_monochrome_constraint_flag: chroma_format_idc == 0,
        general_intra_constraint_flag: config.gop_size == 1,
        general_one_picture_only_constraint_flag: false,
        general_lower_bit_rate_constraint_flag: true,
        general_level_idc: config.level.idc(),
    }
}

fn sub_layer_ordering(b_frame_count: u32) -> SubLayerOrdering {
    let reorder = u32::from(b_frame_count > 0);
    SubLayerOrdering {
        max_dec_pic_buffering_minus1: 1 + reorder,
        max_num_reorder_pics: reorder,
        max_latency_increase_plus1: 0,
    }
}

fn timing_info(config: &EncodeConfig) -> Option<TimingInfo> {
    if let Some(rate) = config.frame_rate() {
        return Some(TimingInfo {
            num_units_in_tick: rate.den as u32,
            time_scale: rate.num as u32,
            num_ticks_poc_diff_one_minus1: Some(0),
        });
    }
    let tb = config.time_base;
    if tb.num > 0 && tb.den > 0 {
        return Some(TimingInfo {
            num_units_in_tick: tb.num as u32,
            time_scale: tb.den as u32,
            num_ticks_poc_diff_one_minus1: None,
        });
    }
    warn!("No frame rate or time base configured, timing info omitted");
    None
}

fn conformance_window(
    chroma_format_idc: u8,
    dimensions: Dimensions,
    surface: Dimensions,
) -> Option<ConformanceWindow> {
    if dimensions == surface {
        return None;
    }
    let (sub_width, sub_height) = chroma_subsampling(chroma_format_idc);
    let crop_width = surface.width - dimensions.width;
    let crop_height = surface.height - dimensions.height;
    if crop_width % sub_width != 0 || crop_height % sub_height != 0 {
        // Offsets are in chroma units; the remainder stays in the output.
        warn!(
            "Cropping {}x{} to {}x{} in {}x{} chroma units, output is {}x{}",
            surface.width,
            surface.height,
            dimensions.width,
            dimensions.height,
            sub_width,
            sub_height,
            surface.width - crop_width / sub_width * sub_width,
            surface.height - crop_height / sub_height * sub_height
        );
    }
    Some(ConformanceWindow {
        left_offset: 0,
        right_offset: crop_width / sub_width,
        top_offset: 0,
        bottom_offset: crop_height / sub_height,
    })
}

/// Map a sample aspect ratio to its VUI signalling; `None` when unspecified.
pub fn aspect_ratio_info(sar: Rational) -> Result<Option<AspectRatioInfo>> {
    if sar.num == 0 || sar.den == 0 {
        return Ok(None);
    }
    let sar = sar.reduce();
    if let Some(idc) = SAR_TABLE
        .iter()
        .skip(1)
        .position(|&(num, den)| num == sar.num && den == sar.den)
    {
        return Ok(Some(AspectRatioInfo {
            aspect_ratio_idc: (idc + 1) as u8,
            sar_width: 0,
            sar_height: 0,
        }));
    }
    match (u16::try_from(sar.num), u16::try_from(sar.den)) {
        (Ok(sar_width), Ok(sar_height)) => Ok(Some(AspectRatioInfo {
            aspect_ratio_idc: EXTENDED_SAR,
            sar_width,
            sar_height,
        })),
        _ => Err(HevcError::Configuration(format!(
            "sample aspect ratio {}:{} cannot be signalled",
            sar.num, sar.den
        ))),
    }
}

fn signal_type_specified(config: &EncodeConfig) -> bool {
    config.color_range.is_some() || colour_description_specified(config)
}

fn colour_description_specified(config: &EncodeConfig) -> bool {
    config.color_primaries.is_some()
        || config.transfer_characteristics.is_some()
        || config.matrix_coefficients.is_some()
}

fn video_signal_type(config: &EncodeConfig) -> VideoSignalType {
    let specified = signal_type_specified(config);
    VideoSignalType {
        video_format: VIDEO_FORMAT_UNSPECIFIED,
        video_full_range_flag: specified && config.color_range == Some(ColorRange::Full),
        colour_description_present_flag: specified && colour_description_specified(config),
        colour_primaries: config.color_primaries.unwrap_or(COLOUR_UNSPECIFIED),
        transfer_characteristics: config
            .transfer_characteristics
            .unwrap_or(COLOUR_UNSPECIFIED),
        matrix_coeffs: config.matrix_coefficients.unwrap_or(COLOUR_UNSPECIFIED),
    }
}
