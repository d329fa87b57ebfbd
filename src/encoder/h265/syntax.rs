//! H.265 high-level syntax records.
//!
//! Field names follow the syntax element names of ITU-T H.265 so the writer in
//! `writer.rs` reads like the syntax tables. Only the features used by this
//! encoder are modelled; gating flags of everything else are fixed to zero by
//! the writer.

/// NAL unit type codes (Table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NalUnitType {
    TrailN = 0,
    TrailR = 1,
    RaslN = 8,
    IdrWRadl = 19,
    CraNut = 21,
    Vps = 32,
    Sps = 33,
    Pps = 34,
    Aud = 35,
    PrefixSei = 39,
}

impl NalUnitType {
    /// Numeric code written into the NAL unit header.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// BLA, IDR and CRA pictures (16..=23).
    pub fn is_irap(self) -> bool {
        (16..=23).contains(&self.code())
    }

    pub fn is_idr(self) -> bool {
        matches!(self, Self::IdrWRadl)
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Vps | Self::Sps | Self::Pps)
    }
}

/// Slice types (Table 7-7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SliceType {
    B = 0,
    P = 1,
    I = 2,
}

impl SliceType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_inter(self) -> bool {
        !matches!(self, Self::I)
    }
}

/// Two-byte NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnitHeader {
    pub nal_unit_type: NalUnitType,
    pub nuh_layer_id: u8,
    pub nuh_temporal_id_plus1: u8,
}

impl NalUnitHeader {
    /// Header of a base-layer NAL unit in temporal layer 0.
    pub fn new(nal_unit_type: NalUnitType) -> Self {
        Self {
            nal_unit_type,
            nuh_layer_id: 0,
            nuh_temporal_id_plus1: 1,
        }
    }
}

/// General profile, tier and level (7.3.3), without sub-layers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flag: [bool; 32],
    pub general_progressive_source_flag: bool,
    pub general_interlaced_source_flag: bool,
    pub general_non_packed_constraint_flag: bool,
    pub general_frame_only_constraint_flag: bool,
    pub general_max_12bit_constraint_flag: bool,
    pub general_max_10bit_constraint_flag: bool,
    pub general_max_8bit_constraint_flag: bool,
    pub general_max_422chroma_constraint_flag: bool,
    pub general_max_420chroma_constraint_flag: bool,
    pub general_max_monochrome_constraint_flag: bool,
    pub general_intra_constraint_flag: bool,
    pub general_one_picture_only_constraint_flag: bool,
    pub general_lower_bit_rate_constraint_flag: bool,
    pub general_level_idc: u8,
}

impl ProfileTierLevel {
    /// Whether the profile or one of its compatible profiles is in `idcs`.
    pub fn is_compatible_with(&self, idcs: &[u8]) -> bool {
        idcs.iter().any(|&idc| {
            self.general_profile_idc == idc
                || self.general_profile_compatibility_flag[usize::from(idc)]
        })
    }
}

/// Decoded picture buffer sizing shared by VPS and SPS (single sub-layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubLayerOrdering {
    pub max_dec_pic_buffering_minus1: u32,
    pub max_num_reorder_pics: u32,
    pub max_latency_increase_plus1: u32,
}

/// Timing information carried by the VPS and the VUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    /// `num_ticks_poc_diff_one_minus1` when POC is proportional to timing.
    pub num_ticks_poc_diff_one_minus1: Option<u32>,
}

/// Video parameter set (7.3.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vps {
    pub vps_video_parameter_set_id: u8,
    pub vps_base_layer_internal_flag: bool,
    pub vps_base_layer_available_flag: bool,
    pub vps_max_layers_minus1: u8,
    pub vps_max_sub_layers_minus1: u8,
    pub vps_temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub vps_sub_layer_ordering_info_present_flag: bool,
    pub ordering: SubLayerOrdering,
    pub vps_max_layer_id: u8,
    pub vps_num_layer_sets_minus1: u32,
    pub timing_info: Option<TimingInfo>,
}

/// Conformance cropping window, in chroma sample units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConformanceWindow {
    pub left_offset: u32,
    pub right_offset: u32,
    pub top_offset: u32,
    pub bottom_offset: u32,
}

/// Sample aspect ratio signalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatioInfo {
    pub aspect_ratio_idc: u8,
    /// Explicit SAR, written only for `aspect_ratio_idc == 255`.
    pub sar_width: u16,
    pub sar_height: u16,
}

/// Video signal type and colour description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSignalType {
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description_present_flag: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coeffs: u8,
}

/// Chroma sample location for both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromaLocInfo {
    pub chroma_sample_loc_type_top_field: u32,
    pub chroma_sample_loc_type_bottom_field: u32,
}

/// Bitstream restriction constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamRestriction {
    pub tiles_fixed_structure_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub restricted_ref_pic_lists_flag: bool,
    pub min_spatial_segmentation_idc: u32,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_min_cu_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
}

/// VUI parameters (E.2.1). Absent sections are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vui {
    pub aspect_ratio: Option<AspectRatioInfo>,
    /// Written only when `video_signal_type_present_flag` is set.
    pub video_signal_type_present_flag: bool,
    pub video_signal_type: VideoSignalType,
    pub chroma_loc_info: Option<ChromaLocInfo>,
    pub timing_info: Option<TimingInfo>,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

/// Sequence parameter set (7.3.2.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub sps_video_parameter_set_id: u8,
    pub sps_max_sub_layers_minus1: u8,
    pub sps_temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub sps_seq_parameter_set_id: u32,
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub conformance_window: Option<ConformanceWindow>,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    pub log2_max_pic_order_cnt_lsb_minus4: u32,
    pub sps_sub_layer_ordering_info_present_flag: bool,
    pub ordering: SubLayerOrdering,
    pub log2_min_luma_coding_block_size_minus3: u32,
    pub log2_diff_max_min_luma_coding_block_size: u32,
    pub log2_min_luma_transform_block_size_minus2: u32,
    pub log2_diff_max_min_luma_transform_block_size: u32,
    pub max_transform_hierarchy_depth_inter: u32,
    pub max_transform_hierarchy_depth_intra: u32,
    pub scaling_list_enabled_flag: bool,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub num_short_term_ref_pic_sets: u32,
    pub long_term_ref_pics_present_flag: bool,
    pub sps_temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub vui: Option<Vui>,
}

impl Sps {
    /// Number of bits of `slice_pic_order_cnt_lsb`.
    pub fn log2_max_pic_order_cnt_lsb(&self) -> u32 {
        self.log2_max_pic_order_cnt_lsb_minus4 + 4
    }

    /// ChromaArrayType: zero for monochrome or separately coded planes.
    pub fn chroma_array_type(&self) -> u8 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }
}

/// Picture parameter set (7.3.2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pps_pic_parameter_set_id: u32,
    pub pps_seq_parameter_set_id: u32,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub init_qp_minus26: i32,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: u32,
    pub pps_cb_qp_offset: i32,
    pub pps_cr_qp_offset: i32,
    pub pps_slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub pps_loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_control_present_flag: bool,
    pub pps_scaling_list_data_present_flag: bool,
    pub lists_modification_present_flag: bool,
    pub log2_parallel_merge_level_minus2: u32,
    pub slice_segment_header_extension_present_flag: bool,
}

/// One entry of a short-term reference picture set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpsEntry {
    /// Distance to the previous entry of the same list, minus one.
    pub delta_poc_minus1: u32,
    pub used_by_curr_pic: bool,
}

/// Short-term reference picture set (7.3.7), coded explicitly in the slice header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferencePictureSet {
    /// Pictures preceding the current one, closest first.
    pub negative: Vec<RpsEntry>,
    /// Pictures following the current one, closest first.
    pub positive: Vec<RpsEntry>,
}

impl ReferencePictureSet {
    pub fn num_negative_pics(&self) -> u32 {
        self.negative.len() as u32
    }

    pub fn num_positive_pics(&self) -> u32 {
        self.positive.len() as u32
    }

    pub fn len(&self) -> usize {
        self.negative.len() + self.positive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signed POC differences (DeltaPocS0 followed by DeltaPocS1).
    pub fn delta_pocs(&self) -> Vec<i64> {
        let mut deltas = Vec::with_capacity(self.len());
        let mut poc = 0i64;
        for entry in &self.negative {
            poc -= i64::from(entry.delta_poc_minus1) + 1;
            deltas.push(poc);
        }
        poc = 0;
        for entry in &self.positive {
            poc += i64::from(entry.delta_poc_minus1) + 1;
            deltas.push(poc);
        }
        deltas
    }

    /// NumPicTotalCurr: entries used by the current picture.
    pub fn num_pic_total_curr(&self) -> u32 {
        self.negative
            .iter()
            .chain(&self.positive)
            .filter(|e| e.used_by_curr_pic)
            .count() as u32
    }
}

/// Slice segment header (7.3.6.1) of the single slice of a picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub nal_unit_type: NalUnitType,
    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub slice_pic_parameter_set_id: u32,
    pub slice_segment_address: u32,
    pub slice_type: SliceType,
    pub slice_pic_order_cnt_lsb: u32,
    pub short_term_ref_pic_set_sps_flag: bool,
    /// Present for every non-IDR picture.
    pub short_term_ref_pic_set: Option<ReferencePictureSet>,
    pub slice_temporal_mvp_enabled_flag: bool,
    pub slice_sao_luma_flag: bool,
    pub slice_sao_chroma_flag: bool,
    pub num_ref_idx_active_override_flag: bool,
    pub num_ref_idx_l0_active_minus1: u32,
    pub num_ref_idx_l1_active_minus1: u32,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u32,
    pub five_minus_max_num_merge_cand: u32,
    pub slice_qp_delta: i32,
    pub slice_cb_qp_offset: i32,
    pub slice_cr_qp_offset: i32,
    pub slice_deblocking_filter_disabled_flag: bool,
    pub slice_loop_filter_across_slices_enabled_flag: bool,
}

/// Mastering display colour volume SEI payload (D.2.28), primaries in G, B, R order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasteringDisplayColourVolume {
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

/// Content light level information SEI payload (D.2.35).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevelInfo {
    pub max_content_light_level: u16,
    pub max_pic_average_light_level: u16,
}

/// One SEI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeiMessage {
    MasteringDisplayColourVolume(MasteringDisplayColourVolume),
    ContentLightLevelInfo(ContentLightLevelInfo),
}

impl SeiMessage {
    /// SEI payload type code.
    pub fn payload_type(&self) -> u32 {
        match self {
            Self::MasteringDisplayColourVolume(_) => 137,
            Self::ContentLightLevelInfo(_) => 144,
        }
    }
}

/// Access unit delimiter (7.3.2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aud {
    pub pic_type: u8,
}

/// A NAL unit ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NalUnit {
    Vps(Vps),
    Sps(Sps),
    Pps(Pps),
    Aud(Aud),
    Sei(Vec<SeiMessage>),
    Slice(SliceHeader),
}

impl NalUnit {
    pub fn nal_unit_type(&self) -> NalUnitType {
        match self {
            Self::Vps(_) => NalUnitType::Vps,
            Self::Sps(_) => NalUnitType::Sps,
            Self::Pps(_) => NalUnitType::Pps,
            Self::Aud(_) => NalUnitType::Aud,
            Self::Sei(_) => NalUnitType::PrefixSei,
            Self::Slice(header) => header.nal_unit_type,
        }
    }

    pub fn header(&self) -> NalUnitHeader {
        NalUnitHeader::new(self.nal_unit_type())
    }
}
