//! Hardware-facing parameter records.
//!
//! These mirror the sequence, picture and slice parameter buffers an HEVC
//! encode driver consumes alongside the packed headers. They are filled from
//! the same derived state as the bitstream syntax so both always agree.

use bitflags::bitflags;

use super::classify::PictureClass;
use super::params::ParameterState;
use super::syntax::{NalUnitType, Sps};
use crate::encoder::picture::{EncodedPicture, PictureType, SurfaceId};
use crate::encoder::EncodeConfig;
use crate::error::{HevcError, Result};

/// Number of reference slots in picture and slice records.
pub const MAX_REFERENCE_FRAMES: usize = 15;

/// `collocated_ref_pic_index` value meaning "no collocated picture".
pub const NO_COLLOCATED_PICTURE: u8 = 0xff;

bitflags! {
    /// Flags of a picture slot in hardware records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HwPictureFlags: u32 {
        /// Slot is unused.
        const INVALID = 0x01;
        const FIELD_PIC = 0x02;
        const BOTTOM_FIELD = 0x04;
        const LONG_TERM = 0x08;
        /// Short-term reference preceding the current picture in display order.
        const RPS_ST_CURR_BEFORE = 0x10;
        /// Short-term reference following the current picture in display order.
        const RPS_ST_CURR_AFTER = 0x20;
        const RPS_LT_CURR = 0x40;
    }
}

/// A picture slot in hardware records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwPicture {
    pub surface: SurfaceId,
    pub pic_order_cnt: i32,
    pub flags: HwPictureFlags,
}

impl HwPicture {
    /// An unused slot.
    pub const INVALID: HwPicture = HwPicture {
        surface: SurfaceId::INVALID,
        pic_order_cnt: 0,
        flags: HwPictureFlags::INVALID,
    };

    pub fn is_valid(&self) -> bool {
        !self.flags.contains(HwPictureFlags::INVALID)
    }
}

/// Sequence level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceFields {
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub scaling_list_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub pcm_loop_filter_disabled_flag: bool,
    pub sps_temporal_mvp_enabled_flag: bool,
}

/// Sequence parameters handed to the driver once per stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceParams {
    pub general_profile_idc: u8,
    pub general_level_idc: u8,
    pub general_tier_flag: bool,
    pub intra_period: u32,
    pub intra_idr_period: u32,
    pub ip_period: u32,
    /// Zero under constant QP.
    pub bits_per_second: u32,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub seq_fields: SequenceFields,
    pub log2_min_luma_coding_block_size_minus3: u32,
    pub log2_diff_max_min_luma_coding_block_size: u32,
    pub log2_min_transform_block_size_minus2: u32,
    pub log2_diff_max_min_transform_block_size: u32,
    pub max_transform_hierarchy_depth_inter: u32,
    pub max_transform_hierarchy_depth_intra: u32,
    pub pcm_sample_bit_depth_luma_minus1: u32,
    pub pcm_sample_bit_depth_chroma_minus1: u32,
    pub log2_min_pcm_luma_coding_block_size_minus3: u32,
    pub log2_max_pcm_luma_coding_block_size_minus3: u32,
    pub vui_parameters_present_flag: bool,
}

impl SequenceParams {
    pub fn derive(config: &EncodeConfig, sps: &Sps) -> Self {
        let ptl = &sps.profile_tier_level;
        let bits_per_second = if config.rate_control_mode.is_constant_qp() {
            0
        } else {
            config.target_bitrate
        };

        Self {
            general_profile_idc: ptl.general_profile_idc,
            general_level_idc: ptl.general_level_idc,
            general_tier_flag: ptl.general_tier_flag,
            intra_period: config.gop_size,
            intra_idr_period: config.gop_size,
            ip_period: config.b_frame_count + 1,
            bits_per_second,
            pic_width_in_luma_samples: sps.pic_width_in_luma_samples,
            pic_height_in_luma_samples: sps.pic_height_in_luma_samples,
            seq_fields: SequenceFields {
                chroma_format_idc: sps.chroma_format_idc,
                separate_colour_plane_flag: sps.separate_colour_plane_flag,
                bit_depth_luma_minus8: sps.bit_depth_luma_minus8 as u8,
                bit_depth_chroma_minus8: sps.bit_depth_chroma_minus8 as u8,
                scaling_list_enabled_flag: sps.scaling_list_enabled_flag,
                strong_intra_smoothing_enabled_flag: sps.strong_intra_smoothing_enabled_flag,
                amp_enabled_flag: sps.amp_enabled_flag,
                sample_adaptive_offset_enabled_flag: sps.sample_adaptive_offset_enabled_flag,
                pcm_enabled_flag: sps.pcm_enabled_flag,
                pcm_loop_filter_disabled_flag: false,
                sps_temporal_mvp_enabled_flag: sps.sps_temporal_mvp_enabled_flag,
            },
            log2_min_luma_coding_block_size_minus3: sps.log2_min_luma_coding_block_size_minus3,
            log2_diff_max_min_luma_coding_block_size: sps.log2_diff_max_min_luma_coding_block_size,
            log2_min_transform_block_size_minus2: sps.log2_min_luma_transform_block_size_minus2,
            log2_diff_max_min_transform_block_size: sps
                .log2_diff_max_min_luma_transform_block_size,
            max_transform_hierarchy_depth_inter: sps.max_transform_hierarchy_depth_inter,
            max_transform_hierarchy_depth_intra: sps.max_transform_hierarchy_depth_intra,
            // PCM is disabled.
            pcm_sample_bit_depth_luma_minus1: 0,
            pcm_sample_bit_depth_chroma_minus1: 0,
            log2_min_pcm_luma_coding_block_size_minus3: 0,
            log2_max_pcm_luma_coding_block_size_minus3: 0,
            // The VUI travels in the packed SPS only.
            vui_parameters_present_flag: false,
        }
    }
}

/// Picture level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureFields {
    pub idr_pic_flag: bool,
    /// 1 = I, 2 = P, 3 = B.
    pub coding_type: u8,
    pub reference_pic_flag: bool,
    pub sign_data_hiding_enabled_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub scaling_list_data_present_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
}

/// Per-picture parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureParams {
    pub decoded_curr_pic: HwPicture,
    pub reference_frames: [HwPicture; MAX_REFERENCE_FRAMES],
    pub collocated_ref_pic_index: u8,
    pub last_picture: bool,
    pub pic_init_qp: u8,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub log2_parallel_merge_level_minus2: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub slice_pic_parameter_set_id: u8,
    pub nal_unit_type: NalUnitType,
    pub pic_fields: PictureFields,
}

impl PictureParams {
    /// Fill the picture record of `picture` once it has been classified.
    pub fn derive(
        state: &ParameterState,
        picture: &EncodedPicture,
        class: &PictureClass,
    ) -> Result<Self> {
        let pps = &state.pps;
        // Display order of the IDR the picture order counts are relative to.
        let origin = i64::try_from(picture.display_order)
            .map(|display| display - i64::from(class.pic_order_cnt))
            .map_err(|_| overflow(picture.display_order))?;

        let mut reference_frames = [HwPicture::INVALID; MAX_REFERENCE_FRAMES];
        for (slot, reference) in reference_frames.iter_mut().zip(&picture.refs) {
            let display = i64::try_from(reference.display_order)
                .map_err(|_| overflow(reference.display_order))?;
            let pic_order_cnt = i32::try_from(display - origin)
                .map_err(|_| overflow(reference.display_order))?;

            let mut flags = HwPictureFlags::empty();
            if reference.display_order < picture.display_order {
                flags |= HwPictureFlags::RPS_ST_CURR_BEFORE;
            }
            if reference.display_order > picture.display_order {
                flags |= HwPictureFlags::RPS_ST_CURR_AFTER;
            }
            *slot = HwPicture {
                surface: reference.recon_surface,
                pic_order_cnt,
                flags,
            };
        }

        let coding_type = match class.picture_type {
            PictureType::Idr | PictureType::I => 1,
            PictureType::P => 2,
            PictureType::B => 3,
        };

        Ok(Self {
            decoded_curr_pic: HwPicture {
                surface: picture.recon_surface,
                pic_order_cnt: class.pic_order_cnt,
                flags: HwPictureFlags::empty(),
            },
            reference_frames,
            collocated_ref_pic_index: NO_COLLOCATED_PICTURE,
            last_picture: false,
            pic_init_qp: state.init_qp() as u8,
            diff_cu_qp_delta_depth: pps.diff_cu_qp_delta_depth as u8,
            pps_cb_qp_offset: pps.pps_cb_qp_offset as i8,
            pps_cr_qp_offset: pps.pps_cr_qp_offset as i8,
            log2_parallel_merge_level_minus2: pps.log2_parallel_merge_level_minus2 as u8,
            num_ref_idx_l0_default_active_minus1: pps.num_ref_idx_l0_default_active_minus1 as u8,
            num_ref_idx_l1_default_active_minus1: pps.num_ref_idx_l1_default_active_minus1 as u8,
            slice_pic_parameter_set_id: pps.pps_pic_parameter_set_id as u8,
            nal_unit_type: class.nal_unit_type,
            pic_fields: PictureFields {
                idr_pic_flag: class.picture_type.is_idr(),
                coding_type,
                reference_pic_flag: class.picture_type.is_reference(),
                sign_data_hiding_enabled_flag: pps.sign_data_hiding_enabled_flag,
                constrained_intra_pred_flag: pps.constrained_intra_pred_flag,
                transform_skip_enabled_flag: pps.transform_skip_enabled_flag,
                cu_qp_delta_enabled_flag: pps.cu_qp_delta_enabled_flag,
                weighted_pred_flag: pps.weighted_pred_flag,
                weighted_bipred_flag: pps.weighted_bipred_flag,
                transquant_bypass_enabled_flag: pps.transquant_bypass_enabled_flag,
                tiles_enabled_flag: pps.tiles_enabled_flag,
                entropy_coding_sync_enabled_flag: pps.entropy_coding_sync_enabled_flag,
                scaling_list_data_present_flag: pps.pps_scaling_list_data_present_flag,
                no_output_of_prior_pics_flag: false,
            },
        })
    }
}

fn overflow(display_order: u64) -> HevcError {
    HevcError::Precondition(format!(
        "picture order count of display position {display_order} overflows"
    ))
}

/// Slice level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceFields {
    pub last_slice_of_pic_flag: bool,
    pub dependent_slice_segment_flag: bool,
    pub colour_plane_id: u8,
    pub slice_temporal_mvp_enabled_flag: bool,
    pub slice_sao_luma_flag: bool,
    pub slice_sao_chroma_flag: bool,
    pub num_ref_idx_active_override_flag: bool,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub slice_deblocking_filter_disabled_flag: bool,
    pub slice_loop_filter_across_slices_enabled_flag: bool,
    pub collocated_from_l0_flag: bool,
}

/// Per-slice parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceParams {
    pub slice_segment_address: u32,
    pub num_ctu_in_slice: u32,
    pub slice_type: u8,
    pub slice_pic_parameter_set_id: u8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub ref_pic_list0: [HwPicture; MAX_REFERENCE_FRAMES],
    pub ref_pic_list1: [HwPicture; MAX_REFERENCE_FRAMES],
    pub max_num_merge_cand: u8,
    pub slice_qp_delta: i8,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub slice_beta_offset_div2: i8,
    pub slice_tc_offset_div2: i8,
    pub slice_fields: SliceFields,
}
