//! Slice header construction.
//!
//! Every picture is coded as a single slice. The header is derived from the
//! immutable parameter sets, the picture classification and its reference
//! picture set; the hardware slice record is filled from the same header.

use super::classify::PictureClass;
use super::hw::{HwPicture, PictureParams, SliceFields, SliceParams, MAX_REFERENCE_FRAMES};
use super::params::ParameterState;
use super::syntax::{ReferencePictureSet, SliceHeader, SliceType};
use crate::error::{HevcError, Result};

/// Merge candidates used by every slice.
pub const MAX_NUM_MERGE_CAND: u32 = 5;

/// Build the slice header of a classified picture.
///
/// `rps` is ignored for IDR pictures, which must not carry references.
pub fn build_slice_header(
    state: &ParameterState,
    class: &PictureClass,
    rps: ReferencePictureSet,
) -> Result<SliceHeader> {
    let sps = &state.sps;
    let pps = &state.pps;
    let is_idr = class.nal_unit_type.is_idr();
    if is_idr && !rps.is_empty() {
        return Err(HevcError::Precondition(
            "IDR picture with a non-empty reference picture set".to_string(),
        ));
    }

    let pic_order_cnt = u64::try_from(class.pic_order_cnt).map_err(|_| {
        HevcError::Precondition(format!(
            "negative picture order count {}",
            class.pic_order_cnt
        ))
    })?;
    let slice_pic_order_cnt_lsb = (pic_order_cnt & state.pic_order_cnt_lsb_mask()) as u32;

    let temporal_mvp = !is_idr && sps.sps_temporal_mvp_enabled_flag;
    let sao = sps.sample_adaptive_offset_enabled_flag;
    let qp = state.fixed_qp.for_picture(class.picture_type) as i32;

    Ok(SliceHeader {
        nal_unit_type: class.nal_unit_type,
        first_slice_segment_in_pic_flag: true,
        no_output_of_prior_pics_flag: false,
        slice_pic_parameter_set_id: pps.pps_pic_parameter_set_id,
        slice_segment_address: 0,
        slice_type: class.slice_type,
        slice_pic_order_cnt_lsb,
        short_term_ref_pic_set_sps_flag: false,
        short_term_ref_pic_set: (!is_idr).then_some(rps),
        slice_temporal_mvp_enabled_flag: temporal_mvp,
        slice_sao_luma_flag: sao,
        slice_sao_chroma_flag: sao && sps.chroma_array_type() != 0,
        num_ref_idx_active_override_flag: false,
        num_ref_idx_l0_active_minus1: pps.num_ref_idx_l0_default_active_minus1,
        num_ref_idx_l1_active_minus1: pps.num_ref_idx_l1_default_active_minus1,
        mvd_l1_zero_flag: false,
        cabac_init_flag: false,
        collocated_from_l0_flag: temporal_mvp && class.slice_type == SliceType::B,
        collocated_ref_idx: 0,
        five_minus_max_num_merge_cand: 5 - MAX_NUM_MERGE_CAND,
        slice_qp_delta: qp - state.init_qp(),
        slice_cb_qp_offset: 0,
        slice_cr_qp_offset: 0,
        slice_deblocking_filter_disabled_flag: false,
        slice_loop_filter_across_slices_enabled_flag: pps.pps_loop_filter_across_slices_enabled_flag,
    })
}

/// Fill the hardware slice record from a slice header.
///
/// The first entry of list 0 is the backward reference of P and B slices and
/// the first entry of list 1 the forward reference of B slices, both taken
/// from the picture record's reference slots.
pub fn build_slice_params(
    state: &ParameterState,
    header: &SliceHeader,
    picture: &PictureParams,
) -> SliceParams {
    let mut ref_pic_list0 = [HwPicture::INVALID; MAX_REFERENCE_FRAMES];
    let mut ref_pic_list1 = [HwPicture::INVALID; MAX_REFERENCE_FRAMES];
    if header.slice_type.is_inter() {
        ref_pic_list0[0] = picture.reference_frames[0];
    }
    if header.slice_type == SliceType::B {
        ref_pic_list1[0] = picture.reference_frames[1];
    }

    SliceParams {
        slice_segment_address: header.slice_segment_address,
        num_ctu_in_slice: state.ctu_width * state.ctu_height,
        slice_type: header.slice_type.code(),
        slice_pic_parameter_set_id: header.slice_pic_parameter_set_id as u8,
        num_ref_idx_l0_active_minus1: header.num_ref_idx_l0_active_minus1 as u8,
        num_ref_idx_l1_active_minus1: header.num_ref_idx_l1_active_minus1 as u8,
        ref_pic_list0,
        ref_pic_list1,
        max_num_merge_cand: (5 - header.five_minus_max_num_merge_cand) as u8,
        slice_qp_delta: header.slice_qp_delta as i8,
        slice_cb_qp_offset: header.slice_cb_qp_offset as i8,
        slice_cr_qp_offset: header.slice_cr_qp_offset as i8,
        slice_beta_offset_div2: 0,
        slice_tc_offset_div2: 0,
        slice_fields: SliceFields {
            last_slice_of_pic_flag: true,
            dependent_slice_segment_flag: false,
            colour_plane_id: 0,
            slice_temporal_mvp_enabled_flag: header.slice_temporal_mvp_enabled_flag,
            slice_sao_luma_flag: header.slice_sao_luma_flag,
            slice_sao_chroma_flag: header.slice_sao_chroma_flag,
            num_ref_idx_active_override_flag: header.num_ref_idx_active_override_flag,
            mvd_l1_zero_flag: header.mvd_l1_zero_flag,
            cabac_init_flag: header.cabac_init_flag,
            slice_deblocking_filter_disabled_flag: header.slice_deblocking_filter_disabled_flag,
            slice_loop_filter_across_slices_enabled_flag: header
                .slice_loop_filter_across_slices_enabled_flag,
            collocated_from_l0_flag: header.collocated_from_l0_flag,
        },
    }
}
