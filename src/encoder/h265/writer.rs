//! Annex B serialization of HEVC NAL units.
//!
//! Each unit is written as an RBSP with [`BitWriter`], escaped with emulation
//! prevention bytes and prefixed with a start code. Slice headers depend on
//! the active SPS and PPS, which the writer keeps from the last parameter sets
//! it serialized or was constructed with.

use tracing::debug;

use super::syntax::{
    Aud, NalUnit, NalUnitHeader, NalUnitType, Pps, ProfileTierLevel, ReferencePictureSet,
    SeiMessage, SliceHeader, SliceType, Sps, SubLayerOrdering, TimingInfo, Vps, Vui,
};
use crate::encoder::bitwriter::BitWriter;
use crate::error::{HevcError, Result};

/// Bytes produced for a list of NAL units.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerializedFragment {
    pub data: Vec<u8>,
    /// Zero bits padding the final byte.
    pub padding_bits: u8,
}

impl SerializedFragment {
    /// Exact number of meaningful bits.
    pub fn bit_len(&self) -> usize {
        self.data.len() * 8 - usize::from(self.padding_bits)
    }
}

/// Serializer of NAL unit sequences.
pub trait NalSerializer: Send {
    /// Serialize `units` in order into one fragment.
    fn write_fragment(&mut self, units: &[NalUnit]) -> Result<SerializedFragment>;
}

/// Byte stream format writer (ITU-T H.265 Annex B).
#[derive(Debug, Clone, Default)]
pub struct AnnexBWriter {
    active_sps: Option<Sps>,
    active_pps: Option<Pps>,
}

impl AnnexBWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer that can serialize slices without first writing parameter sets.
    pub fn with_parameter_sets(sps: Sps, pps: Pps) -> Self {
        Self {
            active_sps: Some(sps),
            active_pps: Some(pps),
        }
    }

    /// Serialize the RBSP of a single unit, without header or escaping.
    fn write_rbsp(&mut self, unit: &NalUnit) -> Result<Vec<u8>> {
        let mut w = BitWriter::new();
        match unit {
            NalUnit::Vps(vps) => write_vps(&mut w, vps)?,
            NalUnit::Sps(sps) => {
                write_sps(&mut w, sps)?;
                self.active_sps = Some(sps.clone());
            }
            NalUnit::Pps(pps) => {
                write_pps(&mut w, pps)?;
                self.active_pps = Some(pps.clone());
            }
            NalUnit::Aud(aud) => write_aud(&mut w, aud)?,
            NalUnit::Sei(messages) => write_sei(&mut w, messages)?,
            NalUnit::Slice(header) => {
                let (sps, pps) = match (&self.active_sps, &self.active_pps) {
                    (Some(sps), Some(pps)) => (sps, pps),
                    _ => {
                        return Err(HevcError::InvalidInput(
                            "slice header written before its parameter sets".to_string(),
                        ))
                    }
                };
                if pps.pps_seq_parameter_set_id != sps.sps_seq_parameter_set_id
                    || header.slice_pic_parameter_set_id != pps.pps_pic_parameter_set_id
                {
                    return Err(HevcError::InvalidInput(format!(
                        "slice refers to PPS {} which is not active",
                        header.slice_pic_parameter_set_id
                    )));
                }
                write_slice_header(&mut w, header, sps, pps)?;
            }
        }
        Ok(w.finish())
    }
}

impl NalSerializer for AnnexBWriter {
    fn write_fragment(&mut self, units: &[NalUnit]) -> Result<SerializedFragment> {
        let mut data = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            let rbsp = self.write_rbsp(unit)?;
            let header = unit.header();

            // zero_byte precedes the first unit and every parameter set.
            if i == 0 || header.nal_unit_type.is_parameter_set() {
                data.push(0);
            }
            data.extend_from_slice(&[0, 0, 1]);
            let start = data.len();
            data.extend_from_slice(&nal_header_bytes(&header));
            append_escaped(&mut data, &rbsp);
            if data.last() == Some(&0) {
                data.push(0x03);
            }
            debug!(
                "Wrote {:?} NAL unit: {} bytes",
                header.nal_unit_type,
                data.len() - start
            );
        }
        Ok(SerializedFragment {
            data,
            padding_bits: 0,
        })
    }
}

/// The two-byte `nal_unit_header()`.
pub fn nal_header_bytes(header: &NalUnitHeader) -> [u8; 2] {
    let mut w = BitWriter::new();
    w.write_flag(false); // forbidden_zero_bit
    w.write_bits(u64::from(header.nal_unit_type.code()), 6);
    w.write_bits(u64::from(header.nuh_layer_id), 6);
    w.write_bits(u64::from(header.nuh_temporal_id_plus1), 3);
    let bytes = w.finish();
    [bytes[0], bytes[1]]
}

/// Append `rbsp` to `out`, inserting emulation prevention bytes.
pub fn append_escaped(out: &mut Vec<u8>, rbsp: &[u8]) {
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
}

fn write_profile_tier_level(
    w: &mut BitWriter,
    ptl: &ProfileTierLevel,
    max_sub_layers_minus1: u8,
) {
    w.write_bits(u64::from(ptl.general_profile_space), 2);
    w.write_flag(ptl.general_tier_flag);
    w.write_bits(u64::from(ptl.general_profile_idc), 5);
    for &flag in &ptl.general_profile_compatibility_flag {
        w.write_flag(flag);
    }
    w.write_flag(ptl.general_progressive_source_flag);
    w.write_flag(ptl.general_interlaced_source_flag);
    w.write_flag(ptl.general_non_packed_constraint_flag);
    w.write_flag(ptl.general_frame_only_constraint_flag);

    if ptl.is_compatible_with(&[4, 5, 6, 7, 8, 9, 10, 11]) {
        w.write_flag(ptl.general_max_12bit_constraint_flag);
        w.write_flag(ptl.general_max_10bit_constraint_flag);
        w.write_flag(ptl.general_max_8bit_constraint_flag);
        w.write_flag(ptl.general_max_422chroma_constraint_flag);
        w.write_flag(ptl.general_max_420chroma_constraint_flag);
        w.write_flag(ptl.general_max_monochrome_constraint_flag);
        w.write_flag(ptl.general_intra_constraint_flag);
        w.write_flag(ptl.general_one_picture_only_constraint_flag);
        w.write_flag(ptl.general_lower_bit_rate_constraint_flag);
        w.write_bits(0, 34); // general_reserved_zero_34bits
    } else if ptl.is_compatible_with(&[2]) {
        w.write_bits(0, 7);
        w.write_flag(ptl.general_one_picture_only_constraint_flag);
        w.write_bits(0, 35);
    } else {
        w.write_bits(0, 43);
    }
    // general_inbld_flag or general_reserved_zero_bit
    w.write_flag(false);
    w.write_bits(u64::from(ptl.general_level_idc), 8);

    // Sub-layer profile and level information is never signalled.
    for _ in 0..max_sub_layers_minus1 {
        w.write_flag(false); // sub_layer_profile_present_flag
        w.write_flag(false); // sub_layer_level_present_flag
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            w.write_bits(0, 2); // reserved_zero_2bits
        }
    }
}

fn write_sub_layer_ordering(
    w: &mut BitWriter,
    ordering: &SubLayerOrdering,
    info_present: bool,
    max_sub_layers_minus1: u8,
) {
    // The same values are used for every sub-layer.
    let count = if info_present {
        usize::from(max_sub_layers_minus1) + 1
    } else {
        1
    };
    for _ in 0..count {
        w.write_ue(ordering.max_dec_pic_buffering_minus1);
        w.write_ue(ordering.max_num_reorder_pics);
        w.write_ue(ordering.max_latency_increase_plus1);
    }
}

fn write_timing_info(w: &mut BitWriter, timing: &TimingInfo) {
    w.write_bits(u64::from(timing.num_units_in_tick), 32);
    w.write_bits(u64::from(timing.time_scale), 32);
    w.write_flag(timing.num_ticks_poc_diff_one_minus1.is_some());
    if let Some(ticks) = timing.num_ticks_poc_diff_one_minus1 {
        w.write_ue(ticks);
    }
}

fn write_vps(w: &mut BitWriter, vps: &Vps) -> Result<()> {
    if vps.vps_num_layer_sets_minus1 != 0 {
        return Err(HevcError::InvalidInput(
            "multiple VPS layer sets are not supported".to_string(),
        ));
    }
    w.write_bits(u64::from(vps.vps_video_parameter_set_id), 4);
    w.write_flag(vps.vps_base_layer_internal_flag);
    w.write_flag(vps.vps_base_layer_available_flag);
    w.write_bits(u64::from(vps.vps_max_layers_minus1), 6);
    w.write_bits(u64::from(vps.vps_max_sub_layers_minus1), 3);
    w.write_flag(vps.vps_temporal_id_nesting_flag);
    w.write_bits(0xffff, 16); // vps_reserved_0xffff_16bits

    write_profile_tier_level(w, &vps.profile_tier_level, vps.vps_max_sub_layers_minus1);

    w.write_flag(vps.vps_sub_layer_ordering_info_present_flag);
    write_sub_layer_ordering(
        w,
        &vps.ordering,
        vps.vps_sub_layer_ordering_info_present_flag,
        vps.vps_max_sub_layers_minus1,
    );

    w.write_bits(u64::from(vps.vps_max_layer_id), 6);
    w.write_ue(vps.vps_num_layer_sets_minus1);

    w.write_flag(vps.timing_info.is_some());
    if let Some(timing) = &vps.timing_info {
        write_timing_info(w, timing);
        w.write_ue(0); // vps_num_hrd_parameters
    }

    w.write_flag(false); // vps_extension_flag
    w.rbsp_trailing_bits();
    Ok(())
}

fn write_vui(w: &mut BitWriter, vui: &Vui) {
    w.write_flag(vui.aspect_ratio.is_some());
    if let Some(aspect) = &vui.aspect_ratio {
        w.write_bits(u64::from(aspect.aspect_ratio_idc), 8);
        if aspect.aspect_ratio_idc == super::params::EXTENDED_SAR {
            w.write_bits(u64::from(aspect.sar_width), 16);
            w.write_bits(u64::from(aspect.sar_height), 16);
        }
    }

    w.write_flag(false); // overscan_info_present_flag

    w.write_flag(vui.video_signal_type_present_flag);
    if vui.video_signal_type_present_flag {
        let signal = &vui.video_signal_type;
        w.write_bits(u64::from(signal.video_format), 3);
        w.write_flag(signal.video_full_range_flag);
        w.write_flag(signal.colour_description_present_flag);
        if signal.colour_description_present_flag {
            w.write_bits(u64::from(signal.colour_primaries), 8);
            w.write_bits(u64::from(signal.transfer_characteristics), 8);
            w.write_bits(u64::from(signal.matrix_coeffs), 8);
        }
    }

    w.write_flag(vui.chroma_loc_info.is_some());
    if let Some(location) = &vui.chroma_loc_info {
        w.write_ue(location.chroma_sample_loc_type_top_field);
        w.write_ue(location.chroma_sample_loc_type_bottom_field);
    }

    w.write_flag(false); // neutral_chroma_indication_flag
    w.write_flag(false); // field_seq_flag
    w.write_flag(false); // frame_field_info_present_flag
    w.write_flag(false); // default_display_window_flag

    w.write_flag(vui.timing_info.is_some());
    if let Some(timing) = &vui.timing_info {
        write_timing_info(w, timing);
        w.write_flag(false); // vui_hrd_parameters_present_flag
    }

    w.write_flag(vui.bitstream_restriction.is_some());
    if let Some(restriction) = &vui.bitstream_restriction {
        w.write_flag(restriction.tiles_fixed_structure_flag);
        w.write_flag(restriction.motion_vectors_over_pic_boundaries_flag);
        w.write_flag(restriction.restricted_ref_pic_lists_flag);
        w.write_ue(restriction.min_spatial_segmentation_idc);
        w.write_ue(restriction.max_bytes_per_pic_denom);
        w.write_ue(restriction.max_bits_per_min_cu_denom);
        w.write_ue(restriction.log2_max_mv_length_horizontal);
        w.write_ue(restriction.log2_max_mv_length_vertical);
    }
}

fn write_sps(w: &mut BitWriter, sps: &Sps) -> Result<()> {
    if sps.pcm_enabled_flag {
        return Err(HevcError::InvalidInput("PCM is not supported".to_string()));
    }
    if sps.num_short_term_ref_pic_sets != 0 {
        return Err(HevcError::InvalidInput(
            "reference picture sets in the SPS are not supported".to_string(),
        ));
    }

    w.write_bits(u64::from(sps.sps_video_parameter_set_id), 4);
    w.write_bits(u64::from(sps.sps_max_sub_layers_minus1), 3);
    w.write_flag(sps.sps_temporal_id_nesting_flag);
    write_profile_tier_level(w, &sps.profile_tier_level, sps.sps_max_sub_layers_minus1);

    w.write_ue(sps.sps_seq_parameter_set_id);
    w.write_ue(u32::from(sps.chroma_format_idc));
    if sps.chroma_format_idc == 3 {
        w.write_flag(sps.separate_colour_plane_flag);
    }
    w.write_ue(sps.pic_width_in_luma_samples);
    w.write_ue(sps.pic_height_in_luma_samples);

    w.write_flag(sps.conformance_window.is_some());
    if let Some(window) = &sps.conformance_window {
        w.write_ue(window.left_offset);
        w.write_ue(window.right_offset);
        w.write_ue(window.top_offset);
        w.write_ue(window.bottom_offset);
    }

    w.write_ue(sps.bit_depth_luma_minus8);
    w.write_ue(sps.bit_depth_chroma_minus8);
    w.write_ue(sps.log2_max_pic_order_cnt_lsb_minus4);

    w.write_flag(sps.sps_sub_layer_ordering_info_present_flag);
    write_sub_layer_ordering(
        w,
        &sps.ordering,
        sps.sps_sub_layer_ordering_info_present_flag,
        sps.sps_max_sub_layers_minus1,
    );

    w.write_ue(sps.log2_min_luma_coding_block_size_minus3);
    w.write_ue(sps.log2_diff_max_min_luma_coding_block_size);
    w.write_ue(sps.log2_min_luma_transform_block_size_minus2);
    w.write_ue(sps.log2_diff_max_min_luma_transform_block_size);
    w.write_ue(sps.max_transform_hierarchy_depth_inter);
    w.write_ue(sps.max_transform_hierarchy_depth_intra);

    w.write_flag(sps.scaling_list_enabled_flag);
    if sps.scaling_list_enabled_flag {
        w.write_flag(false); // sps_scaling_list_data_present_flag: default lists
    }
    w.write_flag(sps.amp_enabled_flag);
    w.write_flag(sps.sample_adaptive_offset_enabled_flag);
    w.write_flag(sps.pcm_enabled_flag);

    w.write_ue(sps.num_short_term_ref_pic_sets);
    w.write_flag(sps.long_term_ref_pics_present_flag);
    if sps.long_term_ref_pics_present_flag {
        w.write_ue(0); // num_long_term_ref_pics_sps
    }
    w.write_flag(sps.sps_temporal_mvp_enabled_flag);
    w.write_flag(sps.strong_intra_smoothing_enabled_flag);

    w.write_flag(sps.vui.is_some());
    if let Some(vui) = &sps.vui {
        write_vui(w, vui);
    }

    w.write_flag(false); // sps_extension_present_flag
    w.rbsp_trailing_bits();
    Ok(())
}

fn write_pps(w: &mut BitWriter, pps: &Pps) -> Result<()> {
    if pps.tiles_enabled_flag {
        return Err(HevcError::InvalidInput("tiles are not supported".to_string()));
    }
    if pps.pps_scaling_list_data_present_flag {
        return Err(HevcError::InvalidInput(
            "PPS scaling lists are not supported".to_string(),
        ));
    }

    w.write_ue(pps.pps_pic_parameter_set_id);
    w.write_ue(pps.pps_seq_parameter_set_id);
    w.write_flag(pps.dependent_slice_segments_enabled_flag);
    w.write_flag(pps.output_flag_present_flag);
    w.write_bits(u64::from(pps.num_extra_slice_header_bits), 3);
    w.write_flag(pps.sign_data_hiding_enabled_flag);
    w.write_flag(pps.cabac_init_present_flag);
    w.write_ue(pps.num_ref_idx_l0_default_active_minus1);
    w.write_ue(pps.num_ref_idx_l1_default_active_minus1);
    w.write_se(pps.init_qp_minus26);
    w.write_flag(pps.constrained_intra_pred_flag);
    w.write_flag(pps.transform_skip_enabled_flag);
    w.write_flag(pps.cu_qp_delta_enabled_flag);
    if pps.cu_qp_delta_enabled_flag {
        w.write_ue(pps.diff_cu_qp_delta_depth);
    }
    w.write_se(pps.pps_cb_qp_offset);
    w.write_se(pps.pps_cr_qp_offset);
    w.write_flag(pps.pps_slice_chroma_qp_offsets_present_flag);
    w.write_flag(pps.weighted_pred_flag);
    w.write_flag(pps.weighted_bipred_flag);
    w.write_flag(pps.transquant_bypass_enabled_flag);
    w.write_flag(pps.tiles_enabled_flag);
    w.write_flag(pps.entropy_coding_sync_enabled_flag);
    w.write_flag(pps.pps_loop_filter_across_slices_enabled_flag);

    w.write_flag(pps.deblocking_filter_control_present_flag);
    if pps.deblocking_filter_control_present_flag {
        w.write_flag(false); // deblocking_filter_override_enabled_flag
        w.write_flag(false); // pps_deblocking_filter_disabled_flag
        w.write_se(0); // pps_beta_offset_div2
        w.write_se(0); // pps_tc_offset_div2
    }

    w.write_flag(pps.pps_scaling_list_data_present_flag);
    w.write_flag(pps.lists_modification_present_flag);
    w.write_ue(pps.log2_parallel_merge_level_minus2);
    w.write_flag(pps.slice_segment_header_extension_present_flag);
    w.write_flag(false); // pps_extension_present_flag
    w.rbsp_trailing_bits();
    Ok(())
}

fn write_aud(w: &mut BitWriter, aud: &Aud) -> Result<()> {
    if aud.pic_type > 2 {
        return Err(HevcError::InvalidInput(format!(
            "invalid AUD pic_type {}",
            aud.pic_type
        )));
    }
    w.write_bits(u64::from(aud.pic_type), 3);
    w.rbsp_trailing_bits();
    Ok(())
}

fn write_sei_length(w: &mut BitWriter, mut value: usize) {
    while value >= 255 {
        w.write_bits(0xff, 8);
        value -= 255;
    }
    w.write_bits(value as u64, 8);
}

fn write_sei_payload(message: &SeiMessage) -> Vec<u8> {
    let mut w = BitWriter::new();
    match message {
        SeiMessage::MasteringDisplayColourVolume(mdcv) => {
            for c in 0..3 {
                w.write_bits(u64::from(mdcv.display_primaries_x[c]), 16);
                w.write_bits(u64::from(mdcv.display_primaries_y[c]), 16);
            }
            w.write_bits(u64::from(mdcv.white_point_x), 16);
            w.write_bits(u64::from(mdcv.white_point_y), 16);
            w.write_bits(u64::from(mdcv.max_display_mastering_luminance), 32);
            w.write_bits(u64::from(mdcv.min_display_mastering_luminance), 32);
        }
        SeiMessage::ContentLightLevelInfo(cll) => {
            w.write_bits(u64::from(cll.max_content_light_level), 16);
            w.write_bits(u64::from(cll.max_pic_average_light_level), 16);
        }
    }
    w.finish()
}

fn write_sei(w: &mut BitWriter, messages: &[SeiMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(HevcError::InvalidInput(
            "SEI NAL unit without messages".to_string(),
        ));
    }
    for message in messages {
        let payload = write_sei_payload(message);
        write_sei_length(w, message.payload_type() as usize);
        write_sei_length(w, payload.len());
        w.write_bytes(&payload);
    }
    w.rbsp_trailing_bits();
    Ok(())
}

fn write_st_ref_pic_set(w: &mut BitWriter, rps: &ReferencePictureSet) {
    // Coded in the slice header with index num_short_term_ref_pic_sets = 0,
    // so inter RPS prediction is not available.
    w.write_ue(rps.num_negative_pics());
    w.write_ue(rps.num_positive_pics());
    for entry in rps.negative.iter().chain(&rps.positive) {
        w.write_ue(entry.delta_poc_minus1);
        w.write_flag(entry.used_by_curr_pic);
    }
}

fn write_slice_header(
    w: &mut BitWriter,
    sh: &SliceHeader,
    sps: &Sps,
    pps: &Pps,
) -> Result<()> {
    if !sh.first_slice_segment_in_pic_flag {
        return Err(HevcError::InvalidInput(
            "only single-slice pictures are supported".to_string(),
        ));
    }

    w.write_flag(sh.first_slice_segment_in_pic_flag);
    if sh.nal_unit_type.is_irap() {
        w.write_flag(sh.no_output_of_prior_pics_flag);
    }
    w.write_ue(sh.slice_pic_parameter_set_id);

    for _ in 0..pps.num_extra_slice_header_bits {
        w.write_flag(false); // slice_reserved_flag
    }
    w.write_ue(u32::from(sh.slice_type.code()));
    if pps.output_flag_present_flag {
        w.write_flag(true); // pic_output_flag
    }
    if sps.separate_colour_plane_flag {
        w.write_bits(0, 2); // colour_plane_id
    }

    if !sh.nal_unit_type.is_idr() {
        let rps = sh.short_term_ref_pic_set.as_ref().ok_or_else(|| {
            HevcError::InvalidInput(format!(
                "{:?} slice without a reference picture set",
                sh.nal_unit_type
            ))
        })?;
        w.write_bits(
            u64::from(sh.slice_pic_order_cnt_lsb),
            sps.log2_max_pic_order_cnt_lsb() as u8,
        );
        w.write_flag(sh.short_term_ref_pic_set_sps_flag);
        if sh.short_term_ref_pic_set_sps_flag {
            return Err(HevcError::InvalidInput(
                "slice refers to an SPS reference picture set".to_string(),
            ));
        }
        write_st_ref_pic_set(w, rps);
        if sps.sps_temporal_mvp_enabled_flag {
            w.write_flag(sh.slice_temporal_mvp_enabled_flag);
        }
    }

    if sps.sample_adaptive_offset_enabled_flag {
        w.write_flag(sh.slice_sao_luma_flag);
        if sps.chroma_array_type() != 0 {
            w.write_flag(sh.slice_sao_chroma_flag);
        }
    }

    if sh.slice_type.is_inter() {
        let is_b = sh.slice_type == SliceType::B;
        w.write_flag(sh.num_ref_idx_active_override_flag);
        if sh.num_ref_idx_active_override_flag {
            w.write_ue(sh.num_ref_idx_l0_active_minus1);
            if is_b {
                w.write_ue(sh.num_ref_idx_l1_active_minus1);
            }
        }
        if pps.lists_modification_present_flag
            && sh
                .short_term_ref_pic_set
                .as_ref()
                .is_some_and(|rps| rps.num_pic_total_curr() > 1)
        {
            return Err(HevcError::InvalidInput(
                "reference list modification is not supported".to_string(),
            ));
        }
        if is_b {
            w.write_flag(sh.mvd_l1_zero_flag);
        }
        if pps.cabac_init_present_flag {
            w.write_flag(sh.cabac_init_flag);
        }
        if sh.slice_temporal_mvp_enabled_flag {
            if is_b {
                w.write_flag(sh.collocated_from_l0_flag);
            }
            let active_minus1 = if sh.collocated_from_l0_flag || !is_b {
                sh.num_ref_idx_l0_active_minus1
            } else {
                sh.num_ref_idx_l1_active_minus1
            };
            if active_minus1 > 0 {
                w.write_ue(sh.collocated_ref_idx);
            }
        }
        if (pps.weighted_pred_flag && sh.slice_type == SliceType::P)
            || (pps.weighted_bipred_flag && is_b)
        {
            return Err(HevcError::InvalidInput(
                "weighted prediction is not supported".to_string(),
            ));
        }
        w.write_ue(sh.five_minus_max_num_merge_cand);
    }

    w.write_se(sh.slice_qp_delta);
    if pps.pps_slice_chroma_qp_offsets_present_flag {
        w.write_se(sh.slice_cb_qp_offset);
        w.write_se(sh.slice_cr_qp_offset);
    }

    if pps.pps_loop_filter_across_slices_enabled_flag
        && (sh.slice_sao_luma_flag
            || sh.slice_sao_chroma_flag
            || !sh.slice_deblocking_filter_disabled_flag)
    {
        w.write_flag(sh.slice_loop_filter_across_slices_enabled_flag);
    }

    if pps.entropy_coding_sync_enabled_flag {
        w.write_ue(0); // num_entry_point_offsets
    }
    if pps.slice_segment_header_extension_present_flag {
        w.write_ue(0); // slice_segment_header_extension_length
    }

    w.byte_alignment();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::bitwriter::BitReader;
    use crate::encoder::h265::params::ParameterState;
    use crate::encoder::h265::syntax::{
        ContentLightLevelInfo, MasteringDisplayColourVolume, NalUnitType, RpsEntry,
    };
    use crate::encoder::{EncodeConfig, Rational};
    use pretty_assertions::assert_eq;

    fn state(config: EncodeConfig) -> ParameterState {
        ParameterState::derive(&config).unwrap()
    }

    fn rbsp(unit: &NalUnit, writer: &mut AnnexBWriter) -> Vec<u8> {
        writer.write_rbsp(unit).unwrap()
    }

    /// Stop bit, zero bits up to the byte boundary, then end of data.
    fn assert_trailing_bits(r: &mut BitReader, data: &[u8]) {
        assert!(r.read_flag());
        let pad = (8 - r.position() % 8) % 8;
        assert_eq!(r.read_bits(pad as u8), 0);
        assert_eq!(r.position(), data.len() * 8);
    }

    fn slice_header(nal_unit_type: NalUnitType, slice_type: SliceType) -> SliceHeader {
        SliceHeader {
            nal_unit_type,
            first_slice_segment_in_pic_flag: true,
            no_output_of_prior_pics_flag: false,
            slice_pic_parameter_set_id: 0,
            slice_segment_address: 0,
            slice_type,
            slice_pic_order_cnt_lsb: 0,
            short_term_ref_pic_set_sps_flag: false,
            short_term_ref_pic_set: None,
            slice_temporal_mvp_enabled_flag: false,
            slice_sao_luma_flag: false,
            slice_sao_chroma_flag: false,
            num_ref_idx_active_override_flag: false,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            mvd_l1_zero_flag: false,
            cabac_init_flag: false,
            collocated_from_l0_flag: false,
            collocated_ref_idx: 0,
            five_minus_max_num_merge_cand: 0,
            slice_qp_delta: 0,
            slice_cb_qp_offset: 0,
            slice_cr_qp_offset: 0,
            slice_deblocking_filter_disabled_flag: false,
            slice_loop_filter_across_slices_enabled_flag: true,
        }
    }

    mod framing_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_emulation_prevention() {
            let mut out = Vec::new();
            append_escaped(&mut out, &[0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04]);
            assert_eq!(
                out,
                vec![0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x00, 0x04]
            );
        }

        #[test]
        fn test_no_escape_for_higher_bytes() {
            let mut out = Vec::new();
            append_escaped(&mut out, &[0x00, 0x00, 0x04, 0x00, 0x00]);
            assert_eq!(out, vec![0x00, 0x00, 0x04, 0x00, 0x00]);
        }

        #[test]
        fn test_nal_header_bytes() {
            assert_eq!(nal_header_bytes(&NalUnitHeader::new(NalUnitType::Vps)), [0x40, 0x01]);
            assert_eq!(nal_header_bytes(&NalUnitHeader::new(NalUnitType::Sps)), [0x42, 0x01]);
            assert_eq!(nal_header_bytes(&NalUnitHeader::new(NalUnitType::Pps)), [0x44, 0x01]);
            assert_eq!(nal_header_bytes(&NalUnitHeader::new(NalUnitType::Aud)), [0x46, 0x01]);
            assert_eq!(
                nal_header_bytes(&NalUnitHeader::new(NalUnitType::PrefixSei)),
                [0x4e, 0x01]
            );
            assert_eq!(
                nal_header_bytes(&NalUnitHeader::new(NalUnitType::IdrWRadl)),
                [0x26, 0x01]
            );
        }

        #[test]
        fn test_start_codes() {
            let st = state(EncodeConfig::h265(640, 480));
            let mut writer = AnnexBWriter::new();
            let fragment = writer
                .write_fragment(&[
                    NalUnit::Aud(Aud { pic_type: 0 }),
                    NalUnit::Vps(st.vps.clone()),
                ])
                .unwrap();

            // AUD: 4-byte start code (first unit), header, pic_type 0 + stop bit.
            assert_eq!(&fragment.data[..7], &[0, 0, 0, 1, 0x46, 0x01, 0x10]);
            // VPS: 4-byte start code even when not first.
            assert_eq!(&fragment.data[7..13], &[0, 0, 0, 1, 0x40, 0x01]);
            assert_eq!(fragment.padding_bits, 0);
            assert_eq!(fragment.bit_len(), fragment.data.len() * 8);
        }

        #[test]
        fn test_slice_after_aud_uses_short_start_code() {
            let st = state(EncodeConfig::h265(640, 480));
            let mut writer = AnnexBWriter::with_parameter_sets(st.sps.clone(), st.pps.clone());
            let fragment = writer
                .write_fragment(&[
                    NalUnit::Aud(Aud { pic_type: 0 }),
                    NalUnit::Slice(slice_header(NalUnitType::IdrWRadl, SliceType::I)),
                ])
                .unwrap();
            assert_eq!(&fragment.data[7..12], &[0, 0, 1, 0x26, 0x01]);
        }

        #[test]
        fn test_slice_requires_parameter_sets() {
            let mut writer = AnnexBWriter::new();
            let result = writer.write_fragment(&[NalUnit::Slice(slice_header(
                NalUnitType::IdrWRadl,
                SliceType::I,
            ))]);
            assert!(matches!(result, Err(HevcError::InvalidInput(_))));
        }

        #[test]
        fn test_parameter_sets_become_active() {
            let st = state(EncodeConfig::h265(640, 480));
            let mut writer = AnnexBWriter::new();
            writer
                .write_fragment(&[
                    NalUnit::Vps(st.vps.clone()),
                    NalUnit::Sps(st.sps.clone()),
                    NalUnit::Pps(st.pps.clone()),
                ])
                .unwrap();
            let fragment = writer
                .write_fragment(&[NalUnit::Slice(slice_header(
                    NalUnitType::IdrWRadl,
                    SliceType::I,
                ))])
                .unwrap();
            assert_eq!(&fragment.data[..6], &[0, 0, 0, 1, 0x26, 0x01]);
        }
    }

    mod parameter_set_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        fn read_ptl(r: &mut BitReader, ptl: &ProfileTierLevel) {
            assert_eq!(r.read_bits(2), 0);
            assert_eq!(r.read_flag(), ptl.general_tier_flag);
            assert_eq!(r.read_bits(5), u64::from(ptl.general_profile_idc));
            for &flag in &ptl.general_profile_compatibility_flag {
                assert_eq!(r.read_flag(), flag);
            }
            // progressive, interlaced, non_packed, frame_only
            assert_eq!(r.read_bits(4), 0b1011);
            // 9 constraint flags, 34 reserved bits and the inbld bit
            r.read_bits(9);
            assert_eq!(r.read_bits(35), 0);
            assert_eq!(r.read_bits(8), u64::from(ptl.general_level_idc));
        }

        #[test]
        fn test_vps_syntax() {
            let st = state(EncodeConfig::h265(1920, 1080).with_b_frames(2));
            let data = rbsp(&NalUnit::Vps(st.vps.clone()), &mut AnnexBWriter::new());
            let mut r = BitReader::new(&data);

            assert_eq!(r.read_bits(4), 0); // vps_video_parameter_set_id
            assert!(r.read_flag());
            assert!(r.read_flag());
            assert_eq!(r.read_bits(6), 0);
            assert_eq!(r.read_bits(3), 0);
            assert!(r.read_flag());
            assert_eq!(r.read_bits(16), 0xffff);
            read_ptl(&mut r, &st.vps.profile_tier_level);
            assert!(!r.read_flag()); // ordering info for the highest sub-layer only
            assert_eq!(r.read_ue(), 2);
            assert_eq!(r.read_ue(), 1);
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_bits(6), 0);
            assert_eq!(r.read_ue(), 0);
            // Default 30/1 frame rate.
            assert!(r.read_flag());
            assert_eq!(r.read_bits(32), 1);
            assert_eq!(r.read_bits(32), 30);
            assert!(r.read_flag());
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 0); // vps_num_hrd_parameters
            assert!(!r.read_flag()); // vps_extension_flag
            assert_trailing_bits(&mut r, &data);
        }

        #[test]
        fn test_sps_syntax() {
            let config = EncodeConfig::h265(1920, 1080)
                .with_sample_aspect_ratio(Rational::new(1, 1))
                .with_color_description(9, 16, 9)
                .with_frame_rate(60, 1);
            let st = state(config);
            let data = rbsp(&NalUnit::Sps(st.sps.clone()), &mut AnnexBWriter::new());
            let mut r = BitReader::new(&data);

            assert_eq!(r.read_bits(4), 0);
            assert_eq!(r.read_bits(3), 0);
            assert!(r.read_flag());
            read_ptl(&mut r, &st.sps.profile_tier_level);
            assert_eq!(r.read_ue(), 0); // sps_seq_parameter_set_id
            assert_eq!(r.read_ue(), 1); // chroma_format_idc
            assert_eq!(r.read_ue(), 1920);
            assert_eq!(r.read_ue(), 1088);
            assert!(r.read_flag()); // conformance_window_flag
            assert_eq!([r.read_ue(), r.read_ue(), r.read_ue(), r.read_ue()], [0, 0, 0, 4]);
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 8); // log2_max_pic_order_cnt_lsb_minus4
            assert!(!r.read_flag());
            assert_eq!([r.read_ue(), r.read_ue(), r.read_ue()], [1, 0, 0]);
            assert_eq!(
                [r.read_ue(), r.read_ue(), r.read_ue(), r.read_ue(), r.read_ue(), r.read_ue()],
                [0, 2, 0, 3, 3, 3]
            );
            assert!(!r.read_flag()); // scaling_list_enabled_flag
            assert!(r.read_flag()); // amp_enabled_flag
            assert!(!r.read_flag()); // sample_adaptive_offset_enabled_flag
            assert!(!r.read_flag()); // pcm_enabled_flag
            assert_eq!(r.read_ue(), 0); // num_short_term_ref_pic_sets
            assert!(!r.read_flag()); // long_term_ref_pics_present_flag
            assert!(!r.read_flag()); // sps_temporal_mvp_enabled_flag
            assert!(!r.read_flag()); // strong_intra_smoothing_enabled_flag

            assert!(r.read_flag()); // vui_parameters_present_flag
            assert!(r.read_flag()); // aspect_ratio_info_present_flag
            assert_eq!(r.read_bits(8), 1);
            assert!(!r.read_flag()); // overscan_info_present_flag
            assert!(r.read_flag()); // video_signal_type_present_flag
            assert_eq!(r.read_bits(3), 5);
            assert!(!r.read_flag());
            assert!(r.read_flag());
            assert_eq!([r.read_bits(8), r.read_bits(8), r.read_bits(8)], [9, 16, 9]);
            assert!(!r.read_flag()); // chroma_loc_info_present_flag
            assert_eq!(r.read_bits(4), 0); // neutral, field_seq, frame_field, default_display
            assert!(r.read_flag()); // vui_timing_info_present_flag
            assert_eq!(r.read_bits(32), 1);
            assert_eq!(r.read_bits(32), 60);
            assert!(r.read_flag());
            assert_eq!(r.read_ue(), 0);
            assert!(!r.read_flag()); // vui_hrd_parameters_present_flag
            assert!(r.read_flag()); // bitstream_restriction_flag
            assert_eq!(r.read_bits(3), 0b011);
            assert_eq!([r.read_ue(), r.read_ue(), r.read_ue()], [0, 0, 0]);
            assert_eq!([r.read_ue(), r.read_ue()], [15, 15]);
            assert!(!r.read_flag()); // sps_extension_present_flag
            assert_trailing_bits(&mut r, &data);
        }

        #[test]
        fn test_sps_extended_sar() {
            let config =
                EncodeConfig::h265(1280, 720).with_sample_aspect_ratio(Rational::new(7, 5));
            let st = state(config);
            let vui = st.sps.vui.as_ref().unwrap();
            let mut w = BitWriter::new();
            write_vui(&mut w, vui);
            let data = w.finish();
            let mut r = BitReader::new(&data);
            assert!(r.read_flag());
            assert_eq!(r.read_bits(8), 255);
            assert_eq!(r.read_bits(16), 7);
            assert_eq!(r.read_bits(16), 5);
        }

        #[test]
        fn test_pps_syntax() {
            let st = state(EncodeConfig::h265(640, 480).with_quality_level(30));
            let data = rbsp(&NalUnit::Pps(st.pps.clone()), &mut AnnexBWriter::new());
            let mut r = BitReader::new(&data);

            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 0);
            assert!(!r.read_flag()); // dependent_slice_segments_enabled_flag
            assert!(!r.read_flag()); // output_flag_present_flag
            assert_eq!(r.read_bits(3), 0);
            assert!(!r.read_flag());
            assert!(!r.read_flag());
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_se(), st.pps.init_qp_minus26);
            assert!(!r.read_flag()); // constrained_intra_pred_flag
            assert!(!r.read_flag()); // transform_skip_enabled_flag
            assert!(!r.read_flag()); // cu_qp_delta_enabled_flag under constant QP
            assert_eq!(r.read_se(), 0);
            assert_eq!(r.read_se(), 0);
            assert_eq!(r.read_bits(6), 0);
            assert!(r.read_flag()); // pps_loop_filter_across_slices_enabled_flag
            assert!(!r.read_flag()); // deblocking_filter_control_present_flag
            assert!(!r.read_flag());
            assert!(!r.read_flag());
            assert_eq!(r.read_ue(), 0);
            assert!(!r.read_flag());
            assert!(!r.read_flag()); // pps_extension_present_flag
            assert_trailing_bits(&mut r, &data);
        }

        #[test]
        fn test_unsupported_pps_features_are_rejected() {
            let st = state(EncodeConfig::h265(640, 480));
            let mut pps = st.pps.clone();
            pps.tiles_enabled_flag = true;
            let result = AnnexBWriter::new().write_fragment(&[NalUnit::Pps(pps)]);
            assert!(matches!(result, Err(HevcError::InvalidInput(_))));
        }
    }

    mod slice_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        fn writer() -> (ParameterState, AnnexBWriter) {
            let st = state(EncodeConfig::h265(640, 480).with_b_frames(1));
            let writer = AnnexBWriter::with_parameter_sets(st.sps.clone(), st.pps.clone());
            (st, writer)
        }

        #[test]
        fn test_idr_slice_header() {
            let (_, mut writer) = writer();
            let mut header = slice_header(NalUnitType::IdrWRadl, SliceType::I);
            header.slice_qp_delta = -1;
            let data = rbsp(&NalUnit::Slice(header), &mut writer);
            let mut r = BitReader::new(&data);

            assert!(r.read_flag()); // first_slice_segment_in_pic_flag
            assert!(!r.read_flag()); // no_output_of_prior_pics_flag
            assert_eq!(r.read_ue(), 0); // slice_pic_parameter_set_id
            assert_eq!(r.read_ue(), 2); // slice_type I
            assert_eq!(r.read_se(), -1);
            assert!(r.read_flag()); // slice_loop_filter_across_slices_enabled_flag
            assert_trailing_bits(&mut r, &data);
        }

        #[test]
        fn test_b_slice_header_with_rps() {
            let (_, mut writer) = writer();
            let mut header = slice_header(NalUnitType::TrailN, SliceType::B);
            header.slice_pic_order_cnt_lsb = 4097 & 0xfff;
            header.short_term_ref_pic_set = Some(ReferencePictureSet {
                negative: vec![RpsEntry {
                    delta_poc_minus1: 0,
                    used_by_curr_pic: true,
                }],
                positive: vec![RpsEntry {
                    delta_poc_minus1: 1,
                    used_by_curr_pic: true,
                }],
            });
            header.slice_qp_delta = 5;
            let data = rbsp(&NalUnit::Slice(header), &mut writer);
            let mut r = BitReader::new(&data);

            assert!(r.read_flag());
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 0); // slice_type B
            assert_eq!(r.read_bits(12), 1);
            assert!(!r.read_flag()); // short_term_ref_pic_set_sps_flag
            assert_eq!(r.read_ue(), 1);
            assert_eq!(r.read_ue(), 1);
            assert_eq!(r.read_ue(), 0);
            assert!(r.read_flag());
            assert_eq!(r.read_ue(), 1);
            assert!(r.read_flag());
            assert!(!r.read_flag()); // num_ref_idx_active_override_flag
            assert!(!r.read_flag()); // mvd_l1_zero_flag
            assert_eq!(r.read_ue(), 0); // five_minus_max_num_merge_cand
            assert_eq!(r.read_se(), 5);
            assert!(r.read_flag());
            assert_trailing_bits(&mut r, &data);
        }

        #[test]
        fn test_cra_writes_no_output_of_prior_pics() {
            let (_, mut writer) = writer();
            let mut header = slice_header(NalUnitType::CraNut, SliceType::I);
            header.short_term_ref_pic_set = Some(ReferencePictureSet::default());
            let data = rbsp(&NalUnit::Slice(header), &mut writer);
            let mut r = BitReader::new(&data);
            assert!(r.read_flag());
            assert!(!r.read_flag()); // no_output_of_prior_pics_flag
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 2);
            assert_eq!(r.read_bits(12), 0);
            assert!(!r.read_flag());
            assert_eq!([r.read_ue(), r.read_ue()], [0, 0]);
        }

        #[test]
        fn test_non_idr_slice_requires_rps() {
            let (_, mut writer) = writer();
            let header = slice_header(NalUnitType::TrailR, SliceType::P);
            let result = writer.write_fragment(&[NalUnit::Slice(header)]);
            assert!(matches!(result, Err(HevcError::InvalidInput(_))));
        }

        #[test]
        fn test_sao_and_tmvp_fields_follow_sps() {
            let (st, _) = writer();
            let mut sps = st.sps.clone();
            sps.sample_adaptive_offset_enabled_flag = true;
            sps.sps_temporal_mvp_enabled_flag = true;
            let mut writer = AnnexBWriter::with_parameter_sets(sps, st.pps.clone());

            let mut header = slice_header(NalUnitType::TrailR, SliceType::P);
            header.short_term_ref_pic_set = Some(ReferencePictureSet {
                negative: vec![RpsEntry {
                    delta_poc_minus1: 0,
                    used_by_curr_pic: true,
                }],
                positive: vec![],
            });
            header.slice_temporal_mvp_enabled_flag = true;
            header.slice_sao_luma_flag = true;
            header.slice_sao_chroma_flag = true;
            let data = rbsp(&NalUnit::Slice(header), &mut writer);
            let mut r = BitReader::new(&data);

            assert!(r.read_flag());
            assert_eq!(r.read_ue(), 0);
            assert_eq!(r.read_ue(), 1); // slice_type P
            r.read_bits(12);
            assert!(!r.read_flag());
            assert_eq!([r.read_ue(), r.read_ue(), r.read_ue()], [1, 0, 0]);
            assert!(r.read_flag()); // used_by_curr_pic_s0_flag
            assert!(r.read_flag()); // slice_temporal_mvp_enabled_flag
            assert!(r.read_flag()); // slice_sao_luma_flag
            assert!(r.read_flag()); // slice_sao_chroma_flag
            assert!(!r.read_flag()); // num_ref_idx_active_override_flag
            // P slice with one active reference: no collocated fields.
            assert_eq!(r.read_ue(), 0);
        }
    }

    mod sei_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_sei_message_layout() {
            let messages = vec![
                SeiMessage::MasteringDisplayColourVolume(MasteringDisplayColourVolume {
                    display_primaries_x: [8500, 6550, 35400],
                    display_primaries_y: [39850, 2300, 14600],
                    white_point_x: 15635,
                    white_point_y: 16450,
                    max_display_mastering_luminance: 10_000_000,
                    min_display_mastering_luminance: 50,
                }),
                SeiMessage::ContentLightLevelInfo(ContentLightLevelInfo {
                    max_content_light_level: 1000,
                    max_pic_average_light_level: 400,
                }),
            ];
            let data = rbsp(&NalUnit::Sei(messages), &mut AnnexBWriter::new());
            let mut r = BitReader::new(&data);

            assert_eq!(r.read_bits(8), 137);
            assert_eq!(r.read_bits(8), 24);
            assert_eq!(r.read_bits(16), 8500);
            assert_eq!(r.read_bits(16), 39850);
            r.read_bits(16 * 4);
            assert_eq!(r.read_bits(16), 15635);
            assert_eq!(r.read_bits(16), 16450);
            assert_eq!(r.read_bits(32), 10_000_000);
            assert_eq!(r.read_bits(32), 50);

            assert_eq!(r.read_bits(8), 144);
            assert_eq!(r.read_bits(8), 4);
            assert_eq!(r.read_bits(16), 1000);
            assert_eq!(r.read_bits(16), 400);
            assert_eq!(r.read_bits(8), 0x80);
            assert_eq!(r.position(), data.len() * 8);
        }

        #[test]
        fn test_long_sei_lengths_use_ff_runs() {
            let mut w = BitWriter::new();
            write_sei_length(&mut w, 300);
            assert_eq!(w.finish(), vec![0xff, 45]);
        }

        #[test]
        fn test_empty_sei_is_rejected() {
            let result = AnnexBWriter::new().write_fragment(&[NalUnit::Sei(Vec::new())]);
            assert!(matches!(result, Err(HevcError::InvalidInput(_))));
        }
    }
}
