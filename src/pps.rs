use crate::bitwriter::BitWriter;
use crate::config::EncoderConfig;
use crate::eg::{write_se, write_ue};
use crate::Result;

/// pic_parameter_set_rbsp(). Entropy coding sync is the wavefront switch;
/// tiles and dependent slice segments are never signalled.
#[derive(Debug, Clone)]
pub struct Pps {
    pub pps_pic_parameter_set_id: u8,
    pub pps_seq_parameter_set_id: u8,

    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub init_qp_minus26: i8,

    pub transform_skip_enabled_flag: bool,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,

    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub pps_loop_filter_across_slices_enabled_flag: bool,

    pub deblocking_filter_control_present_flag: bool,
    pub deblocking_filter_override_enabled_flag: bool,
    pub pps_deblocking_filter_disabled_flag: bool,
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
}

impl Pps {
    pub fn from_config(cfg: &EncoderConfig) -> Self {
        Self {
            pps_pic_parameter_set_id: 0,
            pps_seq_parameter_set_id: 0,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            init_qp_minus26: (cfg.qp.round() as i32 - 26).clamp(-26, 25) as i8,
            transform_skip_enabled_flag: false,
            pps_cb_qp_offset: cfg.cb_qp_offset as i8,
            pps_cr_qp_offset: cfg.cr_qp_offset as i8,
            weighted_pred_flag: cfg.weighted_pred,
            weighted_bipred_flag: cfg.weighted_bipred,
            transquant_bypass_enabled_flag: cfg.lossless,
            entropy_coding_sync_enabled_flag: cfg.wavefront,
            pps_loop_filter_across_slices_enabled_flag: true,
            deblocking_filter_control_present_flag: true,
            deblocking_filter_override_enabled_flag: !cfg.loop_filter_offset_in_pps,
            pps_deblocking_filter_disabled_flag: !cfg.deblocking,
            pps_beta_offset_div2: cfg.deblocking_beta_offset as i8,
            pps_tc_offset_div2: cfg.deblocking_tc_offset as i8,
        }
    }

    pub fn write(&self, bw: &mut BitWriter) -> Result<()> {
        write_ue(bw, self.pps_pic_parameter_set_id as u32);
        write_ue(bw, self.pps_seq_parameter_set_id as u32);

        bw.write_flag(false); // dependent_slice_segments_enabled_flag
        bw.write_flag(false); // output_flag_present_flag
        bw.write_bits(3, 0)?; // num_extra_slice_header_bits
        bw.write_flag(false); // sign_data_hiding_enabled_flag
        bw.write_flag(false); // cabac_init_present_flag

        write_ue(bw, self.num_ref_idx_l0_default_active_minus1 as u32);
        write_ue(bw, self.num_ref_idx_l1_default_active_minus1 as u32);
        write_se(bw, self.init_qp_minus26 as i32);

        bw.write_flag(false); // constrained_intra_pred_flag
        bw.write_flag(self.transform_skip_enabled_flag);
        bw.write_flag(false); // cu_qp_delta_enabled_flag

        write_se(bw, self.pps_cb_qp_offset as i32);
        write_se(bw, self.pps_cr_qp_offset as i32);
        bw.write_flag(false); // pps_slice_chroma_qp_offsets_present_flag

        bw.write_flag(self.weighted_pred_flag);
        bw.write_flag(self.weighted_bipred_flag);
        bw.write_flag(self.transquant_bypass_enabled_flag);
        bw.write_flag(false); // tiles_enabled_flag
        bw.write_flag(self.entropy_coding_sync_enabled_flag);
        bw.write_flag(self.pps_loop_filter_across_slices_enabled_flag);

        bw.write_flag(self.deblocking_filter_control_present_flag);
        if self.deblocking_filter_control_present_flag {
            bw.write_flag(self.deblocking_filter_override_enabled_flag);
            bw.write_flag(self.pps_deblocking_filter_disabled_flag);
            if !self.pps_deblocking_filter_disabled_flag {
                write_se(bw, self.pps_beta_offset_div2 as i32);
                write_se(bw, self.pps_tc_offset_div2 as i32);
            }
        }

        bw.write_flag(false); // pps_scaling_list_data_present_flag
        bw.write_flag(false); // lists_modification_present_flag
        write_ue(bw, 0); // log2_parallel_merge_level_minus2
        bw.write_flag(false); // slice_segment_header_extension_present_flag
        bw.write_flag(false); // pps_extension_present_flag

        bw.rbsp_trailing_bits();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pps_wavefront_flag_follows_config() {
        let mut cfg = EncoderConfig::new(128, 128);
        cfg.wavefront = true;
        assert!(Pps::from_config(&cfg).entropy_coding_sync_enabled_flag);

        cfg.wavefront = false;
        assert!(!Pps::from_config(&cfg).entropy_coding_sync_enabled_flag);
    }

    #[test]
    fn test_pps_init_qp_clamped() {
        let mut cfg = EncoderConfig::new(128, 128);
        cfg.qp = 51.0;
        assert_eq!(Pps::from_config(&cfg).init_qp_minus26, 25);
    }

    #[test]
    fn test_pps_write_is_byte_aligned() {
        let cfg = EncoderConfig::new(128, 128);
        let mut bw = BitWriter::new();
        Pps::from_config(&cfg).write(&mut bw).unwrap();
        assert!(bw.byte_aligned());
    }
}
