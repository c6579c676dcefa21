use crate::bitwriter::BitWriter;
use crate::config::EncoderConfig;
use crate::eg::write_ue;
use crate::vps::ProfileTierLevel;
use crate::Result;

/// seq_parameter_set_rbsp() for the Main profile: 4:2:0, one sub-layer,
/// no scaling lists, no PCM, no long-term references.
#[derive(Debug, Clone)]
pub struct Sps {
    pub sps_video_parameter_set_id: u8,
    pub sps_seq_parameter_set_id: u8,
    pub ptl: ProfileTierLevel,

    pub chroma_format_idc: u8,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub conf_win_right_offset: u32,
    pub conf_win_bottom_offset: u32,

    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,

    pub sps_max_dec_pic_buffering_minus1: u32,
    pub sps_max_num_reorder_pics: u32,

    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_luma_transform_block_size_minus2: u8,
    pub log2_diff_max_min_luma_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,

    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub sps_temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
}

impl Sps {
    pub fn from_config(cfg: &EncoderConfig) -> Self {
        let ctu = cfg.ctu_size as u32;
        let padded_width = (cfg.width_in_ctu() * cfg.ctu_size) as u32;
        let padded_height = (cfg.height_in_ctu() * cfg.ctu_size) as u32;

        // CTU geometry: min CU is 8x8, so the CTU size decides the
        // max/min split range.
        let log2_ctu = ctu.trailing_zeros() as u8;

        Self {
            sps_video_parameter_set_id: 0,
            sps_seq_parameter_set_id: 0,
            ptl: ProfileTierLevel::default(),
            chroma_format_idc: 1,
            pic_width_in_luma_samples: padded_width,
            pic_height_in_luma_samples: padded_height,
            conf_win_right_offset: (padded_width - cfg.width as u32) / 2,
            conf_win_bottom_offset: (padded_height - cfg.height as u32) / 2,
            bit_depth_luma_minus8: cfg.bit_depth - 8,
            bit_depth_chroma_minus8: cfg.bit_depth - 8,
            log2_max_pic_order_cnt_lsb_minus4: 4,
            sps_max_dec_pic_buffering_minus1: 4,
            sps_max_num_reorder_pics: 2,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: log2_ctu - 3,
            log2_min_luma_transform_block_size_minus2: 0,
            log2_diff_max_min_luma_transform_block_size: 3,
            max_transform_hierarchy_depth_inter: 2,
            max_transform_hierarchy_depth_intra: 2,
            amp_enabled_flag: false,
            sample_adaptive_offset_enabled_flag: cfg.sao,
            sps_temporal_mvp_enabled_flag: true,
            strong_intra_smoothing_enabled_flag: true,
        }
    }

    pub fn write(&self, bw: &mut BitWriter) -> Result<()> {
        bw.write_bits(4, self.sps_video_parameter_set_id as u32)?;
        bw.write_bits(3, 0)?; // sps_max_sub_layers_minus1
        bw.write_flag(true); // sps_temporal_id_nesting_flag

        self.ptl.write(bw)?;

        write_ue(bw, self.sps_seq_parameter_set_id as u32);
        write_ue(bw, self.chroma_format_idc as u32);
        write_ue(bw, self.pic_width_in_luma_samples);
        write_ue(bw, self.pic_height_in_luma_samples);

        let cropped = self.conf_win_right_offset != 0 || self.conf_win_bottom_offset != 0;
        bw.write_flag(cropped); // conformance_window_flag
        if cropped {
            write_ue(bw, 0); // conf_win_left_offset
            write_ue(bw, self.conf_win_right_offset);
            write_ue(bw, 0); // conf_win_top_offset
            write_ue(bw, self.conf_win_bottom_offset);
        }

        write_ue(bw, self.bit_depth_luma_minus8 as u32);
        write_ue(bw, self.bit_depth_chroma_minus8 as u32);
        write_ue(bw, self.log2_max_pic_order_cnt_lsb_minus4 as u32);

        bw.write_flag(false); // sps_sub_layer_ordering_info_present_flag
        write_ue(bw, self.sps_max_dec_pic_buffering_minus1);
        write_ue(bw, self.sps_max_num_reorder_pics);
        write_ue(bw, 0); // sps_max_latency_increase_plus1

        write_ue(bw, self.log2_min_luma_coding_block_size_minus3 as u32);
        write_ue(bw, self.log2_diff_max_min_luma_coding_block_size as u32);
        write_ue(bw, self.log2_min_luma_transform_block_size_minus2 as u32);
        write_ue(bw, self.log2_diff_max_min_luma_transform_block_size as u32);
        write_ue(bw, self.max_transform_hierarchy_depth_inter as u32);
        write_ue(bw, self.max_transform_hierarchy_depth_intra as u32);

        bw.write_flag(false); // scaling_list_enabled_flag
        bw.write_flag(self.amp_enabled_flag);
        bw.write_flag(self.sample_adaptive_offset_enabled_flag);
        bw.write_flag(false); // pcm_enabled_flag

        write_ue(bw, 0); // num_short_term_ref_pic_sets
        bw.write_flag(false); // long_term_ref_pics_present_flag
        bw.write_flag(self.sps_temporal_mvp_enabled_flag);
        bw.write_flag(self.strong_intra_smoothing_enabled_flag);
        bw.write_flag(false); // vui_parameters_present_flag
        bw.write_flag(false); // sps_extension_present_flag

        bw.rbsp_trailing_bits();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sps_pads_picture_to_ctu_grid() {
        let cfg = EncoderConfig::new(130, 70);
        let sps = Sps::from_config(&cfg);

        assert_eq!(sps.pic_width_in_luma_samples, 192);
        assert_eq!(sps.pic_height_in_luma_samples, 128);
        assert_eq!(sps.conf_win_right_offset, 31);
        assert_eq!(sps.conf_win_bottom_offset, 29);
    }

    #[test]
    fn test_sps_ctu_geometry() {
        let mut cfg = EncoderConfig::new(128, 128);
        cfg.ctu_size = 32;
        let sps = Sps::from_config(&cfg);
        assert_eq!(sps.log2_diff_max_min_luma_coding_block_size, 2);
    }

    #[test]
    fn test_sps_write_is_byte_aligned() {
        let cfg = EncoderConfig::new(128, 128);
        let sps = Sps::from_config(&cfg);

        let mut bw = BitWriter::new();
        sps.write(&mut bw).unwrap();
        assert!(bw.byte_aligned());
        assert!(!bw.as_bytes().is_empty());
    }
}
