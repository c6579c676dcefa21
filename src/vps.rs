use crate::bitwriter::BitWriter;
use crate::eg::write_ue;
use crate::Result;

/// profile_tier_level() shared by the VPS and SPS. Main profile only.
#[derive(Debug, Clone)]
pub struct ProfileTierLevel {
    pub general_profile_idc: u8,
    pub general_tier_flag: bool,
    pub general_level_idc: u8,
}

impl Default for ProfileTierLevel {
    fn default() -> Self {
        Self {
            general_profile_idc: 1, // Main
            general_tier_flag: false,
            general_level_idc: 120, // level 4.0
        }
    }
}

impl ProfileTierLevel {
    pub fn write(&self, bw: &mut BitWriter) -> Result<()> {
        bw.write_bits(2, 0)?; // general_profile_space
        bw.write_flag(self.general_tier_flag);
        bw.write_bits(5, self.general_profile_idc as u32)?;

        // general_profile_compatibility_flag[32]; Main implies Main10
        let mut compat = 0u32;
        compat |= 1u32 << (31 - self.general_profile_idc as u32);
        compat |= 1u32 << (31 - 2);
        bw.write_bits(32, compat)?;

        bw.write_flag(true); // general_progressive_source_flag
        bw.write_flag(false); // general_interlaced_source_flag
        bw.write_flag(false); // general_non_packed_constraint_flag
        bw.write_flag(true); // general_frame_only_constraint_flag
        bw.write_bits(22, 0)?; // general_reserved_zero_44bits
        bw.write_bits(22, 0)?;
        bw.write_u8(self.general_level_idc);
        Ok(())
    }
}

/// video_parameter_set_rbsp(), single layer, no sub-layers.
#[derive(Debug, Clone, Default)]
pub struct Vps {
    pub vps_video_parameter_set_id: u8,
    pub ptl: ProfileTierLevel,
    pub vps_max_dec_pic_buffering_minus1: u32,
    pub vps_max_num_reorder_pics: u32,
}

impl Vps {
    pub fn write(&self, bw: &mut BitWriter) -> Result<()> {
        bw.write_bits(4, self.vps_video_parameter_set_id as u32)?;
        bw.write_flag(true); // vps_base_layer_internal_flag
        bw.write_flag(true); // vps_base_layer_available_flag
        bw.write_bits(6, 0)?; // vps_max_layers_minus1
        bw.write_bits(3, 0)?; // vps_max_sub_layers_minus1
        bw.write_flag(true); // vps_temporal_id_nesting_flag
        bw.write_u16(0xffff); // vps_reserved_0xffff_16bits

        self.ptl.write(bw)?;

        bw.write_flag(false); // vps_sub_layer_ordering_info_present_flag
        write_ue(bw, self.vps_max_dec_pic_buffering_minus1);
        write_ue(bw, self.vps_max_num_reorder_pics);
        write_ue(bw, 0); // vps_max_latency_increase_plus1

        bw.write_bits(6, 0)?; // vps_max_layer_id
        write_ue(bw, 0); // vps_num_layer_sets_minus1
        bw.write_flag(false); // vps_timing_info_present_flag
        bw.write_flag(false); // vps_extension_flag

        bw.rbsp_trailing_bits();
        Ok(())
    }
}
