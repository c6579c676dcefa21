use crate::bitwriter::BitWriter;
use crate::config::EncoderConfig;
use crate::eg::{write_se, write_ue};
use crate::nal::NalUnitType;
use crate::picture::MotionReference;
use crate::pps::Pps;
use crate::sps::Sps;
use crate::wp::WeightParam;
use crate::{Error, Result};

pub const MAX_QP: i32 = 51;
const SHIFT_QP: f64 = 12.0;

/// HEVC slice_type values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    B = 0,
    P = 1,
    I = 2,
}

impl SliceType {
    pub fn is_intra(&self) -> bool {
        matches!(self, SliceType::I)
    }

    pub fn is_inter_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    pub fn is_inter_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    pub fn cabac_init_type(&self) -> usize {
        match self {
            SliceType::I => 0,
            SliceType::P => 1,
            SliceType::B => 2,
        }
    }
}

/// Chroma QP mapping (Table 8-10): identity below 30, compressed through
/// the knee, then qPi - 6.
const CHROMA_SCALE: [i32; 58] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19,
    20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 29, 30, 31, 32, 33, 33, 34, 34,
    35, 35, 36, 36, 37, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49,
    50, 51,
];

fn clip3_f64(min: f64, max: f64, v: f64) -> f64 {
    v.clamp(min, max)
}

/// Hierarchical-B depth of a picture within its GOP: binary subdivision of
/// the GOP until the entry's offset is hit. Only the offset that opens a
/// level descends into it; a trailing multiple of the level stays at the
/// depth of the level above.
pub fn gop_depth(poc: i32, gop_size: usize) -> u32 {
    let gop_size = gop_size as i32;
    let poc = poc % gop_size;
    let mut depth = 0;

    if poc != 0 {
        let mut step = gop_size;
        let mut i = step >> 1;
        while i >= 1 {
            let mut j = i;
            while j < gop_size {
                if j == poc {
                    if j == i {
                        depth += 1;
                    }
                    return depth;
                }
                j += step;
            }
            step >>= 1;
            depth += 1;
            i >>= 1;
        }
    }

    depth
}

/// One slice covering the whole picture. Created fresh per frame by the
/// frame encoder; carries the QP/lambda decisions, the loop filter
/// configuration and the per-substream accounting filled in by the final
/// coding pass.
#[derive(Debug, Clone, Default)]
pub struct Slice {
    pub slice_type: SliceType,
    pub poc: i32,
    pub depth: u32,
    pub qp: i32,
    pub lambda_luma: f64,
    pub lambda_chroma: f64,
    pub cb_distortion_weight: f64,
    pub cr_distortion_weight: f64,

    pub sao_luma: bool,
    pub sao_chroma: bool,

    pub deblocking_filter_disable: bool,
    pub deblocking_override: bool,
    pub beta_offset_div2: i32,
    pub tc_offset_div2: i32,

    pub max_num_merge_cand: u32,

    pub ref_pocs_l0: Vec<i32>,
    pub ref_pocs_l1: Vec<i32>,
    pub search_range_l0: Vec<i32>,
    pub search_range_l1: Vec<i32>,
    pub wp_l0: Vec<WeightParam>,
    pub wp_l1: Vec<WeightParam>,
    pub wp_enabled: bool,
    pub mrefs_l0: Vec<MotionReference>,
    pub mrefs_l1: Vec<MotionReference>,

    /// Per-substream bit lengths (emulation bytes included, in bits),
    /// recorded by the final pass for all but the last substream.
    pub substream_sizes: Vec<u32>,
}

impl Default for SliceType {
    fn default() -> Self {
        SliceType::I
    }
}

impl Slice {
    /// Slice, QP and lambda initialization for one picture.
    pub fn initialize(
        cfg: &EncoderConfig,
        slice_type: SliceType,
        poc: i32,
        gop_index: usize,
        ref_pocs_l0: Vec<i32>,
        ref_pocs_l1: Vec<i32>,
    ) -> Result<Self> {
        let depth = gop_depth(poc, cfg.gop_size);
        let gop_entry = cfg.gop_entry(gop_index);

        let mut qpdouble = cfg.qp;
        if !slice_type.is_intra() {
            if cfg.lossless && gop_entry.qp_offset != 0.0 {
                return Err(Error::LosslessQpOffset);
            }
            qpdouble += gop_entry.qp_offset;
        }

        // TODO: Remove dQP?
        if let Some(dqps) = &cfg.dqp {
            qpdouble += dqps.get(poc as usize).copied().unwrap_or(0) as f64;
        }

        let num_b_frames = (cfg.gop_size - 1) as f64;
        let lambda_scale = 1.0 - clip3_f64(0.0, 0.5, 0.05 * num_b_frames);
        let bd_shift = (6 * (cfg.bit_depth as i32 - 8)) as f64;
        let qp_temp = qpdouble + bd_shift - SHIFT_QP;

        let qp_factor = if slice_type.is_intra() {
            0.57 * lambda_scale
        } else {
            gop_entry.qp_factor
        };
        let mut lambda = qp_factor * (qp_temp / 3.0).exp2();

        if depth > 0 {
            lambda *= clip3_f64(2.0, 4.0, qp_temp / 6.0);
        }

        let qp_bd_offset_y = 6 * (cfg.bit_depth as i32 - 8);
        let qp = ((qpdouble + 0.5).floor() as i32).clamp(-qp_bd_offset_y, MAX_QP);

        if !slice_type.is_intra() {
            lambda *= cfg.lambda_modifier;
        }

        // Chroma bits are not rate-separated from luma; chroma distortion is
        // weighted instead, and the chroma lambda follows from the weight.
        let qpc = (qp + cfg.cb_qp_offset).clamp(0, 57);
        let cb_distortion_weight = (((qp - CHROMA_SCALE[qpc as usize]) as f64) / 3.0).exp2();
        let qpc = (qp + cfg.cr_qp_offset).clamp(0, 57);
        let cr_distortion_weight = (((qp - CHROMA_SCALE[qpc as usize]) as f64) / 3.0).exp2();

        Ok(Slice {
            slice_type,
            poc,
            depth,
            qp,
            lambda_luma: lambda,
            lambda_chroma: lambda / cr_distortion_weight,
            cb_distortion_weight,
            cr_distortion_weight,
            sao_luma: cfg.sao,
            sao_chroma: cfg.sao_chroma,
            deblocking_filter_disable: !cfg.deblocking,
            deblocking_override: !cfg.loop_filter_offset_in_pps,
            beta_offset_div2: if cfg.deblocking { cfg.deblocking_beta_offset } else { 0 },
            tc_offset_div2: if cfg.deblocking { cfg.deblocking_tc_offset } else { 0 },
            max_num_merge_cand: cfg.max_num_merge_cand,
            ref_pocs_l0,
            ref_pocs_l1,
            ..Default::default()
        })
    }

    pub fn nal_unit_type(&self) -> NalUnitType {
        if self.slice_type.is_intra() {
            if self.poc == 0 {
                NalUnitType::IdrWRadl
            } else {
                NalUnitType::CraNut
            }
        } else {
            NalUnitType::TrailR
        }
    }

    pub fn num_ref_idx(&self, list: usize) -> usize {
        if list == 0 {
            self.ref_pocs_l0.len()
        } else {
            self.ref_pocs_l1.len()
        }
    }

    /// slice_segment_header() up to (not including) the entry point
    /// offsets. The entry points are appended after the final coding pass
    /// once the substream sizes are known.
    pub fn write_header(&self, bw: &mut BitWriter, sps: &Sps, pps: &Pps) -> Result<()> {
        let nal_type = self.nal_unit_type();

        bw.write_flag(true); // first_slice_segment_in_pic_flag
        if nal_type.is_irap() {
            bw.write_flag(false); // no_output_of_prior_pics_flag
        }
        write_ue(bw, pps.pps_pic_parameter_set_id as u32);
        write_ue(bw, self.slice_type as u32);

        if !nal_type.is_idr() {
            let max_poc_lsb_bits = sps.log2_max_pic_order_cnt_lsb_minus4 as u32 + 4;
            let poc_lsb = (self.poc as u32) & ((1u32 << max_poc_lsb_bits) - 1);
            bw.write_bits(max_poc_lsb_bits, poc_lsb)?;

            bw.write_flag(false); // short_term_ref_pic_set_sps_flag
            self.write_short_term_rps(bw)?;

            if sps.sps_temporal_mvp_enabled_flag {
                bw.write_flag(false); // slice_temporal_mvp_enabled_flag
            }
        }

        if sps.sample_adaptive_offset_enabled_flag {
            bw.write_flag(self.sao_luma);
            bw.write_flag(self.sao_chroma);
        }

        if !self.slice_type.is_intra() {
            bw.write_flag(true); // num_ref_idx_active_override_flag
            write_ue(bw, self.ref_pocs_l0.len().saturating_sub(1) as u32);
            if self.slice_type.is_inter_b() {
                write_ue(bw, self.ref_pocs_l1.len().saturating_sub(1) as u32);
            }

            if self.slice_type.is_inter_b() {
                bw.write_flag(false); // mvd_l1_zero_flag
            }

            let wp_present = (self.slice_type.is_inter_p() && pps.weighted_pred_flag)
                || (self.slice_type.is_inter_b() && pps.weighted_bipred_flag);
            if wp_present {
                self.write_pred_weight_table(bw);
            }

            write_ue(bw, 5 - self.max_num_merge_cand);
        }

        write_se(bw, self.qp - 26 - pps.init_qp_minus26 as i32);

        if pps.deblocking_filter_control_present_flag {
            if pps.deblocking_filter_override_enabled_flag {
                bw.write_flag(self.deblocking_override);
            }
            if self.deblocking_override {
                bw.write_flag(self.deblocking_filter_disable);
                if !self.deblocking_filter_disable {
                    write_se(bw, self.beta_offset_div2);
                    write_se(bw, self.tc_offset_div2);
                }
            }
        }

        if pps.pps_loop_filter_across_slices_enabled_flag
            && (self.sao_luma || self.sao_chroma || !self.deblocking_filter_disable)
        {
            bw.write_flag(true); // slice_loop_filter_across_slices_enabled_flag
        }

        Ok(())
    }

    /// st_ref_pic_set() for stRpsIdx == num_short_term_ref_pic_sets: the
    /// inline set carried in the slice header.
    fn write_short_term_rps(&self, bw: &mut BitWriter) -> Result<()> {
        let mut negative: Vec<i32> = self
            .ref_pocs_l0
            .iter()
            .chain(self.ref_pocs_l1.iter())
            .copied()
            .filter(|&p| p < self.poc)
            .collect();
        negative.sort_unstable_by(|a, b| b.cmp(a));
        negative.dedup();

        let mut positive: Vec<i32> = self
            .ref_pocs_l0
            .iter()
            .chain(self.ref_pocs_l1.iter())
            .copied()
            .filter(|&p| p > self.poc)
            .collect();
        positive.sort_unstable();
        positive.dedup();

        write_ue(bw, negative.len() as u32);
        write_ue(bw, positive.len() as u32);

        let mut prev = self.poc;
        for &poc in &negative {
            write_ue(bw, (prev - poc - 1) as u32); // delta_poc_s0_minus1
            bw.write_flag(true); // used_by_curr_pic_s0_flag
            prev = poc;
        }

        let mut prev = self.poc;
        for &poc in &positive {
            write_ue(bw, (poc - prev - 1) as u32); // delta_poc_s1_minus1
            bw.write_flag(true); // used_by_curr_pic_s1_flag
            prev = poc;
        }

        Ok(())
    }

    fn write_pred_weight_table(&self, bw: &mut BitWriter) {
        let denom = self
            .wp_l0
            .iter()
            .chain(self.wp_l1.iter())
            .map(|w| w.log2_denom)
            .next()
            .unwrap_or(WeightParam::DEFAULT_DENOM);

        write_ue(bw, denom);
        write_se(bw, 0); // delta_chroma_log2_weight_denom

        let mut lists: Vec<&[WeightParam]> = vec![&self.wp_l0];
        if self.slice_type.is_inter_b() {
            lists.push(&self.wp_l1);
        }

        for list in lists {
            for wp in list.iter() {
                bw.write_flag(self.wp_enabled && wp.enabled);
            }
            for _ in list.iter() {
                bw.write_flag(false); // chroma_weight_lX_flag
            }
            for wp in list.iter() {
                if self.wp_enabled && wp.enabled {
                    write_se(bw, wp.weight - (1 << denom));
                    write_se(bw, wp.offset);
                }
            }
        }
    }

    /// Entry point offsets: byte sizes of every substream but the last,
    /// inclusive of emulation prevention bytes.
    pub fn write_entry_points(&self, bw: &mut BitWriter) -> Result<()> {
        let offsets: Vec<u32> = self
            .substream_sizes
            .iter()
            .map(|&bits| bits >> 3)
            .collect();

        write_ue(bw, offsets.len() as u32);
        if !offsets.is_empty() {
            let max = offsets.iter().copied().max().unwrap_or(1).max(1);
            let offset_len = 32 - (max - 1).leading_zeros().min(31);
            let offset_len = offset_len.max(1);
            write_ue(bw, offset_len - 1);
            for &offset in &offsets {
                bw.write_bits(offset_len, offset - 1)?;
            }
        }
        Ok(())
    }
}
