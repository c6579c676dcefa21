use crate::{Error, Result};

/// Scaling list handling. Custom lists are signalled in the parameter sets
/// and are not supported by this encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingListMode {
    Off,
    Default,
    Custom(u32),
}

/// One entry of the GOP structure table, in encode order.
#[derive(Debug, Clone)]
pub struct GopEntry {
    pub poc_offset: usize,
    pub qp_offset: f64,
    pub qp_factor: f64,
}

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: usize,
    pub height: usize,
    pub ctu_size: usize,
    pub bit_depth: u8,

    /// Base QP from the rate controller.
    pub qp: f64,
    /// Optional per-POC QP override.
    pub dqp: Option<Vec<i32>>,

    pub gop_size: usize,
    pub gop_entries: Vec<GopEntry>,
    pub lambda_modifier: f64,

    pub wavefront: bool,
    /// Worker threads for the wavefront. Zero forces the sequential path.
    pub workers: usize,

    pub sao: bool,
    pub sao_chroma: bool,
    /// SAO LCU boundary optimization; widens the loop filter lag to two rows.
    pub sao_lcu_boundary: bool,

    pub deblocking: bool,
    pub deblocking_beta_offset: i32,
    pub deblocking_tc_offset: i32,
    pub loop_filter_offset_in_pps: bool,

    pub lossless: bool,
    pub scaling_list_mode: ScalingListMode,

    pub adaptive_search_range: bool,
    pub search_range: i32,
    pub asr_scale: i32,

    pub weighted_pred: bool,
    pub weighted_bipred: bool,

    pub cb_qp_offset: i32,
    pub cr_qp_offset: i32,
    pub max_num_merge_cand: u32,

    pub active_parameter_sets_sei: bool,
    pub display_orientation_angle: u32,
    pub recovery_point_sei: bool,
    pub gradual_decoding_refresh: bool,
}

impl EncoderConfig {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            ctu_size: 64,
            bit_depth: 8,
            qp: 26.0,
            dqp: None,
            gop_size: 4,
            gop_entries: vec![
                GopEntry { poc_offset: 4, qp_offset: 1.0, qp_factor: 0.4624 },
                GopEntry { poc_offset: 2, qp_offset: 2.0, qp_factor: 0.4624 },
                GopEntry { poc_offset: 1, qp_offset: 3.0, qp_factor: 0.68 },
                GopEntry { poc_offset: 3, qp_offset: 3.0, qp_factor: 0.68 },
            ],
            lambda_modifier: 1.0,
            wavefront: true,
            workers: 2,
            sao: true,
            sao_chroma: true,
            sao_lcu_boundary: false,
            deblocking: true,
            deblocking_beta_offset: 0,
            deblocking_tc_offset: 0,
            loop_filter_offset_in_pps: false,
            lossless: false,
            scaling_list_mode: ScalingListMode::Off,
            adaptive_search_range: false,
            search_range: 60,
            asr_scale: 1,
            weighted_pred: false,
            weighted_bipred: false,
            cb_qp_offset: 0,
            cr_qp_offset: 0,
            max_num_merge_cand: 5,
            active_parameter_sets_sei: false,
            display_orientation_angle: 0,
            recovery_point_sei: false,
            gradual_decoding_refresh: false,
        }
    }

    pub fn width_in_ctu(&self) -> usize {
        self.width.div_ceil(self.ctu_size)
    }

    pub fn height_in_ctu(&self) -> usize {
        self.height.div_ceil(self.ctu_size)
    }

    pub fn gop_entry(&self, gop_index: usize) -> &GopEntry {
        &self.gop_entries[gop_index % self.gop_entries.len()]
    }

    /// Loop filter lag behind the encode wavefront, in rows.
    pub fn row_delay(&self) -> usize {
        if self.sao && self.sao_lcu_boundary {
            2
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let ScalingListMode::Custom(mode) = self.scaling_list_mode {
            return Err(Error::UnsupportedScalingList(mode));
        }

        if self.width == 0 || self.height == 0 || self.height_in_ctu() == 0 {
            return Err(Error::EmptyPicture);
        }

        if !self.ctu_size.is_power_of_two() || !(16..=64).contains(&self.ctu_size) {
            return Err(Error::ConfigError(format!(
                "unsupported CTU size {}",
                self.ctu_size
            )));
        }

        if !self.wavefront && self.width % self.ctu_size != 0 {
            return Err(Error::ConfigError(
                "width must be a multiple of the CTU size without wavefront".into(),
            ));
        }

        if self.gop_size == 0 || self.gop_entries.is_empty() {
            return Err(Error::ConfigError("empty GOP structure".into()));
        }

        if self.adaptive_search_range && self.search_range < 8 {
            return Err(Error::ConfigError(format!(
                "adaptive search range needs a base range of at least 8, got {}",
                self.search_range
            )));
        }

        if !(1..=5).contains(&self.max_num_merge_cand) {
            return Err(Error::ConfigError(format!(
                "invalid merge candidate count {}",
                self.max_num_merge_cand
            )));
        }

        Ok(())
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        // Small, widely decodable configuration
        Self::new(320, 240)
    }
}
