use crate::cabac::{Bin, CabacCoder, RdoScratch};
use crate::picture::Picture;
use crate::slice::Slice;

/// Position of one CTU within the picture grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtuInfo {
    pub addr: usize,
    pub row: usize,
    pub col: usize,
    pub size: usize,
}

/// The analyzer's decisions for one CTU: the symbol stream the final pass
/// replays, plus the rate control hook fields (kept per CTU but not
/// aggregated here).
#[derive(Debug, Clone, Default)]
pub struct CtuRecord {
    pub bins: Vec<Bin>,
    pub total_bits: u32,
    pub total_cost: f64,
    pub total_distortion: u64,
    pub mv: [i16; 2],
}

/// The CTU-level encoder. Supplied at frame encoder construction; the
/// wavefront calls `analyze` once per CTU and the final pass calls
/// `encode` once per CTU in raster order.
///
/// `analyze` must run the returned symbol stream through `coder` so that
/// the row's context state evolves exactly as the final pass will replay
/// it, and must write the reconstructed samples of its own CTU rows into
/// `pic.recon`.
pub trait CtuAnalyzer: Send + Sync {
    fn analyze(
        &self,
        ctu: &CtuInfo,
        pic: &Picture,
        slice: &Slice,
        coder: &mut CabacCoder,
        rdo: &mut RdoScratch,
    ) -> CtuRecord;

    fn encode(&self, record: &CtuRecord, coder: &mut CabacCoder) {
        coder.replay(&record.bins);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabac::CTX_ANALYZER_BASE;
    use crate::slice::SliceType;

    struct ReplayOnly;

    impl CtuAnalyzer for ReplayOnly {
        fn analyze(
            &self,
            _ctu: &CtuInfo,
            _pic: &Picture,
            _slice: &Slice,
            _coder: &mut CabacCoder,
            _rdo: &mut RdoScratch,
        ) -> CtuRecord {
            CtuRecord::default()
        }
    }

    #[test]
    fn test_default_encode_replays_bins() {
        let record = CtuRecord {
            bins: vec![
                Bin::Ctx { idx: CTX_ANALYZER_BASE as u16, bin: 1 },
                Bin::Bypass { bin: 0 },
                Bin::BypassBits { value: 0x5a, count: 8 },
            ],
            ..Default::default()
        };

        let run = |f: &dyn Fn(&mut CabacCoder)| {
            let mut coder = CabacCoder::new(30, SliceType::I);
            f(&mut coder);
            coder.encode_bin_trm(1);
            coder.finish();
            coder.take_bytes()
        };

        let via_trait = run(&|coder| ReplayOnly.encode(&record, coder));
        let via_replay = run(&|coder| coder.replay(&record.bins));
        assert_eq!(via_trait, via_replay);
    }
}
