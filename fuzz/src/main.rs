use afl::*;

use std::sync::Arc;

use h265_encoder::cabac::CTX_ANALYZER_BASE;
use h265_encoder::{
    Bin, CabacCoder, CtuAnalyzer, CtuInfo, CtuRecord, EncoderConfig, FrameEncoder, NoopKernels,
    Picture, RdoScratch, Slice, SliceType,
};

struct FuzzAnalyzer;

impl CtuAnalyzer for FuzzAnalyzer {
    fn analyze(
        &self,
        ctu: &CtuInfo,
        pic: &Picture,
        _slice: &Slice,
        coder: &mut CabacCoder,
        _rdo: &mut RdoScratch,
    ) -> CtuRecord {
        let sample = {
            let stripe = pic.orig.stripe(ctu.row);
            stripe.get(ctu.col * ctu.size).copied().unwrap_or(0)
        };

        let bins = vec![
            Bin::Ctx { idx: (CTX_ANALYZER_BASE + ctu.addr % 8) as u16, bin: sample & 1 },
            Bin::BypassBits { value: sample as u32, count: 8 },
        ];
        coder.replay(&bins);
        CtuRecord { bins, ..Default::default() }
    }
}

fn main() {
    fuzz!(|data: &[u8]| {
        if data.len() < 8 {
            return;
        }

        let mut cfg = EncoderConfig::new(
            16 * (1 + (data[0] as usize % 4)),
            16 * (1 + (data[1] as usize % 4)),
        );
        cfg.ctu_size = 16;
        cfg.qp = (data[2] % 52) as f64;
        cfg.wavefront = data[3] & 1 != 0;
        cfg.workers = (data[3] >> 1) as usize % 3;
        cfg.sao = data[4] & 1 != 0;
        cfg.sao_chroma = data[4] & 2 != 0;
        cfg.sao_lcu_boundary = data[4] & 4 != 0;
        cfg.deblocking = data[4] & 8 != 0;

        let Ok(mut encoder) = FrameEncoder::new(cfg.clone(), Arc::new(FuzzAnalyzer), Arc::new(NoopKernels)) else {
            return;
        };

        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 0, SliceType::I);
        for i in 0..pic.orig.num_stripes() {
            let mut stripe = pic.orig.stripe(i);
            for (j, s) in stripe.iter_mut().enumerate() {
                *s = data[5 + (i + j) % (data.len() - 5)];
            }
        }

        let _ = encoder.stream_headers();
        if encoder.compress(&mut pic, true, 0).is_ok() {
            let _ = encoder.encoded_picture();
        }
    })
}
