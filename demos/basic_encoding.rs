use h265_encoder::cabac::CTX_ANALYZER_BASE;
use h265_encoder::{
    Bin, CabacCoder, CtuAnalyzer, CtuInfo, CtuRecord, EncoderConfig, FrameEncoder, NoopKernels,
    Picture, RdoScratch, Slice, SliceType,
};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;

/// A trivial CTU encoder so the demo is self-contained: real deployments
/// plug in an RDO-based analyzer here.
struct FlatAnalyzer;

impl CtuAnalyzer for FlatAnalyzer {
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

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <output.h265>", args[0]);
        return Ok(());
    }

    let mut cfg = EncoderConfig::new(320, 240);
    cfg.qp = 32.0;
    cfg.workers = 2;

    let mut encoder = FrameEncoder::new(cfg.clone(), Arc::new(FlatAnalyzer), Arc::new(NoopKernels))?;

    let mut out = File::create(&args[1])?;
    let headers = encoder.stream_headers()?;
    out.write_all(&headers.to_annexb_bytes())?;

    let mut total_bytes = headers.to_annexb_bytes().len();
    for poc in 0..30 {
        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, poc, SliceType::I);

        // moving gradient test pattern
        for i in 0..pic.orig.num_stripes() {
            let mut stripe = pic.orig.stripe(i);
            let width = pic.orig.width();
            for (j, s) in stripe.iter_mut().enumerate() {
                let x = j % width;
                let y = i * cfg.ctu_size + j / width;
                *s = ((x + y + 4 * poc as usize) % 256) as u8;
            }
        }

        encoder.compress(&mut pic, true, 0)?;
        let au = encoder.encoded_picture();

        let bytes = au.to_annexb_bytes();
        total_bytes += bytes.len();
        out.write_all(&bytes)?;

        println!("Frame {}: {} NAL units, {} bytes", poc, au.nals.len(), bytes.len());
    }

    println!("\nSummary:");
    println!("Encoded 30 frames, {} bytes total", total_bytes);

    Ok(())
}
