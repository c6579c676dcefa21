use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender};
use log::{debug, error, trace, warn};

use crate::au::AccessUnit;
use crate::bitwriter::BitWriter;
use crate::cabac::{CabacCoder, ContextTable};
use crate::config::EncoderConfig;
use crate::ctu::{CtuAnalyzer, CtuInfo};
use crate::filter::{FrameFilter, LoopFilterKernels};
use crate::nal::{count_emulation_bytes, NalUnit, NalUnitType};
use crate::picture::{MotionReference, Picture};
use crate::pps::Pps;
use crate::sao::{write_ctu_sao, SaoParams};
use crate::sei::{SeiMessage, SeiPayload};
use crate::slice::{Slice, SliceType};
use crate::sps::Sps;
use crate::vps::Vps;
use crate::wavefront::{CtuRow, Job, JobQueue};
use crate::wp;
use crate::{Error, Result};

/// Per-frame encoder: turns one scheduled picture into its NAL units.
/// Row state and the loop-filter pipeline persist across frames; the
/// picture is borrowed exclusively for the duration of one `compress`.
pub struct FrameEncoder {
    cfg: EncoderConfig,
    vps: Vps,
    sps: Sps,
    pps: Pps,

    analyzer: Arc<dyn CtuAnalyzer>,
    filter: FrameFilter,

    rows: Vec<CtuRow>,
    queue: Option<JobQueue>,
    row_delay: usize,

    slice: Option<Slice>,
    access_unit: AccessUnit,
}

impl FrameEncoder {
    pub fn new(
        cfg: EncoderConfig,
        analyzer: Arc<dyn CtuAnalyzer>,
        kernels: Arc<dyn LoopFilterKernels>,
    ) -> Result<Self> {
        cfg.validate()?;

        let num_rows = cfg.height_in_ctu();
        let qp = cfg.qp.round() as i32;
        let rows = (0..num_rows).map(|_| CtuRow::new(qp, SliceType::I)).collect();

        let queue = match JobQueue::new(num_rows) {
            Ok(queue) => Some(queue),
            Err(err) => {
                warn!("wavefront queue init failed ({err}); using single-thread mode");
                None
            }
        };

        let sps = Sps::from_config(&cfg);
        let pps = Pps::from_config(&cfg);
        let vps = Vps {
            vps_video_parameter_set_id: 0,
            ptl: sps.ptl.clone(),
            vps_max_dec_pic_buffering_minus1: sps.sps_max_dec_pic_buffering_minus1,
            vps_max_num_reorder_pics: sps.sps_max_num_reorder_pics,
        };

        Ok(Self {
            row_delay: cfg.row_delay(),
            cfg,
            vps,
            sps,
            pps,
            analyzer,
            filter: FrameFilter::new(kernels),
            rows,
            queue,
            slice: None,
            access_unit: AccessUnit::new(),
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.cfg
    }

    /// Slice state of the most recently compressed picture.
    pub fn slice(&self) -> Option<&Slice> {
        self.slice.as_ref()
    }

    /// Headers for the start of the bitstream: VPS, SPS, PPS and the
    /// configured stream-level SEI messages.
    pub fn stream_headers(&self) -> Result<AccessUnit> {
        let mut au = AccessUnit::new();

        let mut bw = BitWriter::new();
        self.vps.write(&mut bw)?;
        au.push(NalUnit::new(NalUnitType::VpsNut, 0, bw));

        let mut bw = BitWriter::new();
        self.sps.write(&mut bw)?;
        au.push(NalUnit::new(NalUnitType::SpsNut, 0, bw));

        let mut bw = BitWriter::new();
        self.pps.write(&mut bw)?;
        au.push(NalUnit::new(NalUnitType::PpsNut, 0, bw));

        if self.cfg.active_parameter_sets_sei {
            let msg = SeiMessage::new(SeiPayload::ActiveParameterSets {
                active_video_parameter_set_id: self.vps.vps_video_parameter_set_id,
                self_contained_cvs_flag: false,
                no_parameter_set_update_flag: false,
                active_seq_parameter_set_ids: vec![self.sps.sps_seq_parameter_set_id],
            });
            au.push(sei_nal(&msg)?);
        }

        if self.cfg.display_orientation_angle != 0 {
            let msg = SeiMessage::new(SeiPayload::DisplayOrientation {
                hor_flip: false,
                ver_flip: false,
                anticlockwise_rotation: self.cfg.display_orientation_angle as u16,
            });
            au.push(sei_nal(&msg)?);
        }

        Ok(au)
    }

    /// Compresses one picture. On return the picture's NAL units are
    /// pending in the encoder, retrieved with [`encoded_picture`].
    ///
    /// [`encoded_picture`]: FrameEncoder::encoded_picture
    pub fn compress(&mut self, pic: &mut Picture, force_i_slice: bool, gop_index: usize) -> Result<()> {
        self.cfg.validate()?;

        let slice_type = if force_i_slice { SliceType::I } else { pic.slice_type };
        pic.slice_type = slice_type;
        trace!("compress poc={} type={:?} gop_index={}", pic.poc, slice_type, gop_index);

        let ref_pocs_l0: Vec<i32> = pic.refs_l0.iter().map(|r| r.poc).collect();
        let ref_pocs_l1: Vec<i32> = pic.refs_l1.iter().map(|r| r.poc).collect();
        let mut slice = Slice::initialize(
            &self.cfg,
            slice_type,
            pic.poc,
            gop_index,
            ref_pocs_l0,
            ref_pocs_l1,
        )?;

        if self.cfg.adaptive_search_range && !slice_type.is_intra() {
            let max_sr = self.cfg.search_range;
            let scale = self.cfg.asr_scale;
            let sr = |ref_poc: i32| {
                ((max_sr * scale * (pic.poc - ref_poc).abs() + 4) >> 3).clamp(8, max_sr)
            };
            slice.search_range_l0 = slice.ref_pocs_l0.iter().map(|&p| sr(p)).collect();
            slice.search_range_l1 = slice.ref_pocs_l1.iter().map(|&p| sr(p)).collect();
        }

        // Weighted prediction estimation
        let saved_wp = wp::store_wp_params(&slice);
        let wp_explicit = (slice_type.is_inter_p() && self.pps.weighted_pred_flag)
            || (slice_type.is_inter_b() && self.pps.weighted_bipred_flag);
        if wp_explicit {
            wp::estimate_wp_params(&mut slice, pic);
            wp::check_wp_enable(&mut slice, pic);
        }

        // Motion reference planes, warped by the WP parameters on P-slices
        let warp_l0 = slice_type.is_inter_p() && self.pps.weighted_pred_flag && slice.wp_enabled;
        slice.mrefs_l0 = pic
            .refs_l0
            .iter()
            .enumerate()
            .map(|(i, r)| MotionReference::generate(r, warp_l0.then(|| &slice.wp_l0[i])))
            .collect();
        slice.mrefs_l1 = pic
            .refs_l1
            .iter()
            .map(|r| MotionReference::generate(r, None))
            .collect();

        // Analyze CTU rows; with WPP enabled the frame is compressed in a
        // wavefront and the loop filter runs as a second wavefront behind
        // the reconstruction.
        self.compress_ctu_rows(pic, &slice)?;
        self.filter.dequeue();

        // SAO parameter estimation, sequential, after the filter drains
        let sao_params = if self.cfg.sao {
            let params = self.filter.kernels().sao_estimate(pic, &slice);
            slice.sao_luma = params.enabled_luma;
            slice.sao_chroma = params.enabled_chroma;
            Some(params)
        } else {
            None
        };

        let pending_mark = self.access_unit.nals.len();
        if self.cfg.recovery_point_sei && slice_type.is_intra() {
            if self.cfg.gradual_decoding_refresh && pic.poc != 0 {
                let msg = SeiMessage::new(SeiPayload::GradualDecodingRefresh {
                    gdr_foreground_flag: true,
                });
                self.access_unit.push(sei_nal(&msg)?);
            }

            let msg = SeiMessage::new(SeiPayload::RecoveryPoint {
                recovery_poc_cnt: 0,
                exact_match_flag: pic.poc == 0,
                broken_link_flag: false,
            });
            self.access_unit.push(sei_nal(&msg)?);
        }

        // Final entropy-coded pass over the decided CTUs. A failed frame
        // publishes nothing, including its prefix SEIs.
        let slice_nal = match self.encode_slice(pic, &mut slice, sao_params.as_ref()) {
            Ok(nal) => nal,
            Err(err) => {
                self.access_unit.nals.truncate(pending_mark);
                return Err(err);
            }
        };
        self.access_unit.push(slice_nal);

        pic.compress_motion();

        wp::restore_wp_params(&mut slice, saved_wp);
        if self.cfg.sao {
            self.filter.end();
        }

        self.slice = Some(slice);
        Ok(())
    }

    /// NAL units of the last compressed picture: zero or more prefix SEIs
    /// followed by exactly one slice NAL.
    pub fn encoded_picture(&mut self) -> AccessUnit {
        std::mem::take(&mut self.access_unit)
    }

    fn compress_ctu_rows(&self, pic: &mut Picture, slice: &Slice) -> Result<()> {
        let num_rows = pic.height_in_ctu();
        if num_rows == 0 || num_rows != self.rows.len() {
            return Err(Error::ConfigError(format!(
                "picture has {} CTU rows, encoder was built for {}",
                num_rows,
                self.rows.len()
            )));
        }

        pic.reset_frame_state();
        for row in &self.rows {
            row.reset(slice.qp, slice.slice_type);
        }

        self.filter.start(num_rows, self.cfg.deblocking, self.cfg.sao);

        let parallel = self.cfg.wavefront
            && self.cfg.workers > 0
            && self.queue.is_some()
            && pic.width_in_ctu() >= 2;

        let (done_tx, done_rx) = bounded::<()>(1);
        let ctx = WppContext {
            cfg: &self.cfg,
            pic: &*pic,
            slice,
            rows: &self.rows,
            queue: if parallel { self.queue.as_ref() } else { None },
            filter: &self.filter,
            analyzer: self.analyzer.as_ref(),
            row_delay: self.row_delay,
            num_rows,
            done: done_tx,
        };

        if let Some(queue) = ctx.queue {
            queue.reset();

            thread::scope(|s| {
                for _ in 0..self.cfg.workers {
                    let ctx = &ctx;
                    s.spawn(move || {
                        while let Some(job) = queue.next_job() {
                            match job {
                                Job::EncodeRow(row) => process_row(ctx, row),
                                Job::FilterRow(_) => ctx.filter.drain(ctx.pic, ctx.slice),
                            }
                        }
                    });
                }

                // Enqueue the first row, then block until the workers
                // complete the frame and the filter drains behind them.
                queue.enqueue_encode_row(0);
                let _ = done_rx.recv();
                self.filter.wait();
                queue.stop();
            });
        } else {
            if self.cfg.wavefront && pic.width_in_ctu() < 2 {
                debug!("picture too narrow for wavefront; processing rows sequentially");
            }
            for row in 0..num_rows {
                process_row(&ctx, row);
            }
            for row in 0..num_rows {
                self.filter.process_row(row, pic, slice);
            }
            self.filter.wait();
        }

        Ok(())
    }

    /// Final pass: re-encodes the slice from the decided CTU records into
    /// per-row substreams, then assembles slice header, entry points and
    /// substream bytes into one slice NAL unit.
    fn encode_slice(&self, pic: &Picture, slice: &mut Slice, sao: Option<&SaoParams>) -> Result<NalUnit> {
        let wpp = self.pps.entropy_coding_sync_enabled_flag;
        let num_cols = pic.width_in_ctu();
        let num_rows = pic.height_in_ctu();
        let num_substreams = if wpp { num_rows } else { 1 };

        let mut coders: Vec<CabacCoder> = (0..num_substreams)
            .map(|_| CabacCoder::new(slice.qp, slice.slice_type))
            .collect();
        let mut buffers: Vec<Option<ContextTable>> = vec![None; num_rows];

        let sao_on = sao.is_some() && (slice.sao_luma || slice.sao_chroma);

        for addr in 0..pic.num_ctus() {
            let col = addr % num_cols;
            let row = addr / num_cols;
            let substream = row % num_substreams;
            let coder = &mut coders[substream];

            // Synchronize CABAC probabilities with the upper-right CTU if
            // it is available and we are at the start of a line.
            if wpp && col == 0 && row > 0 {
                if col + 1 < num_cols {
                    if let Some(buffer) = &buffers[row - 1] {
                        coder.load_contexts(buffer);
                    }
                } else {
                    // upper-right CTU is outside the picture
                }
            }

            if sao_on {
                if let Some(params) = sao {
                    write_ctu_sao(coder, params, addr, row, col);
                }
            }

            let record = pic
                .record(addr)
                .ok_or_else(|| Error::InternalState(format!("CTU {addr} has no analysis record")))?;
            self.analyzer.encode(record, coder);

            let last_ctu = addr + 1 == pic.num_ctus();
            coder.encode_bin_trm(last_ctu as u8); // end_of_slice_segment_flag

            // Store the probabilities after the second CTU in line
            if wpp && col == 1 {
                buffers[row] = Some(coder.save_contexts());
            }
        }

        // Flush all substreams: terminating bit, engine flush, stop bit,
        // byte alignment. Record the sizes of all but the last.
        slice.substream_sizes.clear();
        let mut substream_bytes: Vec<Vec<u8>> = Vec::with_capacity(num_substreams);
        for (i, coder) in coders.iter_mut().enumerate() {
            coder.encode_bin_trm(1);
            coder.finish();
            coder.bitstream_mut().write_bit(true);
            coder.bitstream_mut().align_to_byte();

            let bytes = coder.take_bytes();
            if i + 1 < num_substreams {
                let total_bytes = bytes.len() + count_emulation_bytes(&bytes);
                if total_bytes > (u32::MAX >> 3) as usize {
                    return Err(Error::StreamOverflow(total_bytes));
                }
                slice.substream_sizes.push((total_bytes as u32) << 3);
            }
            substream_bytes.push(bytes);
        }

        // Slice header, then entry points once the sizes are known.
        let mut bw = BitWriter::new();
        slice.write_header(&mut bw, &self.sps, &self.pps)?;
        if self.pps.entropy_coding_sync_enabled_flag {
            slice.write_entry_points(&mut bw)?;
        }
        bw.write_byte_alignment();

        for bytes in &substream_bytes {
            bw.append_aligned(bytes)?;
        }

        trace!(
            "slice poc={} substreams={} bytes={}",
            slice.poc,
            num_substreams,
            bw.as_bytes().len()
        );
        Ok(NalUnit::new(slice.nal_unit_type(), 0, bw))
    }
}

struct WppContext<'a> {
    cfg: &'a EncoderConfig,
    pic: &'a Picture,
    slice: &'a Slice,
    rows: &'a [CtuRow],
    queue: Option<&'a JobQueue>,
    filter: &'a FrameFilter,
    analyzer: &'a dyn CtuAnalyzer,
    row_delay: usize,
    num_rows: usize,
    done: Sender<()>,
}

/// Analyzes CTUs of `row` until the row ends or the worker has to yield,
/// either because the row above has not kept the two-CTU lead or because a
/// lower-numbered row became ready.
fn process_row(ctx: &WppContext<'_>, row: usize) {
    let wpp = ctx.cfg.wavefront;
    let num_cols = ctx.pic.width_in_ctu() as u32;
    let code_row = &ctx.rows[if wpp { row } else { 0 }];

    let mut col = ctx.pic.complete_enc(row);
    while col < num_cols {
        let addr = ctx.pic.ctu_addr(row, col as usize);
        let ctu = CtuInfo {
            addr,
            row,
            col: col as usize,
            size: ctx.pic.ctu_size(),
        };

        let mut coder = code_row.coder.lock().unwrap();
        if wpp && col == 0 && row > 0 {
            // Upper-right synchronization; an absent snapshot means the
            // upper-right CTU is outside the picture and the sync is
            // skipped.
            if let Some(snapshot) = ctx.rows[row - 1].buffer_contexts.lock().unwrap().as_ref() {
                coder.load_contexts(snapshot);
            }
        }

        let mut rdo = code_row.rdo.lock().unwrap();
        rdo.reseed(&coder.save_contexts());
        let record = ctx.analyzer.analyze(&ctu, ctx.pic, ctx.slice, &mut coder, &mut rdo);
        drop(rdo);

        if wpp && col == 1 {
            *code_row.buffer_contexts.lock().unwrap() = Some(coder.save_contexts());
        }
        drop(coder);

        if let Err(err) = ctx.pic.set_record(addr, record) {
            error!("{err}");
            return;
        }

        let complete = col + 1;
        ctx.pic.advance_complete_enc(row, complete);

        if let Some(queue) = ctx.queue {
            // Promotion: the only inter-row write besides the snapshot.
            if complete >= 2 && row + 1 < ctx.num_rows {
                let below = &ctx.rows[row + 1];
                let mut flags = below.lock.lock().unwrap();
                if !flags.active && ctx.pic.complete_enc(row + 1) + 2 <= complete {
                    flags.active = true;
                    queue.enqueue_encode_row(row + 1);
                }
            }

            let mut flags = ctx.rows[row].lock.lock().unwrap();
            if row > 0
                && complete < num_cols - 1
                && ctx.pic.complete_enc(row - 1) < complete + 2
            {
                flags.active = false;
                return;
            }
            if wpp && queue.has_lower_encode_row(row) {
                flags.active = false;
                return;
            }
        }

        col = complete;
    }

    // Row finished: release filter rows behind the lag, and the frame
    // completion once the last row lands.
    if row >= ctx.row_delay {
        enqueue_filter_row(ctx, row - ctx.row_delay);
    }
    if row + 1 == ctx.num_rows {
        enqueue_filter_row(ctx, row);
        let _ = ctx.done.send(());
    }
}

fn enqueue_filter_row(ctx: &WppContext<'_>, row: usize) {
    ctx.filter.enqueue_row(row);
    if let Some(queue) = ctx.queue {
        queue.enqueue_filter_row(row);
    }
}

fn sei_nal(msg: &SeiMessage) -> Result<NalUnit> {
    let mut bw = BitWriter::new();
    msg.write(&mut bw)?;
    bw.rbsp_trailing_bits();
    Ok(NalUnit::new(NalUnitType::PrefixSeiNut, 0, bw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabac::{Bin, RdoScratch, CTX_ANALYZER_BASE};
    use crate::ctu::CtuRecord;
    use crate::filter::NoopKernels;
    use crate::picture::{Plane, Reference};
    use crate::slice::Slice;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Deterministic stand-in for the CTU encoder: emits a symbol stream
    /// derived from the CTU position and source samples, and copies the
    /// source into the reconstruction.
    struct DummyAnalyzer;

    impl DummyAnalyzer {
        fn run(
            ctu: &CtuInfo,
            pic: &Picture,
            slice: &Slice,
            coder: &mut CabacCoder,
        ) -> CtuRecord {
            let offset = ctu.col * ctu.size;
            let sample = {
                let stripe = pic.orig.stripe(ctu.row);
                stripe.get(offset).copied().unwrap_or(0)
            };

            let bins = vec![
                Bin::Ctx {
                    idx: (CTX_ANALYZER_BASE + ctu.addr % 4) as u16,
                    bin: sample & 1,
                },
                Bin::Ctx {
                    idx: (CTX_ANALYZER_BASE + 4) as u16,
                    bin: ((slice.qp as usize + ctu.col) % 2) as u8,
                },
                Bin::BypassBits { value: sample as u32, count: 8 },
                Bin::BypassBits { value: (ctu.addr as u32) & 0xffff, count: 16 },
            ];
            coder.replay(&bins);

            let width = pic.orig.width();
            let rows = pic.orig.stripe_rows(ctu.row);
            let orig = pic.orig.stripe(ctu.row);
            let mut recon = pic.recon.stripe(ctu.row);
            for r in 0..rows {
                let from = r * width + offset.min(width);
                let to = r * width + (offset + ctu.size).min(width);
                recon[from..to].copy_from_slice(&orig[from..to]);
            }

            CtuRecord {
                bins,
                mv: [ctu.col as i16, ctu.row as i16],
                ..Default::default()
            }
        }
    }

    impl CtuAnalyzer for DummyAnalyzer {
        fn analyze(
            &self,
            ctu: &CtuInfo,
            pic: &Picture,
            slice: &Slice,
            coder: &mut CabacCoder,
            _rdo: &mut RdoScratch,
        ) -> CtuRecord {
            DummyAnalyzer::run(ctu, pic, slice, coder)
        }
    }

    fn fill_gradient(pic: &Picture) {
        for i in 0..pic.orig.num_stripes() {
            let mut stripe = pic.orig.stripe(i);
            for (j, s) in stripe.iter_mut().enumerate() {
                *s = ((i * 37 + j * 13) % 251) as u8;
            }
        }
    }

    fn make_encoder(cfg: EncoderConfig) -> FrameEncoder {
        FrameEncoder::new(cfg, Arc::new(DummyAnalyzer), Arc::new(NoopKernels)).unwrap()
    }

    fn encode_i_frame(cfg: &EncoderConfig) -> Vec<u8> {
        let mut encoder = make_encoder(cfg.clone());
        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 0, SliceType::I);
        fill_gradient(&pic);
        encoder.compress(&mut pic, true, 0).unwrap();
        encoder.encoded_picture().to_annexb_bytes()
    }

    #[test]
    fn test_stream_headers_order() {
        let mut cfg = EncoderConfig::new(128, 128);
        cfg.active_parameter_sets_sei = true;
        let encoder = make_encoder(cfg);

        let au = encoder.stream_headers().unwrap();
        let types: Vec<NalUnitType> = au.nals().map(|n| n.nal_type).collect();
        assert_eq!(
            types,
            vec![
                NalUnitType::VpsNut,
                NalUnitType::SpsNut,
                NalUnitType::PpsNut,
                NalUnitType::PrefixSeiNut,
            ]
        );
    }

    #[test]
    fn test_single_i_frame_sequential() {
        let _ = env_logger::try_init();

        let mut cfg = EncoderConfig::new(128, 128);
        cfg.wavefront = false;
        cfg.workers = 0;

        let mut encoder = make_encoder(cfg.clone());
        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 0, SliceType::I);
        fill_gradient(&pic);

        encoder.compress(&mut pic, true, 0).unwrap();

        assert_eq!(pic.complete_enc(0), 2);
        assert_eq!(pic.complete_enc(1), 2);

        let au = encoder.encoded_picture();
        assert_eq!(au.nals.len(), 1);
        assert_eq!(au.nals[0].nal_type, NalUnitType::IdrWRadl);
        assert!(!au.nals[0].rbsp.is_empty());

        // the pending unit is drained
        assert!(encoder.encoded_picture().is_empty());
    }

    #[test]
    fn test_bitstream_identical_across_thread_counts() {
        let mut cfg = EncoderConfig::new(256, 256);
        cfg.wavefront = true;

        let mut outputs = Vec::new();
        for workers in [0usize, 1, 2, 4] {
            cfg.workers = workers;
            outputs.push(encode_i_frame(&cfg));
        }

        assert!(!outputs[0].is_empty());
        for out in &outputs[1..] {
            assert_eq!(out, &outputs[0]);
        }
    }

    #[test]
    fn test_entry_point_offsets_cover_all_but_last_row() {
        let mut cfg = EncoderConfig::new(256, 256);
        cfg.wavefront = true;
        cfg.workers = 2;

        let mut encoder = make_encoder(cfg.clone());
        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 0, SliceType::I);
        fill_gradient(&pic);
        encoder.compress(&mut pic, true, 0).unwrap();

        let au = encoder.encoded_picture();
        let slice = encoder.slice().unwrap();
        assert_eq!(slice.substream_sizes.len(), 3);
        for &bits in &slice.substream_sizes {
            assert!(bits > 0);
            assert_eq!(bits % 8, 0);
        }

        // The recorded sizes cover all substreams but the last, so their
        // sum stays below the slice payload, header and last row included.
        let sum: usize = slice.substream_sizes.iter().map(|&b| (b >> 3) as usize).sum();
        assert!(sum < au.nals[0].rbsp.len());
    }

    struct InvariantAnalyzer {
        violated: AtomicBool,
    }

    impl CtuAnalyzer for InvariantAnalyzer {
        fn analyze(
            &self,
            ctu: &CtuInfo,
            pic: &Picture,
            slice: &Slice,
            coder: &mut CabacCoder,
            _rdo: &mut RdoScratch,
        ) -> CtuRecord {
            if ctu.row > 0 {
                let need = (ctu.col + 2).min(pic.width_in_ctu()) as u32;
                if pic.complete_enc(ctu.row - 1) < need {
                    self.violated.store(true, Ordering::SeqCst);
                }
            }
            DummyAnalyzer::run(ctu, pic, slice, coder)
        }
    }

    #[test]
    fn test_wavefront_dependency_invariant() {
        let mut cfg = EncoderConfig::new(128, 128);
        cfg.ctu_size = 16; // 8x8 CTU grid
        cfg.wavefront = true;
        cfg.workers = 4;

        let analyzer = Arc::new(InvariantAnalyzer { violated: AtomicBool::new(false) });
        let mut encoder =
            FrameEncoder::new(cfg.clone(), analyzer.clone(), Arc::new(NoopKernels)).unwrap();

        for poc in 0..4 {
            let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, poc, SliceType::I);
            fill_gradient(&pic);
            encoder.compress(&mut pic, true, 0).unwrap();

            for row in 0..pic.height_in_ctu() {
                assert_eq!(pic.complete_enc(row), pic.width_in_ctu() as u32);
            }
        }

        assert!(!analyzer.violated.load(Ordering::SeqCst));
    }

    struct LagKernels {
        row_delay: usize,
        violated: AtomicBool,
    }

    impl LoopFilterKernels for LagKernels {
        fn deblock_row(&self, pic: &Picture, _slice: &Slice, row: usize) {
            let width = pic.width_in_ctu() as u32;
            let watch = (row + self.row_delay).min(pic.height_in_ctu() - 1);
            if pic.complete_enc(watch) != width {
                self.violated.store(true, Ordering::SeqCst);
            }
        }

        fn sao_reconstruct_row(&self, _pic: &Picture, _row: usize) {}

        fn sao_estimate(&self, pic: &Picture, _slice: &Slice) -> SaoParams {
            SaoParams::disabled(pic.num_ctus())
        }
    }

    #[test]
    fn test_loop_filter_lags_encode_wavefront() {
        let mut cfg = EncoderConfig::new(128, 64);
        cfg.ctu_size = 16; // 8x4 CTU grid
        cfg.wavefront = true;
        cfg.workers = 3;
        cfg.sao_lcu_boundary = true;
        assert_eq!(cfg.row_delay(), 2);

        let kernels = Arc::new(LagKernels { row_delay: 2, violated: AtomicBool::new(false) });
        let mut encoder =
            FrameEncoder::new(cfg.clone(), Arc::new(DummyAnalyzer), kernels.clone()).unwrap();

        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 0, SliceType::I);
        fill_gradient(&pic);
        encoder.compress(&mut pic, true, 0).unwrap();

        assert!(!kernels.violated.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recovery_point_sei_on_idr() {
        let mut cfg = EncoderConfig::new(128, 128);
        cfg.recovery_point_sei = true;

        let mut encoder = make_encoder(cfg.clone());
        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 0, SliceType::I);
        fill_gradient(&pic);
        encoder.compress(&mut pic, true, 0).unwrap();

        let au = encoder.encoded_picture();
        let types: Vec<NalUnitType> = au.nals().map(|n| n.nal_type).collect();
        assert_eq!(types, vec![NalUnitType::PrefixSeiNut, NalUnitType::IdrWRadl]);
    }

    #[test]
    fn test_p_slice_wp_estimated_and_restored() {
        let mut cfg = EncoderConfig::new(128, 128);
        cfg.weighted_pred = true;

        let mut encoder = make_encoder(cfg.clone());
        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 1, SliceType::P);
        fill_gradient(&pic);

        let ref_plane = Plane::new(cfg.width, cfg.height, cfg.ctu_size);
        ref_plane.fill(40);
        pic.refs_l0.push(Reference { poc: 0, plane: Arc::new(ref_plane) });

        encoder.compress(&mut pic, false, 1).unwrap();

        let au = encoder.encoded_picture();
        assert_eq!(au.nals.len(), 1);
        assert_eq!(au.nals[0].nal_type, NalUnitType::TrailR);

        // prior (empty) WP state is restored after the frame
        let slice = encoder.slice().unwrap();
        assert!(!slice.wp_enabled);
        assert!(slice.wp_l0.is_empty());
    }

    #[test]
    fn test_narrow_picture_falls_back_to_sequential() {
        let mut cfg = EncoderConfig::new(64, 256); // single CTU column
        cfg.wavefront = true;
        cfg.workers = 2;

        let mut encoder = make_encoder(cfg.clone());
        let mut pic = Picture::new(cfg.width, cfg.height, cfg.ctu_size, 0, SliceType::I);
        fill_gradient(&pic);
        encoder.compress(&mut pic, true, 0).unwrap();

        for row in 0..pic.height_in_ctu() {
            assert_eq!(pic.complete_enc(row), 1);
        }
        assert_eq!(encoder.slice().unwrap().substream_sizes.len(), 3);
    }
}
