use std::sync::{Arc, Condvar, Mutex};

use log::trace;

use crate::picture::Picture;
use crate::sao::SaoParams;
use crate::slice::Slice;

/// The pixel-domain filter kernels. Deblocking and SAO sample processing
/// are external to this crate; the loop-filter pipeline only schedules
/// them.
pub trait LoopFilterKernels: Send + Sync {
    /// Deblocks CTU row `row`. The rows the deblocker reaches into below
    /// are already reconstructed when this is called (the pipeline lags
    /// the encode wavefront).
    fn deblock_row(&self, pic: &Picture, slice: &Slice, row: usize);

    /// Saves the deblocked samples of `row` for the SAO decision stage.
    fn sao_reconstruct_row(&self, pic: &Picture, row: usize);

    /// Frame-wide SAO parameter estimation, run sequentially after the
    /// pipeline drains. Applies the chosen offsets to the reconstruction
    /// and returns the per-CTU parameters for the final coding pass.
    fn sao_estimate(&self, pic: &Picture, slice: &Slice) -> SaoParams;
}

/// Kernels that leave the reconstruction untouched. Useful for tests and
/// for bitstream-only runs where the pixel filters live elsewhere.
pub struct NoopKernels;

impl LoopFilterKernels for NoopKernels {
    fn deblock_row(&self, _pic: &Picture, _slice: &Slice, _row: usize) {}

    fn sao_reconstruct_row(&self, _pic: &Picture, _row: usize) {}

    fn sao_estimate(&self, pic: &Picture, _slice: &Slice) -> SaoParams {
        SaoParams::disabled(pic.num_ctus())
    }
}

struct FilterState {
    /// Highest row released by the encode wavefront; -1 before any.
    /// Enqueue is a replace operation on this marker, which is what makes
    /// re-enqueues idempotent.
    target: isize,
    /// Next row to filter; rows are always filtered in order.
    next: usize,
    num_rows: usize,
    deblock: bool,
    sao: bool,
    draining: bool,
}

/// The loop-filter wavefront: a second, in-order pipeline lagging the
/// encode wavefront by the configured row delay.
pub struct FrameFilter {
    kernels: Arc<dyn LoopFilterKernels>,
    state: Mutex<FilterState>,
    drained: Condvar,
}

impl FrameFilter {
    pub fn new(kernels: Arc<dyn LoopFilterKernels>) -> Self {
        Self {
            kernels,
            state: Mutex::new(FilterState {
                target: -1,
                next: 0,
                num_rows: 0,
                deblock: false,
                sao: false,
                draining: false,
            }),
            drained: Condvar::new(),
        }
    }

    /// Arms the pipeline for one frame.
    pub fn start(&self, num_rows: usize, deblock: bool, sao: bool) {
        let mut state = self.state.lock().unwrap();
        state.target = -1;
        state.next = 0;
        state.num_rows = num_rows;
        state.deblock = deblock;
        state.sao = sao;
        state.draining = false;
    }

    /// Releases rows up to and including `row` for filtering. Replace
    /// semantics: enqueuing the same row twice is a no-op beyond the
    /// first. Returns whether the marker moved.
    pub fn enqueue_row(&self, row: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        if (row as isize) <= state.target {
            return false;
        }
        state.target = row as isize;
        true
    }

    /// Synchronous variant: releases the row and runs every in-order
    /// released row on the calling thread.
    pub fn process_row(&self, row: usize, pic: &Picture, slice: &Slice) {
        self.enqueue_row(row);
        self.drain(pic, slice);
    }

    /// Filters released rows from the in-order cursor. A single thread
    /// drains at a time; concurrent callers return early and leave their
    /// rows to the draining thread.
    pub fn drain(&self, pic: &Picture, slice: &Slice) {
        let mut state = self.state.lock().unwrap();
        if state.draining {
            return;
        }
        state.draining = true;

        while state.next < state.num_rows && (state.next as isize) <= state.target {
            let row = state.next;
            let deblock = state.deblock;
            let sao = state.sao;
            drop(state);

            trace!("loop filter row {row}");
            if deblock {
                self.kernels.deblock_row(pic, slice, row);
            }
            if sao {
                self.kernels.sao_reconstruct_row(pic, row);
            }

            state = self.state.lock().unwrap();
            state.next = row + 1;
        }

        state.draining = false;
        if state.next == state.num_rows {
            self.drained.notify_all();
        }
    }

    /// Blocks until every row of the frame has been filtered.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        while state.next < state.num_rows {
            state = self.drained.wait(state).unwrap();
        }
    }

    /// Discards rows that were released but not yet filtered.
    pub fn dequeue(&self) {
        let mut state = self.state.lock().unwrap();
        state.target = state.next as isize - 1;
    }

    /// Frame teardown after SAO estimation.
    pub fn end(&self) {
        let mut state = self.state.lock().unwrap();
        state.target = -1;
        state.next = 0;
        state.num_rows = 0;
    }

    pub fn kernels(&self) -> &dyn LoopFilterKernels {
        self.kernels.as_ref()
    }

    /// Rows filtered so far; rows always complete in order.
    pub fn rows_done(&self) -> usize {
        self.state.lock().unwrap().next
    }
}
