use std::sync::{Condvar, Mutex};

use crate::cabac::{CabacCoder, ContextTable, RdoScratch};
use crate::slice::SliceType;
use crate::{Error, Result};

/// Upper bound on schedulable rows; queue initialization fails beyond it
/// and the frame encoder falls back to the sequential path.
pub const MAX_WPP_ROWS: usize = 1024;

/// Number of RDO scratch coders per row, one per CU depth.
const RDO_DEPTHS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    EncodeRow(usize),
    FilterRow(usize),
}

#[derive(Debug, Default)]
pub(crate) struct RowBitmap {
    words: Vec<u64>,
}

impl RowBitmap {
    pub(crate) fn new(rows: usize) -> Self {
        Self {
            words: vec![0; rows.div_ceil(64)],
        }
    }

    /// Sets the bit; returns false if it was already set (replace
    /// semantics for re-enqueued rows).
    pub(crate) fn set(&mut self, row: usize) -> bool {
        let mask = 1u64 << (row % 64);
        let word = &mut self.words[row / 64];
        let newly = *word & mask == 0;
        *word |= mask;
        newly
    }

    /// Clears and returns the lowest set bit; the scheduler always hands
    /// out the lowest-numbered ready row first.
    pub(crate) fn take_lowest(&mut self) -> Option<usize> {
        for (i, word) in self.words.iter_mut().enumerate() {
            if *word != 0 {
                let bit = word.trailing_zeros() as usize;
                *word &= *word - 1;
                return Some(i * 64 + bit);
            }
        }
        None
    }

    pub(crate) fn any_below(&self, row: usize) -> bool {
        let full_words = row / 64;
        for word in &self.words[..full_words] {
            if *word != 0 {
                return true;
            }
        }
        let rem = row % 64;
        rem != 0 && self.words[full_words] & ((1u64 << rem) - 1) != 0
    }

    pub(crate) fn clear_all(&mut self) {
        self.words.fill(0);
    }
}

struct QueueState {
    encode: RowBitmap,
    filter: RowBitmap,
    stopped: bool,
}

/// The wavefront's work queue. Encode rows always outrank filter rows,
/// and within a kind the lowest row index wins.
pub struct JobQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl JobQueue {
    pub fn new(num_rows: usize) -> Result<Self> {
        if num_rows == 0 || num_rows > MAX_WPP_ROWS {
            return Err(Error::QueueInit(num_rows));
        }

        Ok(Self {
            state: Mutex::new(QueueState {
                encode: RowBitmap::new(num_rows),
                filter: RowBitmap::new(num_rows),
                stopped: false,
            }),
            ready: Condvar::new(),
        })
    }

    pub fn enqueue_encode_row(&self, row: usize) {
        let mut state = self.state.lock().unwrap();
        if state.encode.set(row) {
            self.ready.notify_one();
        }
    }

    pub fn enqueue_filter_row(&self, row: usize) {
        let mut state = self.state.lock().unwrap();
        if state.filter.set(row) {
            self.ready.notify_one();
        }
    }

    /// Blocks for the next job; `None` once the queue is stopped.
    pub fn next_job(&self) -> Option<Job> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(row) = state.encode.take_lowest() {
                return Some(Job::EncodeRow(row));
            }
            if let Some(row) = state.filter.take_lowest() {
                return Some(Job::FilterRow(row));
            }
            state = self.ready.wait(state).unwrap();
        }
    }

    /// True when an encode row below `row` is waiting; the worker yields
    /// its current row so the lower one runs first.
    pub fn has_lower_encode_row(&self, row: usize) -> bool {
        self.state.lock().unwrap().encode.any_below(row)
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.ready.notify_all();
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.encode.clear_all();
        state.filter.clear_all();
        state.stopped = false;
    }
}

#[derive(Debug, Default)]
pub struct RowFlags {
    /// Whether the row is enqueued or being worked on; guarded by the row
    /// lock together with the enqueue decision.
    pub active: bool,
}

/// Per-row mutable state. Lives on the frame encoder across frames and is
/// reset at the start of each one.
pub struct CtuRow {
    pub lock: Mutex<RowFlags>,
    pub coder: Mutex<CabacCoder>,
    /// Context snapshot taken after this row's second CTU; consumed once
    /// by the row below at its start-of-row synchronization.
    pub buffer_contexts: Mutex<Option<ContextTable>>,
    pub rdo: Mutex<RdoScratch>,
}

impl CtuRow {
    pub fn new(qp: i32, slice_type: SliceType) -> Self {
        Self {
            lock: Mutex::new(RowFlags::default()),
            coder: Mutex::new(CabacCoder::new(qp, slice_type)),
            buffer_contexts: Mutex::new(None),
            rdo: Mutex::new(RdoScratch::new(RDO_DEPTHS, qp, slice_type)),
        }
    }

    /// Frame-start reset: row coder reinitialized from the slice's initial
    /// context, snapshot slot emptied, activity flag cleared.
    pub fn reset(&self, qp: i32, slice_type: SliceType) {
        self.lock.lock().unwrap().active = false;

        let mut coder = self.coder.lock().unwrap();
        coder.reset(qp, slice_type);
        let contexts = coder.save_contexts();
        drop(coder);

        *self.buffer_contexts.lock().unwrap() = None;
        self.rdo.lock().unwrap().reseed(&contexts);
    }
}
