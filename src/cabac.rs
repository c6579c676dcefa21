use crate::bitwriter::BitWriter;
use crate::slice::SliceType;

/// Probability transition tables and the LPS range table from the HEVC
/// specification. States are packed as (probability_state << 1) | mps.
const NEXT_STATE_MPS: [u8; 128] = [
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17,
    18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33,
    34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49,
    50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 65,
    66, 67, 68, 69, 70, 71, 72, 73, 74, 75, 76, 77, 78, 79, 80, 81,
    82, 83, 84, 85, 86, 87, 88, 89, 90, 91, 92, 93, 94, 95, 96, 97,
    98, 99, 100, 101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113,
    114, 115, 116, 117, 118, 119, 120, 121, 122, 123, 124, 125, 124, 125, 126, 127,
];

const NEXT_STATE_LPS: [u8; 128] = [
    1, 0, 0, 1, 2, 3, 4, 5, 4, 5, 8, 9, 8, 9, 10, 11,
    12, 13, 14, 15, 16, 17, 18, 19, 18, 19, 22, 23, 22, 23, 24, 25,
    26, 27, 26, 27, 30, 31, 30, 31, 32, 33, 32, 33, 36, 37, 36, 37,
    38, 39, 38, 39, 42, 43, 42, 43, 44, 45, 44, 45, 46, 47, 48, 49,
    48, 49, 50, 51, 52, 53, 52, 53, 54, 55, 54, 55, 56, 57, 58, 59,
    58, 59, 60, 61, 60, 61, 60, 61, 62, 63, 64, 65, 64, 65, 66, 67,
    66, 67, 66, 67, 68, 69, 68, 69, 70, 71, 70, 71, 70, 71, 72, 73,
    72, 73, 72, 73, 74, 75, 74, 75, 74, 75, 76, 77, 76, 77, 126, 127,
];

const RANGE_TAB_LPS: [[u8; 4]; 64] = [
    [128, 176, 208, 240], [128, 167, 197, 227], [128, 158, 187, 216], [123, 150, 178, 205],
    [116, 142, 169, 195], [111, 135, 160, 185], [105, 128, 152, 175], [100, 122, 144, 166],
    [95, 116, 137, 158], [90, 110, 130, 150], [85, 104, 123, 142], [81, 99, 117, 135],
    [77, 94, 111, 128], [73, 89, 105, 122], [69, 85, 100, 116], [66, 80, 95, 110],
    [62, 76, 90, 104], [59, 72, 86, 99], [56, 69, 81, 94], [53, 65, 77, 89],
    [51, 62, 73, 85], [48, 59, 69, 80], [46, 56, 66, 76], [43, 53, 63, 72],
    [41, 50, 59, 69], [39, 48, 56, 65], [37, 45, 54, 62], [35, 43, 51, 59],
    [33, 41, 48, 56], [32, 39, 46, 53], [30, 37, 43, 50], [28, 35, 41, 48],
    [27, 33, 39, 45], [26, 31, 37, 43], [24, 30, 35, 41], [23, 28, 33, 39],
    [22, 27, 32, 37], [21, 26, 30, 35], [20, 24, 29, 33], [19, 23, 27, 31],
    [18, 22, 26, 30], [17, 21, 25, 28], [16, 20, 23, 27], [15, 19, 22, 25],
    [14, 18, 21, 24], [14, 17, 20, 23], [13, 16, 19, 22], [12, 15, 18, 21],
    [12, 14, 17, 20], [11, 14, 16, 19], [11, 13, 15, 18], [10, 12, 15, 17],
    [10, 12, 14, 16], [9, 11, 13, 15], [9, 11, 12, 14], [8, 10, 12, 14],
    [8, 9, 11, 13], [7, 9, 11, 12], [7, 9, 10, 12], [7, 8, 10, 11],
    [6, 8, 9, 11], [6, 7, 9, 10], [6, 7, 8, 9], [2, 2, 2, 2],
];

const RENORM_TABLE: [u8; 32] = [
    6, 5, 4, 4, 3, 3, 3, 3, 2, 2, 2, 2, 2, 2, 2, 2,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

/// Context index space. The frame core itself only codes the SAO syntax;
/// the rest of the table is the bank the CTU analyzer draws from.
pub const CTX_SAO_MERGE_FLAG: usize = 0;
pub const CTX_SAO_TYPE_IDX: usize = 1;
pub const CTX_ANALYZER_BASE: usize = 2;
pub const NUM_CONTEXTS: usize = 64;

// Init values indexed by cabac init type (I, P, B).
const INIT_SAO_MERGE_FLAG: [u8; 3] = [153, 153, 153];
const INIT_SAO_TYPE_IDX: [u8; 3] = [160, 185, 200];
const INIT_ANALYZER_BANK: [u8; 3] = [140, 140, 140];

fn init_state(qp: i32, init_value: u8) -> u8 {
    let qp = qp.clamp(0, 51);
    let slope = ((init_value >> 4) as i32) * 5 - 45;
    let offset = (((init_value & 15) as i32) << 3) - 16;
    let init = (((slope * qp) >> 4) + offset).clamp(1, 126);

    if init >= 64 {
        (((init - 64) as u8) << 1) + 1
    } else {
        ((63 - init) as u8) << 1
    }
}

/// The per-slice context variables. A `clone` of this table is the WPP row
/// boundary snapshot; the arithmetic engine state is never part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTable {
    states: [u8; NUM_CONTEXTS],
}

impl ContextTable {
    pub fn new(qp: i32, slice_type: SliceType) -> Self {
        let init_type = slice_type.cabac_init_type();

        let mut states = [init_state(qp, INIT_ANALYZER_BANK[init_type]); NUM_CONTEXTS];
        states[CTX_SAO_MERGE_FLAG] = init_state(qp, INIT_SAO_MERGE_FLAG[init_type]);
        states[CTX_SAO_TYPE_IDX] = init_state(qp, INIT_SAO_TYPE_IDX[init_type]);
        Self { states }
    }

    fn state(&self, idx: usize) -> u8 {
        self.states[idx]
    }

    fn update_mps(&mut self, idx: usize) {
        self.states[idx] = NEXT_STATE_MPS[self.states[idx] as usize];
    }

    fn update_lps(&mut self, idx: usize) {
        self.states[idx] = NEXT_STATE_LPS[self.states[idx] as usize];
    }
}

/// One entropy-coded symbol from the CTU analyzer. The analysis pass runs
/// these through the row coder for context evolution; the final pass
/// replays the identical stream into the substream coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bin {
    /// Context-coded bin.
    Ctx { idx: u16, bin: u8 },
    /// Single bypass bin.
    Bypass { bin: u8 },
    /// Up to 32 bypass bins, most significant first.
    BypassBits { value: u32, count: u8 },
}

/// CABAC encoder: the context table plus the arithmetic engine, writing
/// into an owned bitstream.
pub struct CabacCoder {
    contexts: ContextTable,
    low: u32,
    range: u32,
    buffered_byte: u32,
    num_buffered: i32,
    bits_left: i32,
    bw: BitWriter,
}

impl CabacCoder {
    pub fn new(qp: i32, slice_type: SliceType) -> Self {
        let mut coder = Self {
            contexts: ContextTable::new(qp, slice_type),
            low: 0,
            range: 510,
            buffered_byte: 0xff,
            num_buffered: 0,
            bits_left: 23,
            bw: BitWriter::new(),
        };
        coder.start_engine();
        coder
    }

    /// Reinitializes contexts and the arithmetic engine and drops any
    /// buffered output.
    pub fn reset(&mut self, qp: i32, slice_type: SliceType) {
        self.contexts = ContextTable::new(qp, slice_type);
        self.start_engine();
        self.bw.clear();
    }

    fn start_engine(&mut self) {
        self.low = 0;
        self.range = 510;
        self.buffered_byte = 0xff;
        self.num_buffered = 0;
        self.bits_left = 23;
    }

    /// WPP context synchronization: copies the context variables only.
    pub fn load_contexts(&mut self, snapshot: &ContextTable) {
        self.contexts = snapshot.clone();
    }

    pub fn save_contexts(&self) -> ContextTable {
        self.contexts.clone()
    }

    pub fn encode_bin(&mut self, ctx_idx: usize, bin: u8) {
        let state = self.contexts.state(ctx_idx);
        let lps = RANGE_TAB_LPS[(state >> 1) as usize][((self.range >> 6) & 3) as usize] as u32;
        self.range -= lps;

        if bin != (state & 1) {
            let num_bits = RENORM_TABLE[(lps >> 3) as usize] as i32;
            self.low = (self.low + self.range) << num_bits;
            self.range = lps << num_bits;
            self.contexts.update_lps(ctx_idx);
            self.bits_left -= num_bits;
        } else {
            self.contexts.update_mps(ctx_idx);
            if self.range >= 256 {
                return;
            }
            self.low <<= 1;
            self.range <<= 1;
            self.bits_left -= 1;
        }
        self.test_and_write_out();
    }

    pub fn encode_bin_ep(&mut self, bin: u8) {
        self.low <<= 1;
        if bin != 0 {
            self.low += self.range;
        }
        self.bits_left -= 1;
        self.test_and_write_out();
    }

    pub fn encode_bins_ep(&mut self, value: u32, count: u8) {
        let mut value = value;
        let mut count = count as i32;

        while count > 8 {
            count -= 8;
            let pattern = value >> count;
            self.low <<= 8;
            self.low = self.low.wrapping_add(self.range.wrapping_mul(pattern));
            value -= pattern << count;
            self.bits_left -= 8;
            self.test_and_write_out();
        }

        self.low <<= count;
        self.low = self.low.wrapping_add(self.range.wrapping_mul(value));
        self.bits_left -= count;
        self.test_and_write_out();
    }

    /// Terminating bin: end_of_slice_segment_flag and end_of_subset_one_bit.
    pub fn encode_bin_trm(&mut self, bin: u8) {
        self.range -= 2;
        if bin != 0 {
            self.low += self.range;
            self.low <<= 7;
            self.range = 2 << 7;
            self.bits_left -= 7;
        } else if self.range >= 256 {
            return;
        } else {
            self.low <<= 1;
            self.range <<= 1;
            self.bits_left -= 1;
        }
        self.test_and_write_out();
    }

    pub fn replay(&mut self, bins: &[Bin]) {
        for bin in bins {
            match *bin {
                Bin::Ctx { idx, bin } => self.encode_bin(idx as usize, bin),
                Bin::Bypass { bin } => self.encode_bin_ep(bin),
                Bin::BypassBits { value, count } => self.encode_bins_ep(value, count),
            }
        }
    }

    fn test_and_write_out(&mut self) {
        if self.bits_left < 12 {
            self.write_out();
        }
    }

    fn write_out(&mut self) {
        let lead_byte = self.low >> (24 - self.bits_left);
        self.bits_left += 8;
        self.low &= 0x00ff_ffff >> self.bits_left;

        if lead_byte == 0xff {
            self.num_buffered += 1;
        } else if self.num_buffered > 0 {
            let carry = lead_byte >> 8;
            self.bw.write_u8((self.buffered_byte + carry) as u8);
            let filler = (0xff + carry) as u8;
            while self.num_buffered > 1 {
                self.bw.write_u8(filler);
                self.num_buffered -= 1;
            }
            self.buffered_byte = lead_byte & 0xff;
        } else {
            self.num_buffered = 1;
            self.buffered_byte = lead_byte;
        }
    }

    /// Flushes the arithmetic engine. After this the coder's bitstream may
    /// still be mid-byte; the caller writes the stop bit and alignment.
    pub fn finish(&mut self) {
        if (self.low >> (32 - self.bits_left)) != 0 {
            self.bw.write_u8((self.buffered_byte + 1) as u8);
            while self.num_buffered > 1 {
                self.bw.write_u8(0x00);
                self.num_buffered -= 1;
            }
            self.low -= 1u32 << (32 - self.bits_left);
        } else {
            if self.num_buffered > 0 {
                self.bw.write_u8(self.buffered_byte as u8);
            }
            while self.num_buffered > 1 {
                self.bw.write_u8(0xff);
                self.num_buffered -= 1;
            }
        }
        let _ = self.bw.write_bits((24 - self.bits_left) as u32, self.low >> 8);
    }

    pub fn bitstream_mut(&mut self) -> &mut BitWriter {
        &mut self.bw
    }

    /// Bits committed plus bits pending in the engine; used for rate
    /// estimates, not for byte accounting.
    pub fn written_bits(&self) -> usize {
        self.bw.bit_len() + (self.num_buffered.max(0) as usize) * 8 + (23 - self.bits_left) as usize
    }

    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bw).into_bytes()
    }
}

/// Scratch coders for the analyzer's rate-distortion search. One coder per
/// CU depth, reseeded from the row's working contexts before each CTU.
pub struct RdoScratch {
    pub coders: Vec<CabacCoder>,
}

impl RdoScratch {
    pub fn new(depths: usize, qp: i32, slice_type: SliceType) -> Self {
        Self {
            coders: (0..depths).map(|_| CabacCoder::new(qp, slice_type)).collect(),
        }
    }

    pub fn reseed(&mut self, from: &ContextTable) {
        for coder in &mut self.coders {
            coder.load_contexts(from);
            coder.start_engine();
            coder.bw.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_flush_known_vector() {
        // trm(1) from the initial engine state flushes to a single 0xfe.
        let mut coder = CabacCoder::new(26, SliceType::I);
        coder.encode_bin_trm(1);
        coder.finish();
        assert_eq!(coder.take_bytes(), vec![0xfe]);
    }

    #[test]
    fn test_context_snapshot_round_trip() {
        let mut a = CabacCoder::new(32, SliceType::B);
        for i in 0..20 {
            a.encode_bin(CTX_ANALYZER_BASE + (i % 8), (i % 2) as u8);
        }

        let snap = a.save_contexts();
        let mut b = CabacCoder::new(32, SliceType::B);
        b.load_contexts(&snap);
        assert_eq!(b.save_contexts(), snap);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let bins: Vec<Bin> = (0..200)
            .map(|i| match i % 3 {
                0 => Bin::Ctx { idx: (i % NUM_CONTEXTS) as u16, bin: (i % 2) as u8 },
                1 => Bin::Bypass { bin: ((i / 3) % 2) as u8 },
                _ => Bin::BypassBits { value: (i as u32) & 0xff, count: 8 },
            })
            .collect();

        let mut run = |qp| {
            let mut coder = CabacCoder::new(qp, SliceType::P);
            coder.replay(&bins);
            coder.encode_bin_trm(1);
            coder.finish();
            coder.take_bytes()
        };

        assert_eq!(run(27), run(27));
        assert_ne!(run(27), run(45));
    }

    #[test]
    fn test_bypass_bins_consume_bits() {
        let mut coder = CabacCoder::new(30, SliceType::I);
        let before = coder.written_bits();
        coder.encode_bins_ep(0xa5, 8);
        assert_eq!(coder.written_bits(), before + 8);
    }

    #[test]
    fn test_context_init_depends_on_qp() {
        let a = ContextTable::new(20, SliceType::B);
        let b = ContextTable::new(40, SliceType::B);
        assert_ne!(a, b);
    }
}
