use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::ctu::CtuRecord;
use crate::slice::SliceType;
use crate::wp::WeightParam;
use crate::{Error, Result};

/// One sample plane, stored as per-CTU-row stripes. Each stripe has its
/// own lock; during the wavefront every stripe has a single writer (the
/// worker that owns its row), so the locks are uncontended.
#[derive(Debug)]
pub struct Plane {
    width: usize,
    height: usize,
    stripe_height: usize,
    stripes: Vec<Mutex<Vec<u8>>>,
}

impl Plane {
    pub fn new(width: usize, height: usize, stripe_height: usize) -> Self {
        let num_stripes = height.div_ceil(stripe_height).max(1);
        let stripes = (0..num_stripes)
            .map(|i| {
                let top = i * stripe_height;
                let rows = stripe_height.min(height - top);
                Mutex::new(vec![0u8; rows * width])
            })
            .collect();

        Self {
            width,
            height,
            stripe_height,
            stripes,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn stripe_rows(&self, idx: usize) -> usize {
        let top = idx * self.stripe_height;
        self.stripe_height.min(self.height - top)
    }

    pub fn stripe(&self, idx: usize) -> MutexGuard<'_, Vec<u8>> {
        self.stripes[idx].lock().unwrap()
    }

    pub fn fill(&self, value: u8) {
        for stripe in &self.stripes {
            stripe.lock().unwrap().fill(value);
        }
    }

    /// DC (summed sample value) and AC (summed absolute deviation from the
    /// mean), the statistics the weighted prediction estimator runs on.
    pub fn ac_dc(&self) -> (i64, i64) {
        let total = (self.width * self.height) as i64;
        if total == 0 {
            return (0, 0);
        }

        let mut sum = 0i64;
        for stripe in &self.stripes {
            for &s in stripe.lock().unwrap().iter() {
                sum += s as i64;
            }
        }
        let mean = sum / total;

        let mut ac = 0i64;
        for stripe in &self.stripes {
            for &s in stripe.lock().unwrap().iter() {
                ac += (s as i64 - mean).abs();
            }
        }

        (sum, ac)
    }
}

impl Clone for Plane {
    fn clone(&self) -> Self {
        let stripes = self
            .stripes
            .iter()
            .map(|s| Mutex::new(s.lock().unwrap().clone()))
            .collect();
        Self {
            width: self.width,
            height: self.height,
            stripe_height: self.stripe_height,
            stripes,
        }
    }
}

/// A resolved reference picture: its POC and reconstructed luma plane.
#[derive(Debug, Clone)]
pub struct Reference {
    pub poc: i32,
    pub plane: Arc<Plane>,
}

/// Motion reference plane handed to the analyzer, optionally warped by the
/// slice's weighted prediction parameters.
#[derive(Debug, Clone)]
pub struct MotionReference {
    pub poc: i32,
    pub plane: Arc<Plane>,
}

impl MotionReference {
    /// Builds the motion reference for one reference picture. With a
    /// weight param the plane is rewritten as (s * w >> denom) + offset;
    /// otherwise the reconstruction is shared as-is.
    pub fn generate(reference: &Reference, wp: Option<&WeightParam>) -> Self {
        match wp {
            Some(w) if w.enabled => {
                let plane = reference.plane.as_ref().clone();
                let round = if w.log2_denom > 0 { 1i32 << (w.log2_denom - 1) } else { 0 };
                for i in 0..plane.num_stripes() {
                    let mut stripe = plane.stripe(i);
                    for s in stripe.iter_mut() {
                        let v = ((*s as i32 * w.weight + round) >> w.log2_denom) + w.offset;
                        *s = v.clamp(0, 255) as u8;
                    }
                }
                Self {
                    poc: reference.poc,
                    plane: Arc::new(plane),
                }
            }
            _ => Self {
                poc: reference.poc,
                plane: Arc::clone(&reference.plane),
            },
        }
    }
}

/// One input picture and its per-frame encoder state. Owned by the caller;
/// the frame encoder borrows it exclusively for the duration of a single
/// `compress` call.
#[derive(Debug)]
pub struct Picture {
    pub poc: i32,
    pub slice_type: SliceType,

    width: usize,
    height: usize,
    ctu_size: usize,
    width_in_ctu: usize,
    height_in_ctu: usize,

    pub orig: Plane,
    pub recon: Plane,

    pub refs_l0: Vec<Reference>,
    pub refs_l1: Vec<Reference>,

    complete_enc: Vec<AtomicU32>,
    records: Vec<OnceLock<CtuRecord>>,

    motion_field: Vec<[i16; 2]>,
}

impl Picture {
    pub fn new(width: usize, height: usize, ctu_size: usize, poc: i32, slice_type: SliceType) -> Self {
        let width_in_ctu = width.div_ceil(ctu_size);
        let height_in_ctu = height.div_ceil(ctu_size);
        let num_ctus = width_in_ctu * height_in_ctu;

        Self {
            poc,
            slice_type,
            width,
            height,
            ctu_size,
            width_in_ctu,
            height_in_ctu,
            orig: Plane::new(width, height, ctu_size),
            recon: Plane::new(width, height, ctu_size),
            refs_l0: Vec::new(),
            refs_l1: Vec::new(),
            complete_enc: (0..height_in_ctu).map(|_| AtomicU32::new(0)).collect(),
            records: (0..num_ctus).map(|_| OnceLock::new()).collect(),
            motion_field: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn ctu_size(&self) -> usize {
        self.ctu_size
    }

    pub fn width_in_ctu(&self) -> usize {
        self.width_in_ctu
    }

    pub fn height_in_ctu(&self) -> usize {
        self.height_in_ctu
    }

    pub fn num_ctus(&self) -> usize {
        self.records.len()
    }

    pub fn ctu_addr(&self, row: usize, col: usize) -> usize {
        row * self.width_in_ctu + col
    }

    /// Number of CTUs finished in `row`; the acquire pairs with the
    /// release in `advance_complete_enc` so a consumer that observes the
    /// count also observes everything the producer wrote before it.
    pub fn complete_enc(&self, row: usize) -> u32 {
        self.complete_enc[row].load(Ordering::Acquire)
    }

    pub(crate) fn advance_complete_enc(&self, row: usize, value: u32) {
        self.complete_enc[row].store(value, Ordering::Release);
    }

    pub(crate) fn set_record(&self, addr: usize, record: CtuRecord) -> Result<()> {
        self.records[addr]
            .set(record)
            .map_err(|_| Error::InternalState(format!("CTU {addr} analyzed twice")))
    }

    pub fn record(&self, addr: usize) -> Option<&CtuRecord> {
        self.records[addr].get()
    }

    /// Resets the per-frame state before the wavefront launches.
    pub fn reset_frame_state(&mut self) {
        for counter in &self.complete_enc {
            counter.store(0, Ordering::Relaxed);
        }
        for record in &mut self.records {
            record.take();
        }
        self.motion_field.clear();
    }

    /// Decimates the analyzed motion into the per-CTU field kept for
    /// reference-side use. Runs after the frame is fully coded.
    pub fn compress_motion(&mut self) {
        self.motion_field = self
            .records
            .iter()
            .map(|r| r.get().map(|rec| rec.mv).unwrap_or([0, 0]))
            .collect();
    }

    pub fn motion_field(&self) -> &[[i16; 2]] {
        &self.motion_field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_stripes_cover_picture() {
        let plane = Plane::new(130, 70, 64);
        assert_eq!(plane.num_stripes(), 2);
        assert_eq!(plane.stripe_rows(0), 64);
        assert_eq!(plane.stripe_rows(1), 6);
        assert_eq!(plane.stripe(0).len(), 130 * 64);
        assert_eq!(plane.stripe(1).len(), 130 * 6);
    }

    #[test]
    fn test_picture_grid() {
        let pic = Picture::new(130, 130, 64, 0, SliceType::I);
        assert_eq!(pic.width_in_ctu(), 3);
        assert_eq!(pic.height_in_ctu(), 3);
        assert_eq!(pic.num_ctus(), 9);
        assert_eq!(pic.ctu_addr(1, 2), 5);
    }

    #[test]
    fn test_record_single_writer() {
        let pic = Picture::new(64, 64, 64, 0, SliceType::I);
        pic.set_record(0, CtuRecord::default()).unwrap();
        assert!(pic.set_record(0, CtuRecord::default()).is_err());
        assert!(pic.record(0).is_some());
    }

    #[test]
    fn test_reset_frame_state() {
        let mut pic = Picture::new(128, 128, 64, 0, SliceType::I);
        pic.advance_complete_enc(1, 2);
        pic.set_record(3, CtuRecord { mv: [1, -1], ..Default::default() }).unwrap();

        pic.reset_frame_state();
        assert_eq!(pic.complete_enc(1), 0);
        assert!(pic.record(3).is_none());
    }

    #[test]
    fn test_weighted_motion_reference() {
        let plane = Plane::new(8, 8, 64);
        plane.fill(100);
        let reference = Reference { poc: 0, plane: Arc::new(plane) };

        let wp = WeightParam { enabled: true, log2_denom: 6, weight: 128, offset: 3 };
        let mref = MotionReference::generate(&reference, Some(&wp));
        // 100 * 128 >> 6 + 3 = 203
        assert_eq!(mref.plane.stripe(0)[0], 203);

        let plain = MotionReference::generate(&reference, None);
        assert_eq!(plain.plane.stripe(0)[0], 100);
    }

    #[test]
    fn test_plane_ac_dc() {
        let plane = Plane::new(4, 4, 64);
        plane.fill(10);
        let (dc, ac) = plane.ac_dc();
        assert_eq!(dc, 160);
        assert_eq!(ac, 0);
    }
}
