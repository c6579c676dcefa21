use log::debug;

use crate::picture::{Picture, Reference};
use crate::slice::Slice;

/// Explicit weighted prediction parameters for one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightParam {
    pub enabled: bool,
    pub log2_denom: u32,
    pub weight: i32,
    pub offset: i32,
}

impl WeightParam {
    pub const DEFAULT_DENOM: u32 = 6;

    pub fn flat() -> Self {
        Self {
            enabled: false,
            log2_denom: Self::DEFAULT_DENOM,
            weight: 1 << Self::DEFAULT_DENOM,
            offset: 0,
        }
    }
}

impl Default for WeightParam {
    fn default() -> Self {
        Self::flat()
    }
}

/// Saved WP tables, restored onto the slice when the frame is done.
#[derive(Debug, Clone, Default)]
pub struct WpState {
    l0: Vec<WeightParam>,
    l1: Vec<WeightParam>,
    enabled: bool,
}

pub fn store_wp_params(slice: &Slice) -> WpState {
    WpState {
        l0: slice.wp_l0.clone(),
        l1: slice.wp_l1.clone(),
        enabled: slice.wp_enabled,
    }
}

pub fn restore_wp_params(slice: &mut Slice, state: WpState) {
    slice.wp_l0 = state.l0;
    slice.wp_l1 = state.l1;
    slice.wp_enabled = state.enabled;
}

/// Estimates explicit weights per reference from the AC/DC statistics of
/// the current picture against each reference plane.
pub fn estimate_wp_params(slice: &mut Slice, pic: &Picture) {
    let (cur_dc, cur_ac) = pic.orig.ac_dc();
    let total = (pic.width() * pic.height()) as i64;

    let estimate = |refs: &[Reference]| -> Vec<WeightParam> {
        refs.iter()
            .map(|r| {
                let (ref_dc, ref_ac) = r.plane.ac_dc();
                let denom = WeightParam::DEFAULT_DENOM;
                let default_weight = 1i64 << denom;

                let weight = if ref_ac > 0 {
                    ((cur_ac * default_weight + (ref_ac >> 1)) / ref_ac).clamp(-128, 127) as i32
                } else {
                    default_weight as i32
                };

                let offset = if total > 0 {
                    ((cur_dc - ((weight as i64 * ref_dc) >> denom)) / total).clamp(-128, 127) as i32
                } else {
                    0
                };

                WeightParam {
                    enabled: weight != default_weight as i32 || offset != 0,
                    log2_denom: denom,
                    weight,
                    offset,
                }
            })
            .collect()
    };

    slice.wp_l0 = estimate(&pic.refs_l0);
    slice.wp_l1 = estimate(&pic.refs_l1);
    slice.wp_enabled = slice
        .wp_l0
        .iter()
        .chain(slice.wp_l1.iter())
        .any(|w| w.enabled);
}

fn subsampled_sad(pic: &Picture, reference: &Reference, wp: &WeightParam) -> u64 {
    let round = if wp.log2_denom > 0 { 1i32 << (wp.log2_denom - 1) } else { 0 };
    let mut sad = 0u64;

    for i in 0..pic.orig.num_stripes() {
        let orig = pic.orig.stripe(i);
        let refp = reference.plane.stripe(i);
        for idx in (0..orig.len().min(refp.len())).step_by(4) {
            let r = refp[idx] as i32;
            let warped = if wp.enabled {
                (((r * wp.weight + round) >> wp.log2_denom) + wp.offset).clamp(0, 255)
            } else {
                r
            };
            sad += (orig[idx] as i32 - warped).unsigned_abs() as u64;
        }
    }

    sad
}

/// Keeps WP only when the weighted references predict the picture better
/// than the plain ones on a subsampled grid.
pub fn check_wp_enable(slice: &mut Slice, pic: &Picture) {
    if !slice.wp_enabled {
        return;
    }

    let mut plain = 0u64;
    let mut weighted = 0u64;

    for (refs, wps) in [(&pic.refs_l0, &slice.wp_l0), (&pic.refs_l1, &slice.wp_l1)] {
        for (r, wp) in refs.iter().zip(wps.iter()) {
            plain += subsampled_sad(pic, r, &WeightParam::flat());
            weighted += subsampled_sad(pic, r, wp);
        }
    }

    if weighted >= plain {
        debug!(
            "disabling WP: weighted sad {} >= plain sad {}",
            weighted, plain
        );
        slice.wp_enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::picture::{Plane, Reference};
    use crate::slice::SliceType;
    use std::sync::Arc;

    fn pic_with_ref(orig_level: u8, ref_level: u8) -> Picture {
        let mut pic = Picture::new(64, 64, 64, 2, SliceType::P);
        pic.orig.fill(orig_level);

        let plane = Plane::new(64, 64, 64);
        plane.fill(ref_level);
        pic.refs_l0.push(Reference { poc: 0, plane: Arc::new(plane) });
        pic
    }

    fn p_slice(pic: &Picture) -> Slice {
        let cfg = EncoderConfig::new(64, 64);
        Slice::initialize(&cfg, SliceType::P, pic.poc, 1, vec![0], vec![]).unwrap()
    }

    #[test]
    fn test_identical_reference_gets_default_weights() {
        let pic = pic_with_ref(90, 90);
        let mut slice = p_slice(&pic);

        estimate_wp_params(&mut slice, &pic);
        assert!(!slice.wp_enabled);
        assert_eq!(slice.wp_l0[0].weight, 64);
        assert_eq!(slice.wp_l0[0].offset, 0);
    }

    #[test]
    fn test_brightness_shift_estimates_offset() {
        let pic = pic_with_ref(120, 100);
        let mut slice = p_slice(&pic);

        estimate_wp_params(&mut slice, &pic);
        assert!(slice.wp_enabled);
        assert_eq!(slice.wp_l0[0].offset, 20);

        // The offset fully explains the shift, so the check keeps WP on.
        check_wp_enable(&mut slice, &pic);
        assert!(slice.wp_enabled);
    }

    #[test]
    fn test_unprofitable_weights_are_disabled() {
        let pic = pic_with_ref(100, 100);
        let mut slice = p_slice(&pic);

        slice.wp_l0 = vec![WeightParam { enabled: true, log2_denom: 6, weight: 32, offset: -10 }];
        slice.wp_enabled = true;

        check_wp_enable(&mut slice, &pic);
        assert!(!slice.wp_enabled);
    }

    #[test]
    fn test_store_restore_round_trip() {
        let pic = pic_with_ref(120, 100);
        let mut slice = p_slice(&pic);

        let saved = store_wp_params(&slice);
        estimate_wp_params(&mut slice, &pic);
        assert!(slice.wp_enabled);

        restore_wp_params(&mut slice, saved);
        assert!(!slice.wp_enabled);
        assert!(slice.wp_l0.is_empty());
    }
}
