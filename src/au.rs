use crate::nal::NalUnit;

/// An ordered list of NAL units produced for one point in the stream:
/// either the stream headers or one coded picture (prefix SEIs followed by
/// the slice NAL).
#[derive(Debug, Clone, Default)]
pub struct AccessUnit {
    pub nals: Vec<NalUnit>,
}

impl AccessUnit {
    pub fn new() -> Self {
        Self { nals: Vec::new() }
    }

    pub fn push(&mut self, nal: NalUnit) {
        self.nals.push(nal);
    }

    pub fn nals(&self) -> impl Iterator<Item = &NalUnit> {
        self.nals.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.nals.is_empty()
    }

    pub fn is_keyframe(&self) -> bool {
        self.nals.iter().any(|n| n.nal_type.is_irap())
    }

    /// Moves all NAL units onto the end of `other`, leaving this unit empty.
    pub fn splice_into(&mut self, other: &mut AccessUnit) {
        other.nals.append(&mut self.nals);
    }

    pub fn to_annexb_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        for nal in &self.nals {
            bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            bytes.extend_from_slice(&nal.to_ebsp());
        }

        bytes
    }
}
