use crate::bitwriter::BitWriter;
use crate::eg::{write_se, write_ue};
use crate::Result;

/// SEI payloads this encoder emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeiPayload {
    ActiveParameterSets {
        active_video_parameter_set_id: u8,
        self_contained_cvs_flag: bool,
        no_parameter_set_update_flag: bool,
        active_seq_parameter_set_ids: Vec<u8>,
    },
    DisplayOrientation {
        hor_flip: bool,
        ver_flip: bool,
        anticlockwise_rotation: u16,
    },
    RecoveryPoint {
        recovery_poc_cnt: i32,
        exact_match_flag: bool,
        broken_link_flag: bool,
    },
    GradualDecodingRefresh {
        gdr_foreground_flag: bool,
    },
}

impl SeiPayload {
    pub fn payload_type(&self) -> u32 {
        match self {
            SeiPayload::RecoveryPoint { .. } => 6,
            SeiPayload::DisplayOrientation { .. } => 47,
            SeiPayload::ActiveParameterSets { .. } => 129,
            SeiPayload::GradualDecodingRefresh { .. } => 133,
        }
    }

    fn write_payload(&self, bw: &mut BitWriter) -> Result<()> {
        match self {
            SeiPayload::ActiveParameterSets {
                active_video_parameter_set_id,
                self_contained_cvs_flag,
                no_parameter_set_update_flag,
                active_seq_parameter_set_ids,
            } => {
                bw.write_bits(4, *active_video_parameter_set_id as u32)?;
                bw.write_flag(*self_contained_cvs_flag);
                bw.write_flag(*no_parameter_set_update_flag);
                write_ue(bw, active_seq_parameter_set_ids.len().saturating_sub(1) as u32);
                for id in active_seq_parameter_set_ids {
                    write_ue(bw, *id as u32);
                }
            }
            SeiPayload::DisplayOrientation {
                hor_flip,
                ver_flip,
                anticlockwise_rotation,
            } => {
                bw.write_flag(false); // display_orientation_cancel_flag
                bw.write_flag(*hor_flip);
                bw.write_flag(*ver_flip);
                bw.write_u16(*anticlockwise_rotation);
                bw.write_flag(false); // display_orientation_persistence_flag
            }
            SeiPayload::RecoveryPoint {
                recovery_poc_cnt,
                exact_match_flag,
                broken_link_flag,
            } => {
                write_se(bw, *recovery_poc_cnt);
                bw.write_flag(*exact_match_flag);
                bw.write_flag(*broken_link_flag);
            }
            SeiPayload::GradualDecodingRefresh { gdr_foreground_flag } => {
                bw.write_flag(*gdr_foreground_flag);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SeiMessage {
    pub payload: SeiPayload,
}

impl SeiMessage {
    pub fn new(payload: SeiPayload) -> Self {
        Self { payload }
    }

    /// sei_message(): ff-coded payload type and size, then the payload
    /// bytes with their own byte alignment.
    pub fn write(&self, bw: &mut BitWriter) -> Result<()> {
        let mut payload_bw = BitWriter::new();
        self.payload.write_payload(&mut payload_bw)?;
        if !payload_bw.byte_aligned() {
            payload_bw.write_byte_alignment();
        }
        let payload_bytes = payload_bw.into_bytes();

        let mut value = self.payload.payload_type();
        while value >= 255 {
            bw.write_u8(0xff);
            value -= 255;
        }
        bw.write_u8(value as u8);

        let mut value = payload_bytes.len() as u32;
        while value >= 255 {
            bw.write_u8(0xff);
            value -= 255;
        }
        bw.write_u8(value as u8);

        for byte in payload_bytes {
            bw.write_u8(byte);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_point_message() {
        let msg = SeiMessage::new(SeiPayload::RecoveryPoint {
            recovery_poc_cnt: 0,
            exact_match_flag: true,
            broken_link_flag: false,
        });

        let mut bw = BitWriter::new();
        msg.write(&mut bw).unwrap();
        let bytes = bw.into_bytes();

        assert_eq!(bytes[0], 6); // payload type
        assert_eq!(bytes[1], 1); // one payload byte
        // se(0) = '1', exact_match = '1', broken_link = '0', then alignment
        assert_eq!(bytes[2], 0b11010000);
    }

    #[test]
    fn test_active_parameter_sets_message() {
        let msg = SeiMessage::new(SeiPayload::ActiveParameterSets {
            active_video_parameter_set_id: 0,
            self_contained_cvs_flag: false,
            no_parameter_set_update_flag: false,
            active_seq_parameter_set_ids: vec![0],
        });

        let mut bw = BitWriter::new();
        msg.write(&mut bw).unwrap();
        let bytes = bw.into_bytes();

        assert_eq!(bytes[0], 129);
        assert!(bytes[1] >= 1);
    }

    #[test]
    fn test_payload_types() {
        let rp = SeiPayload::RecoveryPoint {
            recovery_poc_cnt: 0,
            exact_match_flag: false,
            broken_link_flag: false,
        };
        assert_eq!(rp.payload_type(), 6);

        let gdr = SeiPayload::GradualDecodingRefresh { gdr_foreground_flag: true };
        assert_eq!(gdr.payload_type(), 133);
    }
}
