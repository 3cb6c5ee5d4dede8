//! Wire format for LL data channel PDUs.
//!
//! A frame models the on-air bytes between preamble and end of packet:
//!
//! ```text
//! [access address: 4 LE] [header: 2] [payload: 0..=251] [crc: 3 LE]
//!
//! header byte 0: LLID (bits 0-1) | NESN (bit 2) | SN (bit 3) | MD (bit 4)
//! header byte 1: payload length
//! ```
//!
//! A frame whose CRC does not match decodes successfully with `crc_ok =
//! false`; the receiver treats that as a corrupted reception, not a protocol
//! error. Structurally malformed frames return [`DecodeError`].

use crate::channel::ChannelMap;
use crate::types::{
    AccessAddress, LLID_CONTROL, LLID_DATA_CONTINUATION, MAX_PAYLOAD_LEN, OPCODE_CHANNEL_MAP_IND,
};

const HEADER_LEN: usize = 2;
const CRC_LEN: usize = 3;
const AA_LEN: usize = 4;

const LLID_MASK: u8 = 0x03;
const NESN_BIT: u8 = 0x04;
const SN_BIT: u8 = 0x08;
const MD_BIT: u8 = 0x10;

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame shorter than access address + header + CRC.
    UnexpectedEof,
    /// Header length field disagrees with the frame size.
    LengthMismatch,
    /// Payload length field exceeds the LL maximum.
    PayloadTooLong,
    /// Control payload carries an opcode this codec does not model.
    UnknownOpcode,
}

/// CRC-24 over the header and payload.
///
/// Polynomial x^24 + x^10 + x^9 + x^6 + x^4 + x^3 + x + 1, right-shifting
/// reflected form 0xDA6000. The init value is the per-connection CRC seed,
/// bit-reversed for the reflected algorithm.
pub fn crc24(data: &[u8], init: u32) -> u32 {
    let mut crc = reflect24(init & 0xFF_FFFF);

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xDA6000;
            } else {
                crc >>= 1;
            }
        }
    }

    crc & 0xFF_FFFF
}

/// Reflect (bit-reverse) a 24-bit value.
fn reflect24(mut v: u32) -> u32 {
    let mut result: u32 = 0;
    for _ in 0..24 {
        result = (result << 1) | (v & 1);
        v >>= 1;
    }
    result
}

/// An LL data channel PDU (data or control, before framing).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPdu {
    pub llid: u8,
    pub nesn: bool,
    pub sn: bool,
    pub md: bool,
    pub payload: Vec<u8>,
}

impl DataPdu {
    /// The empty PDU used to keep an exchange alive when no data is queued.
    pub fn empty(nesn: bool, sn: bool, md: bool) -> Self {
        Self {
            llid: LLID_DATA_CONTINUATION,
            nesn,
            sn,
            md,
            payload: Vec::new(),
        }
    }

    /// True when this PDU carries no payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// True for LL control PDUs.
    pub fn is_control(&self) -> bool {
        self.llid == LLID_CONTROL
    }

    fn header(&self) -> [u8; 2] {
        let mut b0 = self.llid & LLID_MASK;
        if self.nesn {
            b0 |= NESN_BIT;
        }
        if self.sn {
            b0 |= SN_BIT;
        }
        if self.md {
            b0 |= MD_BIT;
        }
        [b0, self.payload.len() as u8]
    }
}

/// LL control PDUs carried with `LLID_CONTROL`.
///
/// Only the Channel Map Indication is modelled; it is the single control
/// procedure the connection machine runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlPdu {
    /// New channel map taking effect at the event counter `instant`.
    ChannelMapInd { map: ChannelMap, instant: u16 },
}

impl ControlPdu {
    /// Serialize to a control payload (opcode + CtrData).
    pub fn encode(self) -> Vec<u8> {
        match self {
            ControlPdu::ChannelMapInd { map, instant } => {
                let mut out = Vec::with_capacity(8);
                out.push(OPCODE_CHANNEL_MAP_IND);
                out.extend_from_slice(&map.to_bytes());
                out.extend_from_slice(&instant.to_le_bytes());
                out
            }
        }
    }

    /// Parse a control payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let (&opcode, rest) = payload.split_first().ok_or(DecodeError::UnexpectedEof)?;
        match opcode {
            OPCODE_CHANNEL_MAP_IND => {
                if rest.len() < 7 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let map_bytes: [u8; 5] = rest[..5].try_into().unwrap();
                let instant = u16::from_le_bytes([rest[5], rest[6]]);
                Ok(ControlPdu::ChannelMapInd {
                    map: ChannelMap::from_bytes(&map_bytes),
                    instant,
                })
            }
            _ => Err(DecodeError::UnknownOpcode),
        }
    }
}

/// A decoded frame. `crc_ok == false` marks a corrupted reception whose
/// header and payload must not be trusted.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub access_address: AccessAddress,
    pub pdu: DataPdu,
    pub crc_ok: bool,
}

/// Encode a PDU into a frame for the given connection.
pub fn encode_frame(aa: AccessAddress, crc_init: u32, pdu: &DataPdu) -> Vec<u8> {
    debug_assert!(pdu.payload.len() <= MAX_PAYLOAD_LEN);
    let mut frame = Vec::with_capacity(AA_LEN + HEADER_LEN + pdu.payload.len() + CRC_LEN);
    frame.extend_from_slice(&aa.0.to_le_bytes());
    frame.extend_from_slice(&pdu.header());
    frame.extend_from_slice(&pdu.payload);
    let crc = crc24(&frame[AA_LEN..], crc_init);
    frame.extend_from_slice(&crc.to_le_bytes()[..3]);
    frame
}

/// Decode a frame, validating the CRC against the connection seed.
pub fn decode_frame(crc_init: u32, frame: &[u8]) -> Result<DecodedFrame, DecodeError> {
    if frame.len() < AA_LEN + HEADER_LEN + CRC_LEN {
        return Err(DecodeError::UnexpectedEof);
    }
    let aa = AccessAddress(u32::from_le_bytes(frame[..AA_LEN].try_into().unwrap()));

    let b0 = frame[AA_LEN];
    let len = frame[AA_LEN + 1] as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(DecodeError::PayloadTooLong);
    }
    if frame.len() != AA_LEN + HEADER_LEN + len + CRC_LEN {
        return Err(DecodeError::LengthMismatch);
    }

    let payload_end = AA_LEN + HEADER_LEN + len;
    let computed = crc24(&frame[AA_LEN..payload_end], crc_init);
    let received = frame[payload_end] as u32
        | ((frame[payload_end + 1] as u32) << 8)
        | ((frame[payload_end + 2] as u32) << 16);

    Ok(DecodedFrame {
        access_address: aa,
        pdu: DataPdu {
            llid: b0 & LLID_MASK,
            nesn: b0 & NESN_BIT != 0,
            sn: b0 & SN_BIT != 0,
            md: b0 & MD_BIT != 0,
            payload: frame[AA_LEN + HEADER_LEN..payload_end].to_vec(),
        },
        crc_ok: computed == received,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LLID_DATA_START;

    const AA: AccessAddress = AccessAddress(0x487647F2);
    const SEED: u32 = 0x555555;

    #[test]
    fn test_data_pdu_roundtrip() {
        let pdu = DataPdu {
            llid: LLID_DATA_START,
            nesn: true,
            sn: false,
            md: true,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let frame = encode_frame(AA, SEED, &pdu);
        let decoded = decode_frame(SEED, &frame).unwrap();
        assert!(decoded.crc_ok);
        assert_eq!(decoded.access_address, AA);
        assert_eq!(decoded.pdu, pdu);
    }

    #[test]
    fn test_empty_pdu_roundtrip() {
        let pdu = DataPdu::empty(false, true, false);
        let frame = encode_frame(AA, SEED, &pdu);
        assert_eq!(frame.len(), 4 + 2 + 3);
        let decoded = decode_frame(SEED, &frame).unwrap();
        assert!(decoded.crc_ok);
        assert!(decoded.pdu.is_empty());
        assert_eq!(decoded.pdu.sn, true);
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let pdu = DataPdu {
            llid: LLID_DATA_START,
            nesn: false,
            sn: false,
            md: false,
            payload: vec![1, 2, 3, 4, 5],
        };
        let mut frame = encode_frame(AA, SEED, &pdu);
        frame[7] ^= 0x40;
        let decoded = decode_frame(SEED, &frame).unwrap();
        assert!(!decoded.crc_ok);
    }

    #[test]
    fn test_wrong_seed_fails_crc() {
        let pdu = DataPdu::empty(false, false, false);
        let frame = encode_frame(AA, SEED, &pdu);
        let decoded = decode_frame(0x123456, &frame).unwrap();
        assert!(!decoded.crc_ok);
    }

    #[test]
    fn test_truncated_frame_rejected() {
        assert!(matches!(
            decode_frame(SEED, &[0u8; 5]),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let pdu = DataPdu::empty(false, false, false);
        let mut frame = encode_frame(AA, SEED, &pdu);
        frame[5] = 10; // claims 10 payload bytes that are not there
        assert!(matches!(
            decode_frame(SEED, &frame),
            Err(DecodeError::LengthMismatch)
        ));
    }

    #[test]
    fn test_channel_map_ind_roundtrip() {
        let map = ChannelMap::from_channels(5..37);
        let ctrl = ControlPdu::ChannelMapInd { map, instant: 42 };
        let payload = ctrl.encode();
        assert_eq!(payload.len(), 8);
        assert_eq!(ControlPdu::decode(&payload).unwrap(), ctrl);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert_eq!(
            ControlPdu::decode(&[0x7F, 0, 0]),
            Err(DecodeError::UnknownOpcode)
        );
    }
}
