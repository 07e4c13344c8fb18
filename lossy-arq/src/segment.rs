//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (checksum, sequence number, ACK flag,
//!   payload).
//! - Serialising a segment into a byte buffer ready for the impairment engine.
//! - Deserialising a raw byte slice back into a [`Segment`], reporting
//!   integrity failures without discarding the parsed contents.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All header fields are 32-bit **big-endian** integers.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Checksum                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       ACK Flag (0 or 1)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The checksum is the wrapping 32-bit sum of every byte following it
//! (sequence number, flag and payload), each byte taken as `0..=255`.  It
//! catches any single-byte increment but is blind to byte permutations.

use std::borrow::Cow;
use std::net::SocketAddr;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Receive-buffer capacity for one datagram.  Anything longer is cut.
pub const MAX_DATAGRAM: usize = 1024;

/// Largest payload that fits in a single datagram.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_CHECKSUM: usize = 0;
const OFF_SEQ: usize = 4;
const OFF_ACK_FLAG: usize = 8;

/// A decoded protocol datagram: header fields + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Checksum as carried on the wire.
    pub checksum: u32,
    /// Data segments are numbered `1..=N`; ACKs carry the acknowledged number.
    pub sequence_number: u32,
    pub is_ack: bool,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Build a segment with a freshly computed checksum.
    pub fn new(sequence_number: u32, is_ack: bool, payload: Vec<u8>) -> Self {
        let checksum = additive_checksum(&[
            &sequence_number.to_be_bytes(),
            &ack_flag(is_ack).to_be_bytes(),
            &payload,
        ]);
        Self {
            checksum,
            sequence_number,
            is_ack,
            payload,
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The checksum is recomputed from the other fields; whatever is stored
    /// in `self.checksum` is ignored.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.payload, self.sequence_number, self.is_ack)
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the checksum does not verify, or
    /// - the ACK flag is neither 0 nor 1.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::Truncated { len: buf.len() });
        }

        let checksum = read_u32(buf, OFF_CHECKSUM);
        let sequence_number = read_u32(buf, OFF_SEQ);
        let flag = read_u32(buf, OFF_ACK_FLAG);

        // seq ‖ flag ‖ payload is contiguous on the wire.
        let computed = additive_checksum(&[&buf[OFF_SEQ..]]);
        let segment = Segment {
            checksum,
            sequence_number,
            is_ack: flag == 1,
            payload: buf[HEADER_LEN..].to_vec(),
        };

        if computed != checksum {
            return Err(SegmentError::ChecksumMismatch {
                segment: Box::new(segment),
                computed,
            });
        }
        if flag > 1 {
            return Err(SegmentError::InvalidAckFlag { value: flag });
        }
        Ok(segment)
    }

    /// Payload rendered for log lines.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Serialise `payload` under `sequence_number` into wire bytes.
pub fn encode(payload: &[u8], sequence_number: u32, is_ack: bool) -> Vec<u8> {
    let seq = sequence_number.to_be_bytes();
    let flag = ack_flag(is_ack).to_be_bytes();
    let checksum = additive_checksum(&[&seq, &flag, payload]);

    let mut buf = vec![0u8; HEADER_LEN + payload.len()];
    buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&checksum.to_be_bytes());
    buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&seq);
    buf[OFF_ACK_FLAG..OFF_ACK_FLAG + 4].copy_from_slice(&flag);
    buf[HEADER_LEN..].copy_from_slice(payload);
    buf
}

/// Wrapping byte-wise sum over every slice in `parts`.
pub fn additive_checksum(parts: &[&[u8]]) -> u32 {
    parts
        .iter()
        .flat_map(|part| part.iter())
        .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}

fn ack_flag(is_ack: bool) -> u32 {
    u32::from(is_ack)
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Integrity failures detected while parsing a raw datagram.
///
/// None of these are fatal: the receive path counts them and treats the
/// datagram as lost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    /// Datagram shorter than the fixed header (cut below 12 bytes).
    #[error("segment truncated to {len} bytes")]
    Truncated { len: usize },
    /// Carried checksum disagrees with the recomputed sum.  The parsed
    /// segment is kept for logging and must not be delivered.
    #[error(
        "checksum mismatch on seq {}: carried {:#010x}, computed {computed:#010x}",
        .segment.sequence_number,
        .segment.checksum
    )]
    ChecksumMismatch { segment: Box<Segment>, computed: u32 },
    /// Checksum verified but the flag word is not 0/1 (a checksum collision).
    #[error("invalid ACK flag {value}")]
    InvalidAckFlag { value: u32 },
}

// ---------------------------------------------------------------------------
// OutboundSegment
// ---------------------------------------------------------------------------

/// An encoded segment bound for one destination.
///
/// This is what the impairment engine operates on; `raw` is cloned per
/// transmission so retransmissions always start from pristine bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSegment {
    pub sequence_number: u32,
    pub is_ack: bool,
    pub destination: SocketAddr,
    pub raw: Vec<u8>,
}

impl OutboundSegment {
    pub fn data(sequence_number: u32, payload: &[u8], destination: SocketAddr) -> Self {
        Self {
            sequence_number,
            is_ack: false,
            destination,
            raw: encode(payload, sequence_number, false),
        }
    }

    /// Cumulative ACK for everything up to and including `sequence_number`.
    pub fn ack(sequence_number: u32, destination: SocketAddr) -> Self {
        Self {
            sequence_number,
            is_ack: true,
            destination,
            raw: encode(&[], sequence_number, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let cases: [(&[u8], u32, bool); 4] = [
            (b"hello", 1, false),
            (b"", 7, true),
            (&[0xff; 32], u32::MAX, false),
            ("olá mundo".as_bytes(), 1000, false),
        ];
        for (payload, seq, is_ack) in cases {
            let decoded = Segment::decode(&encode(payload, seq, is_ack)).unwrap();
            assert_eq!(decoded.payload, payload);
            assert_eq!(decoded.sequence_number, seq);
            assert_eq!(decoded.is_ack, is_ack);
        }
    }

    #[test]
    fn checksum_is_plain_byte_sum() {
        // seq=1 contributes 1, flag=0 contributes 0, 'A' contributes 65.
        let bytes = encode(b"A", 1, false);
        assert_eq!(&bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4], &66u32.to_be_bytes());
        assert_eq!(Segment::new(1, false, b"A".to_vec()).checksum, 66);
    }

    #[test]
    fn header_fields_big_endian_on_wire() {
        let bytes = encode(b"", 0x0102_0304, true);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK_FLAG..OFF_ACK_FLAG + 4], &[0, 0, 0, 1]);
        assert_eq!(bytes.len(), HEADER_LEN);
    }

    #[test]
    fn any_single_byte_increment_is_detected() {
        let clean = encode(b"msg-3 with some text", 3, false);
        for i in 0..clean.len() {
            let mut bytes = clean.clone();
            bytes[i] = bytes[i].wrapping_add(1);
            assert!(
                matches!(Segment::decode(&bytes), Err(SegmentError::ChecksumMismatch { .. })),
                "increment at byte {i} went unnoticed"
            );
        }
    }

    #[test]
    fn wrapping_increment_of_ff_is_detected() {
        let mut bytes = encode(&[0xff, 0x10], 1, false);
        bytes[HEADER_LEN] = bytes[HEADER_LEN].wrapping_add(1); // 0xff -> 0x00
        assert!(matches!(
            Segment::decode(&bytes),
            Err(SegmentError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn swapped_bytes_collide() {
        // Known weakness: the sum is order-independent, so a permutation of
        // payload bytes passes verification with the wrong content.
        let mut bytes = encode(b"ab", 9, false);
        bytes.swap(HEADER_LEN, HEADER_LEN + 1);
        let decoded = Segment::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, b"ba");
    }

    #[test]
    fn compensating_edits_collide() {
        // +1 on one byte and -1 on another also preserves the sum.
        let mut bytes = encode(b"mm", 2, false);
        bytes[HEADER_LEN] += 1;
        bytes[HEADER_LEN + 1] -= 1;
        assert_eq!(Segment::decode(&bytes).unwrap().payload, b"nl");
    }

    #[test]
    fn mismatch_still_exposes_payload() {
        let mut bytes = encode(b"inspect me", 5, false);
        bytes[HEADER_LEN] ^= 0x01;
        match Segment::decode(&bytes) {
            Err(SegmentError::ChecksumMismatch { segment, computed }) => {
                assert_eq!(segment.sequence_number, 5);
                assert_eq!(segment.payload_text(), "hnspect me");
                assert_ne!(segment.checksum, computed);
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn cut_segment_fails_integrity() {
        let mut bytes = encode(b"this will be cut short", 4, false);
        bytes.truncate(HEADER_LEN + 3);
        assert!(matches!(
            Segment::decode(&bytes),
            Err(SegmentError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn cut_below_header_is_truncated() {
        assert_eq!(Segment::decode(&[]), Err(SegmentError::Truncated { len: 0 }));
        let bytes = encode(b"x", 1, false);
        assert_eq!(
            Segment::decode(&bytes[..HEADER_LEN - 1]),
            Err(SegmentError::Truncated { len: HEADER_LEN - 1 })
        );
    }

    #[test]
    fn bogus_flag_with_valid_sum_rejected() {
        // flag=2 with the checksum patched to match.
        let mut bytes = encode(b"", 1, false);
        bytes[OFF_ACK_FLAG + 3] = 2;
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&3u32.to_be_bytes());
        assert_eq!(
            Segment::decode(&bytes),
            Err(SegmentError::InvalidAckFlag { value: 2 })
        );
    }

    #[test]
    fn outbound_ack_has_empty_payload() {
        let dest: SocketAddr = "127.0.0.1:4321".parse().unwrap();
        let ack = OutboundSegment::ack(12, dest);
        assert_eq!(ack.raw.len(), HEADER_LEN);
        let decoded = Segment::decode(&ack.raw).unwrap();
        assert!(decoded.is_ack);
        assert_eq!(decoded.sequence_number, 12);
    }

    #[test]
    fn max_payload_fills_datagram() {
        let dest: SocketAddr = "127.0.0.1:4321".parse().unwrap();
        let seg = OutboundSegment::data(1, &[b'x'; MAX_PAYLOAD], dest);
        assert_eq!(seg.raw.len(), MAX_DATAGRAM);
    }
}
