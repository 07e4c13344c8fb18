//! Go-Back-N receive-side state machine.
//!
//! [`ReceiverLedger`] tracks one peer's data stream:
//!
//! - Only the segment whose number equals `expected_seq` is **accepted**; the
//!   cursor then advances by exactly one.
//! - A segment already accepted is a **duplicate**: discarded, counted, and
//!   never re-ACKed.  A lost ACK is recovered by a later cumulative ACK or not
//!   at all; the receiver does not answer retransmissions of accepted data.
//! - Any other segment is **out of order**: discarded, and answered with an
//!   ACK for `expected_seq - 1` so the sender goes back to the gap.
//!
//! [`Receiver`] keeps one ledger per remote address.  This module only
//! manages state; all socket I/O is the caller's responsibility.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// What to do with an intact data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVerdict {
    /// Hand the payload to the application and ACK `ack` (the segment itself).
    Deliver { ack: u32 },
    /// Drop the payload and re-affirm the last in-order segment.
    OutOfOrder { ack: u32 },
    /// Already accepted; drop silently.
    Duplicate,
}

/// Go-Back-N receive state for one peer.
#[derive(Debug)]
pub struct ReceiverLedger {
    /// Next sequence number that may be delivered.  Starts at 1.
    expected_seq: u32,
    /// Every sequence number accepted so far.
    seen: HashSet<u32>,
}

impl Default for ReceiverLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverLedger {
    pub fn new() -> Self {
        Self {
            expected_seq: 1,
            seen: HashSet::new(),
        }
    }

    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn has_seen(&self, seq: u32) -> bool {
        self.seen.contains(&seq)
    }

    /// Number of segments accepted (and delivered) so far.
    pub fn accepted(&self) -> usize {
        self.seen.len()
    }

    /// Classify an intact data segment and update the cursor.
    pub fn on_data(&mut self, seq: u32) -> DataVerdict {
        if self.seen.contains(&seq) {
            return DataVerdict::Duplicate;
        }
        if seq == self.expected_seq {
            self.seen.insert(seq);
            self.expected_seq += 1;
            DataVerdict::Deliver { ack: seq }
        } else {
            DataVerdict::OutOfOrder {
                ack: self.expected_seq - 1,
            }
        }
    }
}

/// One [`ReceiverLedger`] per remote peer.
#[derive(Debug, Default)]
pub struct Receiver {
    ledgers: HashMap<SocketAddr, ReceiverLedger>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data(&mut self, peer: SocketAddr, seq: u32) -> DataVerdict {
        self.ledgers.entry(peer).or_default().on_data(seq)
    }

    pub fn ledger(&self, peer: &SocketAddr) -> Option<&ReceiverLedger> {
        self.ledgers.get(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &SocketAddr> {
        self.ledgers.keys()
    }
}
