//! Go-Back-N send-side window.
//!
//! [`SenderWindow`] holds every segment of one send session, numbered
//! `1..=N`, and the two cursors that partition them.
//!
//! # Protocol contract
//!
//! - At most `window_size` segments are in flight at once.
//! - ACKs are **cumulative**: an ACK for `K` confirms every segment `<= K`.
//! - On timeout, the caller retransmits **every** segment from `base` to the
//!   window edge (go back to N), not just the missing one.
//! - `base` only moves forward, and only because of an ACK.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::net::SocketAddr;
use std::ops::Range;

use crate::segment::OutboundSegment;

/// Most segments one session can carry; `N + 1` must still fit in a `u32`.
pub const MAX_SEGMENTS: u32 = u32::MAX - 1;

/// `count` as a session length, or `None` if it exceeds [`MAX_SEGMENTS`].
pub fn session_len(count: usize) -> Option<u32> {
    u32::try_from(count).ok().filter(|&n| n <= MAX_SEGMENTS)
}

// ---------------------------------------------------------------------------
// WindowEntry
// ---------------------------------------------------------------------------

/// One framed segment and its transmission history.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub segment: OutboundSegment,
    /// Times handed to the impairment engine (eliminated sends included).
    pub tx_count: u32,
}

/// Effect of one inbound ACK on the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// `base` moved forward by `acked` segments.
    Advanced { acked: u32 },
    /// Below `base`; everything it covers is already confirmed.
    AlreadyConfirmed,
    /// For a segment never transmitted.
    Spurious,
}

// ---------------------------------------------------------------------------
// SenderWindow
// ---------------------------------------------------------------------------

/// Go-Back-N send state for one session.
///
/// # Sequence-number layout
///
/// ```text
///   1            base          next_seq        base+W          N+1
///   │  acked      │  in flight    │  sendable    │  waiting     │
///  ─┼─────────────┼───────────────┼──────────────┼──────────────┼─▶
/// ```
///
/// Invariant: `1 <= base <= next_seq <= N + 1`.
#[derive(Debug)]
pub struct SenderWindow {
    /// `entries[i]` carries sequence number `i + 1`.
    entries: Vec<WindowEntry>,
    base: u32,
    next_seq: u32,
    window_size: u32,
}

impl SenderWindow {
    /// Frame `payloads` as sequence numbers `1..=N` bound for `destination`.
    pub fn new<I>(destination: SocketAddr, payloads: I, window_size: u32) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let entries = payloads
            .into_iter()
            .zip(1u32..)
            .map(|(payload, seq)| WindowEntry {
                segment: OutboundSegment::data(seq, payload.as_ref(), destination),
                tx_count: 0,
            })
            .collect();
        Self {
            entries,
            base: 1,
            next_seq: 1,
            window_size: window_size.max(1),
        }
    }

    /// Number of segments (N).
    pub fn len(&self) -> u32 {
        u32::try_from(self.entries.len()).unwrap_or(u32::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest unacknowledged sequence number.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Next never-transmitted sequence number.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Segments transmitted but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.next_seq - self.base
    }

    /// `true` once every segment is acknowledged (`base == N + 1`).
    pub fn is_complete(&self) -> bool {
        self.base > self.len()
    }

    /// Exclusive right edge of the window: `min(base + W, N + 1)`.
    pub fn window_end(&self) -> u32 {
        self.base
            .saturating_add(self.window_size)
            .min(self.len().saturating_add(1))
    }

    pub fn entry(&self, seq: u32) -> Option<&WindowEntry> {
        let idx = seq.checked_sub(1)? as usize;
        self.entries.get(idx)
    }

    pub fn segment(&self, seq: u32) -> Option<&OutboundSegment> {
        self.entry(seq).map(|e| &e.segment)
    }

    /// Claim the newly eligible segments `[next_seq, window_end)` and move
    /// `next_seq` past them.  Empty when the window is full.
    pub fn take_sendable(&mut self) -> Range<u32> {
        let end = self.window_end().max(self.next_seq);
        let range = self.next_seq..end;
        self.next_seq = end;
        range
    }

    /// Go-Back-N step: the whole window `[base, window_end)`.
    ///
    /// `next_seq` is pulled up to the window edge so segments inside the
    /// range count as transmitted from here on.
    pub fn take_outstanding(&mut self) -> Range<u32> {
        let end = self.window_end();
        self.next_seq = self.next_seq.max(end);
        self.base..end
    }

    /// Record one hand-off of `seq` to the impairment engine.
    ///
    /// Returns `true` when this is a retransmission.
    pub fn record_transmission(&mut self, seq: u32) -> bool {
        let Some(entry) = seq
            .checked_sub(1)
            .and_then(|idx| self.entries.get_mut(idx as usize))
        else {
            return false;
        };
        entry.tx_count += 1;
        entry.tx_count > 1
    }

    /// Total transmissions beyond the first, across all segments.
    pub fn retransmissions(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| u64::from(e.tx_count.saturating_sub(1)))
            .sum()
    }

    /// Process a cumulative ACK for `ack`.
    pub fn on_ack(&mut self, ack: u32) -> AckOutcome {
        if ack < self.base {
            return AckOutcome::AlreadyConfirmed;
        }
        if ack >= self.next_seq {
            return AckOutcome::Spurious;
        }
        let acked = ack + 1 - self.base;
        self.base = ack + 1;
        AckOutcome::Advanced { acked }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
