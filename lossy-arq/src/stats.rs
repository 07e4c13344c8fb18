//! Per-peer counters and per-session summaries.
//!
//! Every transmission and every received datagram is attributed to the remote
//! address it went to or came from.  A session (one `send_reliable` or one
//! `receive_loop`) collects into its own [`StatsRegistry`]; when the session
//! ends the registry is folded into the channel's cumulative registry and a
//! [`SessionStats`] snapshot is returned to the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Counters for one remote peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    // --- outbound (impairment engine) ---
    /// Transmissions requested, counted before any impairment.
    pub sent: u64,
    pub eliminated: u64,
    pub delayed: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub cut: u64,

    // --- inbound (receive path) ---
    /// Datagrams read from the socket, valid or not.
    pub received: u64,
    /// Data segments whose sequence number was already accepted.
    pub duplicate_received: u64,
    /// Datagrams that failed integrity checks (corrupted or cut).
    pub checksum_failed: u64,
    /// Data segments ahead of the expected sequence number.
    pub out_of_order: u64,
    /// Payloads handed to the application.
    pub delivered: u64,
}

impl PeerStats {
    pub fn merge(&mut self, other: &PeerStats) {
        self.sent += other.sent;
        self.eliminated += other.eliminated;
        self.delayed += other.delayed;
        self.duplicated += other.duplicated;
        self.corrupted += other.corrupted;
        self.cut += other.cut;
        self.received += other.received;
        self.duplicate_received += other.duplicate_received;
        self.checksum_failed += other.checksum_failed;
        self.out_of_order += other.out_of_order;
        self.delivered += other.delivered;
    }
}

impl fmt::Display for PeerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  sent:               {}", self.sent)?;
        writeln!(f, "  eliminated:         {}", self.eliminated)?;
        writeln!(f, "  delayed:            {}", self.delayed)?;
        writeln!(f, "  duplicated:         {}", self.duplicated)?;
        writeln!(f, "  corrupted:          {}", self.corrupted)?;
        writeln!(f, "  cut:                {}", self.cut)?;
        writeln!(f, "  received:           {}", self.received)?;
        writeln!(f, "  duplicate received: {}", self.duplicate_received)?;
        writeln!(f, "  checksum failed:    {}", self.checksum_failed)?;
        writeln!(f, "  out of order:       {}", self.out_of_order)?;
        write!(f, "  delivered:          {}", self.delivered)
    }
}

/// Thread-safe per-peer counter map.
///
/// Cloning yields another handle to the same counters.
#[derive(Debug, Clone, Default)]
pub struct StatsRegistry {
    inner: Arc<Mutex<BTreeMap<SocketAddr, PeerStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` to the counters of `peer`, creating them on first use.
    pub fn bump(&self, peer: SocketAddr, update: impl FnOnce(&mut PeerStats)) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        update(map.entry(peer).or_default());
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<PeerStats> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(peer).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<SocketAddr, PeerStats> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add every counter of `other` into this registry.
    pub fn absorb(&self, other: &StatsRegistry) {
        let incoming = other.snapshot();
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for (peer, stats) in &incoming {
            map.entry(*peer).or_default().merge(stats);
        }
    }
}

/// Outcome of one completed session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub peers: BTreeMap<SocketAddr, PeerStats>,
    /// Payloads framed by a send session (N).
    pub segments: u32,
    /// Data transmissions beyond the first for each segment.
    pub retransmissions: u64,
    /// Retransmission timer expiries.
    pub timeouts: u64,
    /// ACKs for sequence numbers already below the window base.
    pub stale_acks: u64,
    /// Window base when the send session ended (`N + 1` on success).
    pub final_base: u32,
    pub elapsed_ms: u64,
}

impl SessionStats {
    pub fn peer(&self, addr: &SocketAddr) -> PeerStats {
        self.peers.get(addr).copied().unwrap_or_default()
    }

    /// Total payloads delivered to the application across all peers.
    pub fn delivered(&self) -> u64 {
        self.peers.values().map(|p| p.delivered).sum()
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments > 0 {
            writeln!(
                f,
                "segments: {}  retransmissions: {}  timeouts: {}  stale ACKs: {}  final base: {}",
                self.segments, self.retransmissions, self.timeouts, self.stale_acks, self.final_base
            )?;
        }
        for (peer, stats) in &self.peers {
            writeln!(f, "----------- {peer} -----------")?;
            writeln!(f, "{stats}")?;
        }
        write!(f, "elapsed: {} ms", self.elapsed_ms)
    }
}
