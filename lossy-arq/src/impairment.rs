//! Fault-injecting send path.
//!
//! Real networks drop, mangle, delay, and duplicate datagrams.  To exercise
//! the ARQ machinery on a loopback link, every outbound segment passes through
//! the [`ImpairmentEngine`] which applies the configured fault model before
//! handing the bytes to the UDP socket:
//!
//! | Fault       | Effect                                                   |
//! |-------------|----------------------------------------------------------|
//! | Elimination | Nothing is transmitted.  Short-circuits everything else. |
//! | Cut         | Keep only the first `cutBytes` bytes.                    |
//! | Delay       | Suspend the sending path for `delayMS`.                  |
//! | Corruption  | Increment one random byte by 1 (mod 256).                |
//! | Duplication | Transmit the buffer one extra time.                      |
//!
//! Each fault is an independent Bernoulli trial against its percentage, in
//! the order above.  Datagrams longer than [`MAX_DATAGRAM`] are always cut.
//!
//! Randomness comes from a [`FaultSource`].  [`RandomFaults`] is the normal
//! seeded/unseeded RNG; tests supply scripted sources to force a specific
//! fault on a specific transmission.

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;

use crate::config::ImpairmentConfig;
use crate::segment::{OutboundSegment, MAX_DATAGRAM};
use crate::stats::StatsRegistry;

/// The impairments, in the order they are rolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Eliminate,
    Cut,
    Delay,
    Corrupt,
    Duplicate,
}

/// Decides which faults hit a transmission.
pub trait FaultSource: Send {
    /// Bernoulli trial for `fault` at `probability` percent.
    fn roll(&mut self, fault: Fault, probability: u32, segment: &OutboundSegment) -> bool;

    /// Index of the byte to corrupt in a buffer of `len` (> 0) bytes.
    fn pick_byte(&mut self, len: usize) -> usize;
}

/// [`FaultSource`] backed by a standard RNG.
#[derive(Debug)]
pub struct RandomFaults {
    rng: StdRng,
}

impl RandomFaults {
    /// Seeded from the thread RNG; every run differs.
    pub fn new() -> Self {
        Self::seeded(rand::rng().random())
    }

    /// Reproducible fault sequence.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomFaults {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultSource for RandomFaults {
    fn roll(&mut self, _fault: Fault, probability: u32, _segment: &OutboundSegment) -> bool {
        probability > 0 && self.rng.random_range(0..100) < probability
    }

    fn pick_byte(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }
}

/// What happened to one transmission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Impairments {
    pub eliminated: bool,
    /// Length the buffer was cut to.
    pub cut_to: Option<usize>,
    pub delayed: bool,
    /// Index of the incremented byte.
    pub corrupted_at: Option<usize>,
    pub duplicated: bool,
}

impl Impairments {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Applies the fault model and performs the UDP send.
///
/// Shared (`Arc`) between the sender loop and the ACK dispatcher; the fault
/// source is locked only while rolling, never across a send or a delay.
pub struct ImpairmentEngine {
    config: Arc<ImpairmentConfig>,
    faults: Mutex<Box<dyn FaultSource>>,
}

impl ImpairmentEngine {
    pub fn new(config: Arc<ImpairmentConfig>, faults: Box<dyn FaultSource>) -> Self {
        Self {
            config,
            faults: Mutex::new(faults),
        }
    }

    pub fn config(&self) -> &ImpairmentConfig {
        &self.config
    }

    /// Roll every fault for `segment` without touching the network.
    pub fn plan(&self, segment: &OutboundSegment) -> Impairments {
        let cfg = &*self.config;
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let mut plan = Impairments::default();

        if faults.roll(Fault::Eliminate, cfg.eliminate_probability, segment) {
            plan.eliminated = true;
            return plan;
        }

        let len = segment.raw.len();
        let oversized = len > MAX_DATAGRAM;
        let cut_rolled = faults.roll(Fault::Cut, cfg.cut_probability, segment);
        if cut_rolled || oversized {
            let mut limit = cfg.cut_bytes as usize;
            if oversized {
                limit = limit.min(MAX_DATAGRAM);
            }
            if len > limit {
                plan.cut_to = Some(limit);
            }
        }

        plan.delayed = faults.roll(Fault::Delay, cfg.delay_probability, segment);

        let remaining = plan.cut_to.unwrap_or(len);
        if faults.roll(Fault::Corrupt, cfg.corrupt_probability, segment) && remaining > 0 {
            plan.corrupted_at = Some(faults.pick_byte(remaining));
        }

        plan.duplicated = faults.roll(Fault::Duplicate, cfg.duplicate_probability, segment);
        plan
    }

    /// Impair `segment` and send whatever survives to its destination.
    ///
    /// Counters in `stats` are attributed to `segment.destination`.  Only
    /// socket errors are returned; every impairment is handled here.
    pub async fn transmit(
        &self,
        socket: &UdpSocket,
        segment: &OutboundSegment,
        stats: &StatsRegistry,
    ) -> std::io::Result<Impairments> {
        let dest = segment.destination;
        let kind = if segment.is_ack { "ACK" } else { "DATA" };
        stats.bump(dest, |s| s.sent += 1);

        let plan = self.plan(segment);
        if plan.eliminated {
            stats.bump(dest, |s| s.eliminated += 1);
            log::debug!("[impair] {kind} seq={} eliminated", segment.sequence_number);
            return Ok(plan);
        }

        let mut buf = segment.raw.clone();
        if let Some(len) = plan.cut_to {
            buf.truncate(len);
            stats.bump(dest, |s| s.cut += 1);
            log::debug!("[impair] {kind} seq={} cut to {len} bytes", segment.sequence_number);
        }
        if plan.delayed {
            log::debug!(
                "[impair] {kind} seq={} delayed {} ms",
                segment.sequence_number,
                self.config.delay_ms
            );
            tokio::time::sleep(self.config.delay()).await;
            stats.bump(dest, |s| s.delayed += 1);
        }
        if let Some(i) = plan.corrupted_at {
            buf[i] = buf[i].wrapping_add(1);
            stats.bump(dest, |s| s.corrupted += 1);
            log::debug!("[impair] {kind} seq={} corrupted at byte {i}", segment.sequence_number);
        }
        if plan.duplicated {
            socket.send_to(&buf, dest).await?;
            stats.bump(dest, |s| s.duplicated += 1);
            log::debug!("[impair] {kind} seq={} duplicated", segment.sequence_number);
        }

        socket.send_to(&buf, dest).await?;
        if plan.is_clean() {
            log::trace!("[impair] {kind} seq={} sent clean", segment.sequence_number);
        }
        Ok(plan)
    }
}
