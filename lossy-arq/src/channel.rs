//! Reliable channel: Go-Back-N sessions over an impaired UDP socket.
//!
//! # Send session
//!
//! ```text
//!            ┌──────────────── sender task (owns window + timer) ─────┐
//!  payloads ─▶ SenderWindow ──▶ ImpairmentEngine ──▶ UdpSocket ──────┼──▶ peer
//!            │      ▲                                                 │
//!            │      │ ListenerEvent::Ack(seq)      select! on events  │
//!            │      │                              and timer deadline │
//!            └──────┼─────────────────────────────────────────────────┘
//!                   │ mpsc
//!            ack_listener task ◀── UdpSocket ◀──────────────────────────── ACKs
//! ```
//!
//! # Receive session
//!
//! ```text
//!  UdpSocket ──▶ decode ──▶ Receiver (per-peer ledger) ──▶ on_payload
//!                                    │
//!                                    │ try_send (bounded)
//!                                    ▼
//!                            ack_dispatcher task ──▶ ImpairmentEngine ──▶ peer
//! ```
//!
//! Both session kinds read from the same socket, so a [`Channel`] runs at
//! most one session at a time; a second caller waits for the first to end.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use crate::config::ImpairmentConfig;
use crate::error::{is_transient, ArqError};
use crate::impairment::{FaultSource, ImpairmentEngine, RandomFaults};
use crate::ledger::{DataVerdict, Receiver};
use crate::segment::{OutboundSegment, Segment, MAX_DATAGRAM, MAX_PAYLOAD};
use crate::state::SenderState;
use crate::stats::{PeerStats, SessionStats, StatsRegistry};
use crate::timer::RetransmitTimer;
use crate::window::{session_len, AckOutcome, SenderWindow, MAX_SEGMENTS};

/// Depth of the listener → sender and receive path → dispatcher queues.
const QUEUE_DEPTH: usize = 64;

/// What the ACK listener reports to the sender task.
#[derive(Debug)]
enum ListenerEvent {
    Ack(u32),
    Failed(io::Error),
}

/// Counters owned by the sender task for one session.
#[derive(Debug, Default)]
struct SendCounters {
    timeouts: u64,
    stale_acks: u64,
}

pub struct Channel {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: Arc<ImpairmentConfig>,
    engine: Arc<ImpairmentEngine>,
    /// Cumulative counters across every session.
    stats: StatsRegistry,
    session: Mutex<()>,
}

impl Channel {
    /// Bind `0.0.0.0:local_port` with a randomly seeded fault source.
    pub async fn open(local_port: u16, config: ImpairmentConfig) -> Result<Self, ArqError> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], local_port)), config).await
    }

    pub async fn bind(addr: SocketAddr, config: ImpairmentConfig) -> Result<Self, ArqError> {
        Self::bind_with_faults(addr, config, Box::new(RandomFaults::new())).await
    }

    /// Bind `addr` and impair outbound traffic with `faults`.
    pub async fn bind_with_faults(
        addr: SocketAddr,
        config: ImpairmentConfig,
        faults: Box<dyn FaultSource>,
    ) -> Result<Self, ArqError> {
        config.validate()?;
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let config = Arc::new(config);
        let engine = Arc::new(ImpairmentEngine::new(Arc::clone(&config), faults));
        log::info!(
            "[arq] channel bound to {local_addr} (window={}, timeout={}ms)",
            config.window_size,
            config.timeout_ms
        );
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            config,
            engine,
            stats: StatsRegistry::new(),
            session: Mutex::new(()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ImpairmentConfig {
        &self.config
    }

    /// Per-peer counters accumulated over every finished session.
    pub fn stats(&self) -> BTreeMap<SocketAddr, PeerStats> {
        self.stats.snapshot()
    }

    // -----------------------------------------------------------------------
    // Send session
    // -----------------------------------------------------------------------

    /// Deliver `payloads` to `destination` in order, returning once every
    /// one is acknowledged.
    pub async fn send_reliable<I>(
        &self,
        destination: SocketAddr,
        payloads: I,
    ) -> Result<SessionStats, ArqError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let payloads: Vec<I::Item> = payloads.into_iter().collect();
        if session_len(payloads.len()).is_none() {
            return Err(ArqError::TooManySegments {
                count: payloads.len(),
                max: MAX_SEGMENTS,
            });
        }
        if let Some((index, p)) = payloads
            .iter()
            .enumerate()
            .find(|(_, p)| p.as_ref().len() > MAX_PAYLOAD)
        {
            return Err(ArqError::PayloadTooLarge {
                index,
                len: p.as_ref().len(),
                max: MAX_PAYLOAD,
            });
        }

        let _session = self.session.lock().await;
        let started = Instant::now();
        let session_stats = StatsRegistry::new();
        let mut counters = SendCounters::default();
        let mut state = SenderState::Idle;
        let mut window = SenderWindow::new(destination, payloads, self.config.window_size);

        log::info!(
            "[arq] sending {} segment(s) to {destination} (window={})",
            window.len(),
            window.window_size()
        );
        state.advance(SenderState::Sending);

        let result = if window.is_complete() {
            Ok(())
        } else {
            self.discard_backlog();
            let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
            let listener = tokio::spawn(ack_listener(
                Arc::clone(&self.socket),
                destination,
                session_stats.clone(),
                tx,
            ));
            let result = self
                .drive(
                    destination,
                    &mut window,
                    &mut rx,
                    &session_stats,
                    &mut counters,
                )
                .await;
            listener.abort();
            let _ = listener.await;
            result
        };

        if result.is_ok() {
            state.advance(SenderState::Draining);
        }
        self.stats.absorb(&session_stats);
        state.advance(SenderState::Done);
        result?;

        let stats = SessionStats {
            peers: session_stats.snapshot(),
            segments: window.len(),
            retransmissions: window.retransmissions(),
            timeouts: counters.timeouts,
            stale_acks: counters.stale_acks,
            final_base: window.base(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        log::info!(
            "[arq] {} segment(s) acknowledged by {destination}: {} retransmission(s), {} timeout(s)",
            stats.segments,
            stats.retransmissions,
            stats.timeouts
        );
        Ok(stats)
    }

    /// Drop datagrams queued on the socket before this session began.
    ///
    /// Sequence numbers restart at 1 every session, so a late ACK from an
    /// earlier session would otherwise confirm segments never delivered.
    fn discard_backlog(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut discarded = 0usize;
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok(_) => discarded += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    log::debug!("[arq] stopped draining backlog: {e}");
                    break;
                }
            }
        }
        if discarded > 0 {
            log::debug!("[arq] discarded {discarded} datagram(s) left from earlier traffic");
        }
    }

    /// Sender task body: runs until `base == N + 1` or a fatal error.
    async fn drive(
        &self,
        destination: SocketAddr,
        window: &mut SenderWindow,
        events: &mut mpsc::Receiver<ListenerEvent>,
        stats: &StatsRegistry,
        counters: &mut SendCounters,
    ) -> Result<(), ArqError> {
        let mut timer = RetransmitTimer::new(self.config.timeout());
        let mut fruitless_timeouts = 0u32;

        let initial = window.take_sendable();
        self.transmit_range(window, initial, stats).await?;
        timer.arm(window.base());

        while !window.is_complete() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ListenerEvent::Ack(ack)) => match window.on_ack(ack) {
                        AckOutcome::Advanced { acked } => {
                            fruitless_timeouts = 0;
                            log::debug!(
                                "[arq] <- ACK {ack}: {acked} confirmed, base={}",
                                window.base()
                            );
                            if window.is_complete() {
                                timer.disarm();
                            } else {
                                timer.arm(window.base());
                                let fresh = window.take_sendable();
                                self.transmit_range(window, fresh, stats).await?;
                            }
                        }
                        AckOutcome::AlreadyConfirmed => {
                            counters.stale_acks += 1;
                            log::debug!("[arq] <- ACK {ack}: already confirmed");
                        }
                        AckOutcome::Spurious => {
                            log::debug!(
                                "[arq] <- ACK {ack}: beyond next_seq={}, ignored",
                                window.next_seq()
                            );
                        }
                    },
                    Some(ListenerEvent::Failed(e)) => return Err(ArqError::Transport(e)),
                    None => return Err(ArqError::ListenerStopped),
                },

                tag = timer.expired(), if timer.is_armed() => {
                    counters.timeouts += 1;
                    fruitless_timeouts += 1;
                    let limit = self.config.max_consecutive_timeouts;
                    if limit > 0 && fruitless_timeouts >= limit {
                        log::warn!(
                            "[arq] giving up on {destination}: {fruitless_timeouts} timeouts without progress"
                        );
                        return Err(ArqError::PeerUnresponsive {
                            peer: destination,
                            timeouts: fruitless_timeouts,
                        });
                    }

                    timer.arm(window.base());
                    let outstanding = window.take_outstanding();
                    log::info!(
                        "[arq] timeout on seq={tag}; retransmitting {}..{}",
                        outstanding.start,
                        outstanding.end
                    );
                    self.transmit_range(window, outstanding, stats).await?;
                }
            }
        }
        Ok(())
    }

    /// Push `range` through the impairment engine.
    ///
    /// A transient send error loses that segment; the timer recovers it.
    async fn transmit_range(
        &self,
        window: &mut SenderWindow,
        range: Range<u32>,
        stats: &StatsRegistry,
    ) -> Result<(), ArqError> {
        for seq in range {
            let retransmission = window.record_transmission(seq);
            let Some(segment) = window.segment(seq) else {
                continue;
            };
            match self.engine.transmit(&self.socket, segment, stats).await {
                Ok(_) => log::debug!(
                    "[arq] -> DATA seq={seq}{}",
                    if retransmission { " (retransmission)" } else { "" }
                ),
                Err(e) if is_transient(&e) => {
                    log::warn!("[arq] send of seq={seq} failed, treating as lost: {e}")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Receive session
    // -----------------------------------------------------------------------

    /// Accept data from any peer, handing each in-order payload to
    /// `on_payload`, until `idle_timeout` passes with no datagram.
    pub async fn receive_loop<F>(
        &self,
        mut on_payload: F,
        idle_timeout: Duration,
    ) -> Result<SessionStats, ArqError>
    where
        F: FnMut(SocketAddr, Vec<u8>),
    {
        let _session = self.session.lock().await;
        let started = Instant::now();
        let session_stats = StatsRegistry::new();
        let mut receiver = Receiver::new();

        log::info!(
            "[recv] listening on {} (idle timeout {}ms)",
            self.local_addr,
            idle_timeout.as_millis()
        );

        let (ack_tx, ack_rx) = mpsc::channel(QUEUE_DEPTH);
        let dispatcher = tokio::spawn(ack_dispatcher(
            Arc::clone(&self.socket),
            Arc::clone(&self.engine),
            session_stats.clone(),
            ack_rx,
        ));

        let outcome = self
            .receive_until_idle(
                &mut receiver,
                &mut on_payload,
                idle_timeout,
                &session_stats,
                &ack_tx,
            )
            .await;

        // Closing the queue lets the dispatcher flush what is left and exit.
        drop(ack_tx);
        let dispatched = dispatcher
            .await
            .unwrap_or(Err(ArqError::AckDispatcherStopped));

        self.stats.absorb(&session_stats);
        dispatched.and(outcome)?;

        let stats = SessionStats {
            peers: session_stats.snapshot(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            ..SessionStats::default()
        };
        log::info!(
            "[recv] session over: {} payload(s) delivered from {} peer(s)",
            stats.delivered(),
            receiver.peers().count()
        );
        Ok(stats)
    }

    async fn receive_until_idle<F>(
        &self,
        receiver: &mut Receiver,
        on_payload: &mut F,
        idle_timeout: Duration,
        stats: &StatsRegistry,
        acks: &mpsc::Sender<OutboundSegment>,
    ) -> Result<(), ArqError>
    where
        F: FnMut(SocketAddr, Vec<u8>),
    {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let recv = tokio::time::timeout(idle_timeout, self.socket.recv_from(&mut buf)).await;
            let (n, peer) = match recv {
                Err(_elapsed) => {
                    log::info!("[recv] no traffic for {}ms", idle_timeout.as_millis());
                    return Ok(());
                }
                Ok(Ok(v)) => v,
                Ok(Err(e)) if is_transient(&e) => {
                    log::debug!("[recv] transient socket error: {e}");
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
            };
            stats.bump(peer, |s| s.received += 1);

            let segment = match Segment::decode(&buf[..n]) {
                Ok(segment) => segment,
                Err(e) => {
                    stats.bump(peer, |s| s.checksum_failed += 1);
                    log::debug!("[recv] <- {peer}: {e}");
                    continue;
                }
            };
            let seq = segment.sequence_number;
            if segment.is_ack {
                log::debug!("[recv] <- ACK {seq} from {peer} outside a send session, ignored");
                continue;
            }

            match receiver.on_data(peer, seq) {
                DataVerdict::Deliver { ack } => {
                    stats.bump(peer, |s| s.delivered += 1);
                    log::debug!(
                        "[recv] <- DATA seq={seq} from {peer} delivered: {}",
                        segment.payload_text()
                    );
                    on_payload(peer, segment.payload);
                    queue_ack(acks, OutboundSegment::ack(ack, peer))?;
                }
                DataVerdict::OutOfOrder { ack } => {
                    stats.bump(peer, |s| s.out_of_order += 1);
                    log::debug!("[recv] <- DATA seq={seq} from {peer} out of order, re-ACK {ack}");
                    queue_ack(acks, OutboundSegment::ack(ack, peer))?;
                }
                DataVerdict::Duplicate => {
                    stats.bump(peer, |s| s.duplicate_received += 1);
                    log::debug!("[recv] <- DATA seq={seq} from {peer} duplicate, dropped");
                }
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("local_addr", &self.local_addr)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Read datagrams during a send session and forward ACKs from `peer`.
async fn ack_listener(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    stats: StatsRegistry,
    events: mpsc::Sender<ListenerEvent>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) if is_transient(&e) => {
                log::debug!("[arq] transient socket error: {e}");
                continue;
            }
            Err(e) => {
                let _ = events.send(ListenerEvent::Failed(e)).await;
                return;
            }
        };
        stats.bump(from, |s| s.received += 1);

        match Segment::decode(&buf[..n]) {
            Ok(segment) if segment.is_ack && from == peer => {
                if events
                    .send(ListenerEvent::Ack(segment.sequence_number))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(segment) => log::debug!(
                "[arq] ignoring {} seq={} from {from} during send session",
                if segment.is_ack { "ACK" } else { "DATA" },
                segment.sequence_number
            ),
            Err(e) => {
                stats.bump(from, |s| s.checksum_failed += 1);
                log::debug!("[arq] <- {from}: {e}");
            }
        }
    }
}

/// Send queued ACKs through the impairment engine until the queue closes.
async fn ack_dispatcher(
    socket: Arc<UdpSocket>,
    engine: Arc<ImpairmentEngine>,
    stats: StatsRegistry,
    mut queue: mpsc::Receiver<OutboundSegment>,
) -> Result<(), ArqError> {
    while let Some(ack) = queue.recv().await {
        match engine.transmit(&socket, &ack, &stats).await {
            Ok(_) => log::trace!("[recv] -> ACK {} to {}", ack.sequence_number, ack.destination),
            Err(e) if is_transient(&e) => {
                log::warn!("[recv] ACK {} to {} lost: {e}", ack.sequence_number, ack.destination)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn queue_ack(acks: &mpsc::Sender<OutboundSegment>, ack: OutboundSegment) -> Result<(), ArqError> {
    match acks.try_send(ack) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(ack)) => {
            log::warn!("[recv] ACK queue full, dropping ACK {}", ack.sequence_number);
            Ok(())
        }
        Err(TrySendError::Closed(_)) => Err(ArqError::AckDispatcherStopped),
    }
}
