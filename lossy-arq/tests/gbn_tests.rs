//! Integration tests for Go-Back-N sessions over the impaired channel.
//!
//! Each test binds two in-process channels on the loopback interface.  The
//! receiving side runs as a separate tokio task so both ends make progress
//! concurrently.  Scripted fault sources impair either direction.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use lossy_arq::segment::OutboundSegment;
use lossy_arq::{Channel, Fault, FaultSource, ImpairmentConfig, RandomFaults, SessionStats};

type Delivered = Vec<(SocketAddr, Vec<u8>)>;

const GUARD: Duration = Duration::from_secs(30);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn clean_channel(window: u32, timeout_ms: u64) -> Channel {
    Channel::bind(loopback(), ImpairmentConfig::lossless(window, timeout_ms))
        .await
        .expect("bind failed")
}

/// Run one receive session in the background.
fn spawn_receiver(
    channel: Channel,
    idle: Duration,
) -> JoinHandle<(Delivered, SessionStats, Channel)> {
    tokio::spawn(async move {
        let mut delivered = Vec::new();
        let stats = channel
            .receive_loop(|peer, payload| delivered.push((peer, payload)), idle)
            .await
            .expect("receive loop");
        (delivered, stats, channel)
    })
}

fn messages(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("msg-{i}").into_bytes()).collect()
}

fn payloads_only(delivered: &Delivered) -> Vec<Vec<u8>> {
    delivered.iter().map(|(_, p)| p.clone()).collect()
}

/// Eliminates the first transmission of each listed data segment and records
/// every data transmission in order.
struct DropFirst {
    targets: HashSet<u32>,
    log: Arc<Mutex<Vec<u32>>>,
}

impl DropFirst {
    fn new(targets: &[u32]) -> (Box<Self>, Arc<Mutex<Vec<u32>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let source = Box::new(Self {
            targets: targets.iter().copied().collect(),
            log: Arc::clone(&log),
        });
        (source, log)
    }
}

impl FaultSource for DropFirst {
    fn roll(&mut self, fault: Fault, _probability: u32, segment: &OutboundSegment) -> bool {
        if fault != Fault::Eliminate || segment.is_ack {
            return false;
        }
        self.log.lock().unwrap().push(segment.sequence_number);
        self.targets.remove(&segment.sequence_number)
    }

    fn pick_byte(&mut self, _len: usize) -> usize {
        0
    }
}

/// Eliminates the listed ACKs and lets everything else through.
struct DropAcks {
    targets: HashSet<u32>,
}

impl FaultSource for DropAcks {
    fn roll(&mut self, fault: Fault, _probability: u32, segment: &OutboundSegment) -> bool {
        fault == Fault::Eliminate
            && segment.is_ack
            && self.targets.contains(&segment.sequence_number)
    }

    fn pick_byte(&mut self, _len: usize) -> usize {
        0
    }
}

// ---------------------------------------------------------------------------
// Test 1: clean channel, pipelined window
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_clean_channel_delivers_in_order() {
    let rx = clean_channel(3, 50).await;
    let dest = rx.local_addr();
    let receiver = spawn_receiver(rx, Duration::from_millis(300));

    let tx = clean_channel(3, 50).await;
    let stats = tokio::time::timeout(GUARD, tx.send_reliable(dest, messages(10)))
        .await
        .expect("send timed out")
        .expect("send failed");

    assert_eq!(stats.segments, 10);
    assert_eq!(stats.retransmissions, 0);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.final_base, 11);
    assert_eq!(stats.peer(&dest).sent, 10);

    let (delivered, rx_stats, _) = receiver.await.unwrap();
    assert_eq!(payloads_only(&delivered), messages(10));
    assert_eq!(rx_stats.delivered(), 10);
    assert!(delivered.iter().all(|(peer, _)| *peer == tx.local_addr()));
}

// ---------------------------------------------------------------------------
// Test 2: Go-Back-N retransmits the whole window behind a loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lost_segment_retransmits_everything_after_base() {
    let rx = clean_channel(4, 100).await;
    let dest = rx.local_addr();
    let receiver = spawn_receiver(rx, Duration::from_millis(400));

    let (faults, log) = DropFirst::new(&[2]);
    let tx = Channel::bind_with_faults(loopback(), ImpairmentConfig::lossless(4, 100), faults)
        .await
        .unwrap();
    let stats = tokio::time::timeout(GUARD, tx.send_reliable(dest, messages(4)))
        .await
        .expect("send timed out")
        .expect("send failed");

    // #2 was lost; #3 and #4 are resent with it, not just #2.
    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 2, 3, 4]);
    assert_eq!(stats.retransmissions, 3);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.final_base, 5);
    // ACK 1 is repeated for each of #3 and #4 arriving ahead of the gap.
    assert_eq!(stats.stale_acks, 2);
    assert_eq!(stats.peer(&dest).eliminated, 1);

    let (delivered, rx_stats, _) = receiver.await.unwrap();
    assert_eq!(payloads_only(&delivered), messages(4));
    let peer = rx_stats.peer(&tx.local_addr());
    assert_eq!(peer.out_of_order, 2);
    assert_eq!(peer.delivered, 4);
}

// ---------------------------------------------------------------------------
// Test 3: a single mid-stream loss is recovered
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mid_stream_loss_recovered() {
    let rx = clean_channel(3, 50).await;
    let dest = rx.local_addr();
    let receiver = spawn_receiver(rx, Duration::from_millis(300));

    let (faults, _) = DropFirst::new(&[5]);
    let tx = Channel::bind_with_faults(loopback(), ImpairmentConfig::lossless(3, 50), faults)
        .await
        .unwrap();
    let stats = tokio::time::timeout(GUARD, tx.send_reliable(dest, messages(10)))
        .await
        .expect("send timed out")
        .expect("send failed");

    assert!(stats.retransmissions > 0);
    assert!(stats.timeouts >= 1);
    assert_eq!(stats.final_base, 11);

    let (delivered, _, _) = receiver.await.unwrap();
    assert_eq!(payloads_only(&delivered), messages(10));
}

// ---------------------------------------------------------------------------
// Test 4: duplicated datagrams are delivered exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicates_delivered_once() {
    let rx = clean_channel(4, 200).await;
    let dest = rx.local_addr();
    let receiver = spawn_receiver(rx, Duration::from_millis(300));

    let config = ImpairmentConfig {
        duplicate_probability: 100,
        ..ImpairmentConfig::lossless(4, 200)
    };
    let tx = Channel::bind(loopback(), config).await.unwrap();
    let stats = tokio::time::timeout(GUARD, tx.send_reliable(dest, messages(10)))
        .await
        .expect("send timed out")
        .expect("send failed");
    assert_eq!(stats.peer(&dest).duplicated, stats.peer(&dest).sent);

    let (delivered, rx_stats, _) = receiver.await.unwrap();
    assert_eq!(payloads_only(&delivered), messages(10));
    let peer = rx_stats.peer(&tx.local_addr());
    assert_eq!(peer.delivered, 10);
    assert!(peer.duplicate_received >= 10);
}

// ---------------------------------------------------------------------------
// Test 5: every impairment at once, reproducible seed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_seeded_hostile_channel_still_delivers() {
    let rx = clean_channel(4, 60).await;
    let dest = rx.local_addr();
    let receiver = spawn_receiver(rx, Duration::from_millis(500));

    let config = ImpairmentConfig {
        eliminate_probability: 20,
        cut_probability: 5,
        cut_bytes: 14,
        delay_probability: 10,
        delay_ms: 5,
        corrupt_probability: 10,
        duplicate_probability: 10,
        ..ImpairmentConfig::lossless(4, 60)
    };
    let tx = Channel::bind_with_faults(loopback(), config, Box::new(RandomFaults::seeded(7)))
        .await
        .unwrap();
    let stats = tokio::time::timeout(GUARD, tx.send_reliable(dest, messages(30)))
        .await
        .expect("send timed out")
        .expect("send failed");

    let impaired = stats.peer(&dest);
    assert!(impaired.eliminated + impaired.corrupted + impaired.cut > 0);
    assert!(stats.retransmissions > 0);
    assert_eq!(stats.final_base, 31);

    let (delivered, rx_stats, _) = receiver.await.unwrap();
    assert_eq!(payloads_only(&delivered), messages(30));
    // Every corrupted or cut datagram reached the receiver and failed its
    // integrity check.
    let peer = rx_stats.peer(&tx.local_addr());
    assert!(peer.checksum_failed >= impaired.corrupted.max(impaired.cut));
}

// ---------------------------------------------------------------------------
// Test 6: lost ACKs are covered by a later cumulative ACK
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lost_acks_covered_by_later_cumulative_ack() {
    let faults = Box::new(DropAcks {
        targets: [2, 3].into_iter().collect(),
    });
    let rx = Channel::bind_with_faults(loopback(), ImpairmentConfig::lossless(4, 200), faults)
        .await
        .unwrap();
    let dest = rx.local_addr();
    let receiver = spawn_receiver(rx, Duration::from_millis(400));

    let tx = clean_channel(4, 200).await;
    let stats = tokio::time::timeout(GUARD, tx.send_reliable(dest, messages(6)))
        .await
        .expect("send timed out")
        .expect("send failed");

    assert_eq!(stats.retransmissions, 0);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.final_base, 7);
    assert_eq!(stats.peer(&dest).received, 4, "ACKs 1, 4, 5 and 6 arrive");

    let (delivered, rx_stats, _) = receiver.await.unwrap();
    assert_eq!(payloads_only(&delivered), messages(6));
    let peer = rx_stats.peer(&tx.local_addr());
    assert_eq!(peer.delivered, 6);
    assert_eq!(peer.eliminated, 2);
}
