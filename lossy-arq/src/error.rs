use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

/// Session-terminating failures.
///
/// Integrity failures, duplicates and out-of-order arrivals never show up
/// here; they are counted and recovered by the protocol.
#[derive(Debug, Error)]
pub enum ArqError {
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("peer {peer} unresponsive after {timeouts} consecutive timeouts")]
    PeerUnresponsive { peer: SocketAddr, timeouts: u32 },
    #[error("payload #{index} is {len} bytes, at most {max} fit in one segment")]
    PayloadTooLarge { index: usize, len: usize, max: usize },
    #[error("{count} payloads do not fit in one session, at most {max} do")]
    TooManySegments { count: usize, max: u32 },
    #[error("ACK listener stopped unexpectedly")]
    ListenerStopped,
    #[error("ACK dispatcher stopped unexpectedly")]
    AckDispatcherStopped,
}

/// Socket errors worth logging and moving past.
///
/// On Linux an ICMP port-unreachable from an earlier datagram surfaces as
/// `ConnectionRefused` on the next socket call.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}
