//! `lossy-arq`: Go-Back-N reliable delivery over a deliberately lossy UDP
//! channel.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  payloads   ┌────────────────┐
//!  │ SenderWindow │────────────▶│ ReceiverLedger │──▶ application
//!  └──────┬───────┘             └───────┬────────┘
//!         │ segments                    │ cumulative ACKs
//!  ┌──────▼─────────────────────────────▼──────┐
//!  │             ImpairmentEngine              │
//!  │ eliminate · cut · delay · corrupt · dup   │
//!  └──────┬────────────────────────────────────┘
//!         │ raw UDP datagrams
//!  ┌──────▼──────┐
//!  │   Channel   │  (tokio UdpSocket, session tasks, statistics)
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]: wire format and additive checksum
//! - [`config`]: JSON impairment/protocol configuration
//! - [`impairment`]: fault injection on every outbound datagram
//! - [`window`]: Go-Back-N send window
//! - [`ledger`]: per-peer in-order receive state
//! - [`timer`]: single retransmission deadline
//! - [`state`]: send-session lifecycle
//! - [`stats`]: per-peer counters and session summaries
//! - [`channel`]: send/receive sessions tying it all together
//! - [`error`]: session-terminating failures

pub mod channel;
pub mod config;
pub mod error;
pub mod impairment;
pub mod ledger;
pub mod segment;
pub mod state;
pub mod stats;
pub mod timer;
pub mod window;

pub use channel::Channel;
pub use config::{ConfigError, ImpairmentConfig};
pub use error::ArqError;
pub use impairment::{Fault, FaultSource, RandomFaults};
pub use segment::{Segment, SegmentError, MAX_PAYLOAD};
pub use stats::{PeerStats, SessionStats};
