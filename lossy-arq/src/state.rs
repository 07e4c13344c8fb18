//! Send-session lifecycle.
//!
//! ```text
//!  Idle ──payloads framed──▶ Sending ──base == N+1──▶ Draining ──stats──▶ Done
//! ```
//!
//! A session that fails (transport error, unresponsive peer) jumps straight
//! to `Done` from wherever it was.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Nothing framed yet.
    #[default]
    Idle,
    /// Window open; transmitting and awaiting ACKs.
    Sending,
    /// Every segment acknowledged; stopping the ACK listener.
    Draining,
    /// Statistics materialized; resources released.
    Done,
}

impl SenderState {
    /// Whether `self → next` is a legal step.
    pub fn can_transition(self, next: SenderState) -> bool {
        use SenderState::*;
        matches!(
            (self, next),
            (Idle, Sending) | (Sending, Draining) | (Draining, Done) | (_, Done)
        )
    }

    /// Move to `next`, logging the step.  Illegal steps are logged and
    /// ignored.
    pub fn advance(&mut self, next: SenderState) {
        if self.can_transition(next) {
            log::trace!("[arq] state {self} -> {next}");
            *self = next;
        } else {
            log::warn!("[arq] ignoring illegal state step {self} -> {next}");
        }
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Sending => "SENDING",
            Self::Draining => "DRAINING",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}
