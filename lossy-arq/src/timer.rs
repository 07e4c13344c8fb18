//! Retransmission timer.
//!
//! A send session owns exactly one [`RetransmitTimer`].  It is tagged with
//! the window base it was armed for and fires once, `timeoutMS` after the
//! last arm, unless it is re-armed or disarmed first.
//!
//! The timer is not a task: it is a pinned `tokio::time::Sleep` that the
//! sender loop awaits inside `select!`.  Re-arming resets the deadline in
//! place, so a stale expiry from an earlier arm can never be observed.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Deadline used while disarmed.  Never awaited; just keeps `Sleep` valid.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

pub struct RetransmitTimer {
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
    /// Window base at arming time; `None` while disarmed.
    tag: Option<u32>,
}

impl RetransmitTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sleep: Box::pin(tokio::time::sleep(FAR_FUTURE)),
            tag: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// (Re)start the countdown for the segment at `base`.
    pub fn arm(&mut self, base: u32) {
        self.sleep.as_mut().reset(Instant::now() + self.timeout);
        self.tag = Some(base);
    }

    /// Cancel the countdown.  Returns `true` if the timer was armed.
    pub fn disarm(&mut self) -> bool {
        self.sleep.as_mut().reset(Instant::now() + FAR_FUTURE);
        self.tag.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.tag.is_some()
    }

    pub fn tag(&self) -> Option<u32> {
        self.tag
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.tag.map(|_| self.sleep.deadline())
    }

    /// Resolves with the tag once the armed deadline passes.
    ///
    /// Never resolves while disarmed.  The timer stays armed after firing;
    /// the caller re-arms or disarms it.
    pub async fn expired(&mut self) -> u32 {
        match self.tag {
            Some(tag) => {
                self.sleep.as_mut().await;
                tag
            }
            None => std::future::pending().await,
        }
    }
}

impl std::fmt::Debug for RetransmitTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetransmitTimer")
            .field("timeout", &self.timeout)
            .field("tag", &self.tag)
            .finish()
    }
}
