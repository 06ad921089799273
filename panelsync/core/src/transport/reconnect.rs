//! Reconnect Timer
//!
//! Clients retry the relay on a fixed delay after every disconnect or
//! failed attempt. No backoff and no attempt limit: a performance machine
//! should come back on its own as soon as the relay does.

use std::time::Duration;

use tokio::time::Instant;

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Default timeout for a single connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry timing for the relay connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay between a disconnect and the next attempt
    pub delay: Duration,
    /// Limit on a single attempt
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Single pending reconnect, usable as a `select!` branch
///
/// At most one attempt is ever scheduled: arming an armed timer keeps the
/// earlier deadline.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    /// A timer that fires immediately (first connection)
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            deadline: Some(Instant::now()),
        }
    }

    /// Schedule an attempt `delay` from now unless one is already pending
    pub fn arm(&mut self, delay: Duration) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + delay);
        }
    }

    /// Cancel any pending attempt
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Whether an attempt is pending
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Wait for the pending attempt; never completes while disarmed
    ///
    /// The timer disarms itself when it fires.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}
