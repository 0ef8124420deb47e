//! Bounded waits for remote state.
//!
//! A wait is a plain future: dropping it stops polling and leaves the remote outcome unknown.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Floor for [`PollConfig::interval`]; a zero interval would spin against the node.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl PollConfig {
    /// `interval` is raised to [`MIN_POLL_INTERVAL`] if shorter.
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        let interval = if interval.as_nanos() < MIN_POLL_INTERVAL.as_nanos() {
            MIN_POLL_INTERVAL
        } else {
            interval
        };
        Self { timeout, interval }
    }

    pub const fn secs(timeout: u64, interval: u64) -> Self {
        Self::new(Duration::from_secs(timeout), Duration::from_secs(interval))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
}

impl<T> PollOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::TimedOut => None,
        }
    }
}

/// Calls `check` every `interval` until it yields `Some`, errors, or `timeout` elapses.
///
/// The check runs once more at the deadline, so a state reached during the final sleep is
/// still observed.
pub async fn poll_until<T, E, Fut>(
    cfg: PollConfig,
    label: &str,
    mut check: impl FnMut() -> Fut,
) -> Result<PollOutcome<T>, E>
where
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + cfg.timeout;
    let interval = cfg.interval.max(MIN_POLL_INTERVAL);
    let mut attempts = 0_u32;
    loop {
        attempts = attempts.saturating_add(1);
        if let Some(v) = check().await? {
            tracing::debug!(wait = label, attempts, "ready");
            return Ok(PollOutcome::Ready(v));
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(wait = label, attempts, timeout_s = cfg.timeout.as_secs(), "timed out");
            return Ok(PollOutcome::TimedOut);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
