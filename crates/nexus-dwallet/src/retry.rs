use std::future::Future;
use std::time::Duration;

use crate::errors::{DWalletError, ProtocolError, RpcError};

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            // Try all endpoints, then back off and retry. Bounded so callers stay responsive.
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl BackoffConfig {
    /// Single-endpoint policy for the coordinator RPC: 5 attempts, 1s doubling, no jitter.
    pub const fn rate_limit() -> Self {
        Self {
            rounds: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(16),
            jitter_max_ms: 0,
        }
    }
}

fn compute_backoff_delay(cfg: &BackoffConfig, round: usize) -> Duration {
    let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(cfg.base_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    let ms = base_ms.saturating_mul(pow2).min(max_ms);
    let jitter = if cfg!(test) || cfg.jitter_max_ms == 0 {
        0
    } else {
        // Avoid holding a non-Send RNG across await points.
        let range = cfg.jitter_max_ms.saturating_add(1);
        if range == 0 {
            0
        } else {
            rand::random::<u64>() % range
        }
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Errors that a [`RetryingSession`] knows how to classify.
pub trait RetryClassify {
    fn should_retry(&self) -> bool;
}

impl RetryClassify for RpcError {
    fn should_retry(&self) -> bool {
        self.is_rate_limited()
    }
}

impl RetryClassify for ProtocolError {
    fn should_retry(&self) -> bool {
        self.is_rate_limited()
    }
}

impl RetryClassify for DWalletError {
    fn should_retry(&self) -> bool {
        match self {
            Self::NetworkUnavailable(e) | Self::Rpc(e) => e.is_rate_limited(),
            Self::Protocol(e) => e.is_rate_limited(),
            _ => false,
        }
    }
}

/// Retries rate-limited network calls with exponential backoff.
///
/// Non rate-limit failures are returned on the first occurrence. After the last attempt the
/// final error is returned unchanged; converting it to [`DWalletError`] turns an exhausted
/// rate limit into `NetworkUnavailable`.
#[derive(Debug, Clone)]
pub struct RetryingSession {
    cfg: BackoffConfig,
}

impl Default for RetryingSession {
    fn default() -> Self {
        Self::new(BackoffConfig::rate_limit())
    }
}

impl RetryingSession {
    pub const fn new(cfg: BackoffConfig) -> Self {
        Self { cfg }
    }

    pub const fn config(&self) -> &BackoffConfig {
        &self.cfg
    }

    pub async fn call<T, E, Fut>(&self, label: &str, mut op: impl FnMut() -> Fut) -> Result<T, E>
    where
        E: RetryClassify + std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.cfg.rounds.max(1);
        let mut attempt = 0_usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.should_retry() && attempt + 1 < attempts => {
                    let d = compute_backoff_delay(&self.cfg, attempt);
                    tracing::warn!(
                        op = label,
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
                        "rate limited; backing off"
                    );
                    tokio::time::sleep(d).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Try `op(item)` across all items, in order, for `rounds` rounds. Between rounds, sleep with
/// exponential backoff + jitter, but only after every item has failed.
pub async fn try_all_with_backoff<I, T, Fut>(
    items: &[I],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&I) -> Fut + Send,
    context_label: &'static str,
) -> eyre::Result<T>
where
    I: Sync,
    Fut: Future<Output = eyre::Result<T>> + Send,
{
    if items.is_empty() {
        eyre::bail!("no endpoints configured");
    }
    if cfg.rounds == 0 {
        eyre::bail!("invalid backoff config: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;

    for round in 0..cfg.rounds {
        for item in items {
            match op(item).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        if round + 1 < cfg.rounds {
            let d = compute_backoff_delay(cfg, round);
            tokio::time::sleep(d).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(context_label))
}

/// Retry any failure up to `attempts` times, sleeping `step * n` after the n-th failure.
pub async fn retry_linear<T, Fut>(
    attempts: usize,
    step: Duration,
    label: &str,
    mut op: impl FnMut() -> Fut,
) -> eyre::Result<T>
where
    Fut: Future<Output = eyre::Result<T>>,
{
    let attempts = u32::try_from(attempts.max(1)).unwrap_or(u32::MAX);
    let mut n = 1_u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if n < attempts => {
                tracing::debug!(op = label, attempt = n, error = %e, "retrying");
                tokio::time::sleep(step.saturating_mul(n)).await;
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
