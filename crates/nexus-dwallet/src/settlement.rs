//! Waits for a HyperEVM bridge deposit to be credited on HyperCore.

use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::TimingsConfig;

/// Destination-side balance reads.
#[async_trait]
pub trait BalanceQuery: Send + Sync {
    /// The account value credited to `user` on the destination ledger.
    async fn account_value(&self, user: Address) -> eyre::Result<Decimal>;
}

/// Reported once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    /// `None` when the balance query failed on this attempt.
    pub balance: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled { balance: Decimal, attempts: u32 },
    /// Not yet credited. The deposit is on chain; the credit usually lands later.
    Pending { attempts: u32, last_seen: Option<Decimal> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementWatcher {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for SettlementWatcher {
    fn default() -> Self {
        Self::from_timings(&TimingsConfig::default())
    }
}

impl SettlementWatcher {
    pub const fn from_timings(t: &TimingsConfig) -> Self {
        Self {
            interval: Duration::from_secs(t.settlement_interval_seconds),
            max_attempts: t.settlement_max_attempts,
        }
    }

    /// Polls until the balance exceeds `baseline`.
    ///
    /// Each attempt waits `interval` first. Query errors count as still pending.
    pub async fn watch(
        &self,
        query: &dyn BalanceQuery,
        user: Address,
        baseline: Decimal,
        mut on_progress: impl FnMut(&SettlementProgress) + Send,
    ) -> SettlementOutcome {
        let mut last_seen = None;
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.interval).await;
            let balance = match query.account_value(user).await {
                Ok(b) => Some(b),
                Err(e) => {
                    tracing::warn!(attempt, error = %format!("{e:#}"), "settlement balance query failed");
                    None
                }
            };
            on_progress(&SettlementProgress {
                attempt,
                max_attempts: self.max_attempts,
                balance,
            });
            if let Some(b) = balance {
                last_seen = Some(b);
                if b > baseline {
                    tracing::info!(attempt, %baseline, balance = %b, "deposit settled");
                    return SettlementOutcome::Settled {
                        balance: b,
                        attempts: attempt,
                    };
                }
            }
        }
        tracing::warn!(attempts = self.max_attempts, %baseline, "deposit not yet settled");
        SettlementOutcome::Pending {
            attempts: self.max_attempts,
            last_seen,
        }
    }
}
