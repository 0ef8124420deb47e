use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr as _;
use std::time::Duration;

use crate::settlement::BalanceQuery;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn allow_insecure_http() -> bool {
    std::env::var("NEXUS_ALLOW_INSECURE_HTTP")
        .ok()
        .is_some_and(|v| {
            matches!(
                v.as_str(),
                "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"
            )
        })
}

fn host_prefix_ok(s: &str, prefix: &str) -> bool {
    if !s.starts_with(prefix) {
        return false;
    }
    matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
}

fn is_loopback_http(url: &str) -> bool {
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

fn base_url_is_allowed(url: &str) -> bool {
    let s = url.trim();
    if s.starts_with("https://") {
        return true;
    }
    if is_loopback_http(s) {
        return true;
    }
    allow_insecure_http()
}

/// Decimal field that defaults to zero when absent. Numbers arrive as strings.
fn decimal_field(obj: Option<&Value>, key: &str) -> eyre::Result<Decimal> {
    let Some(v) = obj.and_then(|o| o.get(key)) else {
        return Ok(Decimal::ZERO);
    };
    let s = match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => return Ok(Decimal::ZERO),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            eyre::bail!("{key}: expected a decimal, got {v}")
        }
    };
    Decimal::from_str(s.trim()).with_context(|| format!("{key}: invalid decimal {s:?}"))
}

/// HyperCore perp account summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerpBalance {
    pub account_value: Decimal,
    pub total_margin_used: Decimal,
    /// `account_value - total_margin_used`.
    pub withdrawable: Decimal,
}

impl PerpBalance {
    /// Reads `crossMarginSummary`, falling back to `marginSummary`.
    pub fn from_clearinghouse_state(v: &Value) -> eyre::Result<Self> {
        let summary = v
            .get("crossMarginSummary")
            .filter(|s| s.is_object())
            .or_else(|| v.get("marginSummary"));
        let account_value = decimal_field(summary, "accountValue")?;
        let total_margin_used = decimal_field(summary, "totalMarginUsed")?;
        Ok(Self {
            account_value,
            total_margin_used,
            withdrawable: account_value - total_margin_used,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotBalance {
    pub coin: String,
    pub total: Decimal,
    pub hold: Decimal,
}

pub fn spot_balances(v: &Value) -> eyre::Result<Vec<SpotBalance>> {
    let Some(arr) = v.get("balances").and_then(Value::as_array) else {
        return Ok(vec![]);
    };
    arr.iter()
        .map(|b| {
            Ok(SpotBalance {
                coin: b
                    .get("coin")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                total: decimal_field(Some(b), "total")?,
                hold: decimal_field(Some(b), "hold")?,
            })
        })
        .collect()
}

/// Read-only client for the Hyperliquid `info` endpoint.
#[derive(Debug, Clone)]
pub struct HyperliquidClient {
    pub base_url: String,
}

impl HyperliquidClient {
    pub fn new(base_url: &str) -> eyre::Result<Self> {
        if !base_url_is_allowed(base_url) {
            eyre::bail!("hyperliquid base_url must use https (or loopback)");
        }
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_owned(),
        })
    }

    fn http() -> eyre::Result<Client> {
        Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .context("build http client")
    }

    pub async fn info(&self, body: Value) -> eyre::Result<Value> {
        let url = format!("{}/info", self.base_url);
        let v: Value = Self::http()?
            .post(url)
            .json(&body)
            .send()
            .await
            .context("hyperliquid info request")?
            .error_for_status()
            .context("hyperliquid info status")?
            .json::<Value>()
            .await
            .context("hyperliquid info json")?;
        Ok(v)
    }

    pub async fn clearinghouse_state(&self, user: Address) -> eyre::Result<PerpBalance> {
        let v = self
            .info(json!({ "type": "clearinghouseState", "user": format!("{user:#x}") }))
            .await?;
        PerpBalance::from_clearinghouse_state(&v)
    }

    pub async fn spot_clearinghouse_state(&self, user: Address) -> eyre::Result<Vec<SpotBalance>> {
        let v = self
            .info(json!({ "type": "spotClearinghouseState", "user": format!("{user:#x}") }))
            .await?;
        spot_balances(&v)
    }
}

#[async_trait]
impl BalanceQuery for HyperliquidClient {
    async fn account_value(&self, user: Address) -> eyre::Result<Decimal> {
        Ok(self.clearinghouse_state(user).await?.account_value)
    }
}
