use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::IkaConfig;
use crate::dwallet::{NetworkEncryptionKey, ObjectId, SuiAddress};
use crate::errors::RpcError;
use crate::ledger::{CoinRef, IkaLedger, LedgerEvent, ObjectChange, TransactionEffects};
use crate::poll::{poll_until, PollConfig, PollOutcome};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PAGE_LIMIT: u64 = 50;
/// Returned by fullnodes for a digest that is not indexed yet.
const TX_NOT_FOUND_RPC_CODE: i64 = -32602;

#[derive(Debug, Clone)]
pub enum NetworkKeySource {
    /// Use this key id as-is.
    Pinned(ObjectId),
    /// Read the key table and take its last entry.
    Table(ObjectId),
}

/// [`IkaLedger`] over Sui JSON-RPC.
#[derive(Debug, Clone)]
pub struct SuiJsonRpcLedger {
    url: String,
    http: Client,
    network_key: NetworkKeySource,
    tx_wait: PollConfig,
}

impl SuiJsonRpcLedger {
    pub fn new(url: &str, network_key: NetworkKeySource) -> Result<Self, RpcError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            url: url.trim().to_owned(),
            http,
            network_key,
            tx_wait: PollConfig::secs(60, 1),
        })
    }

    pub fn from_config(cfg: &IkaConfig) -> eyre::Result<Self> {
        let pick = |v: Option<&String>| {
            v.map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .map(ObjectId::new)
        };
        let source = match (
            pick(cfg.network_encryption_key_id.as_ref()),
            pick(cfg.network_encryption_keys_table_id.as_ref()),
        ) {
            (Some(id), _) => NetworkKeySource::Pinned(id),
            (None, Some(table)) => NetworkKeySource::Table(table),
            (None, None) => eyre::bail!(
                "set ika.network_encryption_key_id or ika.network_encryption_keys_table_id"
            ),
        };
        Self::new(&cfg.sui_rpc_url, source).map_err(|e| eyre::eyre!("sui rpc client: {e}"))
    }

    #[must_use]
    pub const fn with_tx_wait(mut self, wait: PollConfig) -> Self {
        self.tx_wait = wait;
        self
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("{method}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RpcError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let v: Value = resp
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))?;
        unwrap_rpc_result(method, v)
    }
}

fn unwrap_rpc_result(method: &str, mut v: Value) -> Result<Value, RpcError> {
    if let Some(err) = v.get("error") {
        return Err(RpcError::JsonRpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_owned(),
        });
    }
    v.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::Decode(format!("{method}: response without result")))
}

fn parse_effects(digest: &str, v: &Value) -> TransactionEffects {
    let events = v
        .get("events")
        .and_then(Value::as_array)
        .map(|evs| {
            evs.iter()
                .map(|e| LedgerEvent {
                    event_type: e
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    parsed_json: e.get("parsedJson").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default();
    let object_changes = v
        .get("objectChanges")
        .and_then(Value::as_array)
        .map(|cs| {
            cs.iter()
                .map(|c| ObjectChange {
                    kind: c
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    object_type: c.get("objectType").and_then(Value::as_str).map(str::to_owned),
                    object_id: c.get("objectId").and_then(Value::as_str).map(ObjectId::new),
                })
                .collect()
        })
        .unwrap_or_default();
    TransactionEffects {
        digest: v
            .get("digest")
            .and_then(Value::as_str)
            .unwrap_or(digest)
            .to_owned(),
        events,
        object_changes,
    }
}

fn parse_coin_page(v: &Value) -> Result<(Vec<CoinRef>, Option<Value>), RpcError> {
    let data = v
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| RpcError::Decode("suix_getCoins: missing data".into()))?;
    let mut out = Vec::with_capacity(data.len());
    for c in data {
        let object_id = c
            .get("coinObjectId")
            .and_then(Value::as_str)
            .map(ObjectId::new)
            .ok_or_else(|| RpcError::Decode("suix_getCoins: coin without id".into()))?;
        let balance = c
            .get("balance")
            .and_then(|b| b.as_str().and_then(|s| s.parse().ok()).or_else(|| b.as_u64()))
            .unwrap_or(0);
        out.push(CoinRef { object_id, balance });
    }
    Ok((out, next_cursor(v)))
}

fn next_cursor(v: &Value) -> Option<Value> {
    if v.get("hasNextPage").and_then(Value::as_bool) == Some(true) {
        v.get("nextCursor").filter(|c| !c.is_null()).cloned()
    } else {
        None
    }
}

#[async_trait]
impl IkaLedger for SuiJsonRpcLedger {
    async fn get_object(&self, id: &ObjectId) -> Result<Value, RpcError> {
        let mut v = self
            .rpc(
                "sui_getObject",
                json!([id.as_str(), { "showContent": true, "showType": true }]),
            )
            .await?;
        if let Some(err) = v.get("error") {
            return Err(RpcError::NotFound(format!("{id}: {err}")));
        }
        v.get_mut("data")
            .map(Value::take)
            .ok_or_else(|| RpcError::NotFound(id.to_string()))
    }

    async fn dynamic_field_object_ids(&self, parent: &ObjectId) -> Result<Vec<ObjectId>, RpcError> {
        let mut out = vec![];
        let mut cursor = Value::Null;
        loop {
            let page = self
                .rpc(
                    "suix_getDynamicFields",
                    json!([parent.as_str(), cursor, PAGE_LIMIT]),
                )
                .await?;
            if let Some(data) = page.get("data").and_then(Value::as_array) {
                out.extend(
                    data.iter()
                        .filter_map(|f| f.get("objectId").and_then(Value::as_str))
                        .map(ObjectId::new),
                );
            }
            match next_cursor(&page) {
                Some(c) => cursor = c,
                None => return Ok(out),
            }
        }
    }

    async fn latest_network_encryption_key(&self) -> Result<NetworkEncryptionKey, RpcError> {
        match &self.network_key {
            NetworkKeySource::Pinned(id) => Ok(NetworkEncryptionKey { id: id.clone() }),
            NetworkKeySource::Table(table) => {
                let ids = self.dynamic_field_object_ids(table).await?;
                ids.last()
                    .map(|id| NetworkEncryptionKey { id: id.clone() })
                    .ok_or_else(|| RpcError::NotFound(format!("no network encryption key in {table}")))
            }
        }
    }

    async fn wait_for_transaction(&self, digest: &str) -> Result<TransactionEffects, RpcError> {
        let out = poll_until(self.tx_wait, "sui transaction", move || async move {
            match self
                .rpc(
                    "sui_getTransactionBlock",
                    json!([digest, { "showEvents": true, "showObjectChanges": true }]),
                )
                .await
            {
                Ok(v) => Ok(Some(parse_effects(digest, &v))),
                Err(RpcError::JsonRpc { code, .. }) if code == TX_NOT_FOUND_RPC_CODE => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;
        match out {
            PollOutcome::Ready(fx) => Ok(fx),
            PollOutcome::TimedOut => Err(RpcError::NotFound(format!(
                "transaction {digest} not indexed after {}s",
                self.tx_wait.timeout.as_secs()
            ))),
        }
    }

    async fn owned_coins(&self, owner: &SuiAddress, coin_type: &str) -> Result<Vec<CoinRef>, RpcError> {
        let mut out = vec![];
        let mut cursor = Value::Null;
        loop {
            let page = self
                .rpc(
                    "suix_getCoins",
                    json!([owner.as_str(), coin_type, cursor, PAGE_LIMIT]),
                )
                .await?;
            let (coins, next) = parse_coin_page(&page)?;
            out.extend(coins);
            match next {
                Some(c) => cursor = c,
                None => return Ok(out),
            }
        }
    }
}
