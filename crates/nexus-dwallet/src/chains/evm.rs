use crate::config::HyperEvmConfig;
use crate::poll::{poll_until, PollConfig, PollOutcome};
use crate::retry::{try_all_with_backoff, BackoffConfig};
use alloy::{
    primitives::{Address, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::TransactionRequest,
    sol,
};
use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use std::{str::FromStr as _, time::Duration};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type EvmProvider = RootProvider;

fn broadcast_err_is_ok(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) returns (bool);
    }
}

sol! {
    /// HyperEVM → HyperCore USDC bridge.
    contract ICoreDepositWallet {
        function deposit(uint256 amount, uint32 destinationDex) external;
    }
}

sol! {
    /// HyperEVM system contract that forwards actions to HyperCore.
    contract ICoreWriter {
        function sendRawAction(bytes data) external;
    }
}

/// The EVM node operations the transaction builder, broadcaster and flows need.
#[async_trait]
pub trait EvmNode: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Transaction count including pending transactions.
    async fn pending_nonce(&self, addr: Address) -> eyre::Result<u64>;

    async fn gas_price(&self) -> eyre::Result<u128>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> eyre::Result<u64>;

    /// Broadcasts an EIP-2718 encoded transaction. "Already known" counts as success.
    async fn send_raw(&self, raw: &[u8]) -> eyre::Result<()>;

    /// Native gas-token balance (HYPE on HyperEVM), in wei.
    async fn native_balance(&self, addr: Address) -> eyre::Result<U256>;

    async fn erc20_balance(&self, token: Address, owner: Address) -> eyre::Result<U256>;

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> eyre::Result<U256>;

    /// Receipt status of `tx`: `None` while unmined, `Some(success)` once mined.
    async fn receipt_status(&self, tx: B256) -> eyre::Result<Option<bool>>;
}

/// Waits for `tx` to be mined and fails if it reverted.
pub async fn wait_for_receipt(node: &dyn EvmNode, tx: B256, cfg: PollConfig) -> eyre::Result<()> {
    match poll_until(cfg, "evm receipt", || node.receipt_status(tx)).await? {
        PollOutcome::Ready(true) => Ok(()),
        PollOutcome::Ready(false) => eyre::bail!("transaction {tx} reverted"),
        PollOutcome::TimedOut => eyre::bail!(
            "timed out waiting for receipt of {tx} after {}s",
            cfg.timeout.as_secs()
        ),
    }
}

/// JSON-RPC [`EvmNode`] that rotates across the primary and fallback endpoints.
#[derive(Debug, Clone)]
pub struct EvmChain {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
}

impl EvmChain {
    pub fn from_config(cfg: &HyperEvmConfig) -> Self {
        Self {
            name: "hyperevm".to_owned(),
            chain_id: cfg.chain_id,
            rpc_url: cfg.rpc_url.clone(),
            fallback_rpc_urls: cfg.fallback_rpc_urls.clone(),
        }
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(1 + self.fallback_rpc_urls.len());
        if !self.rpc_url.trim().is_empty() {
            urls.push(self.rpc_url.trim().to_owned());
        }
        for u in &self.fallback_rpc_urls {
            let t = u.trim();
            if t.is_empty() {
                continue;
            }
            if urls.iter().any(|x| x == t) {
                continue;
            }
            urls.push(t.to_owned());
        }
        urls
    }

    async fn with_fallback_and_backoff<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        let urls = self.all_rpc_urls();
        let cfg = BackoffConfig::default();
        try_all_with_backoff(
            &urls,
            &cfg,
            |u| {
                let u = u.clone();
                let f = &f;
                async move {
                    let p = Self::provider_for_url(&u)?;
                    f(p).await
                }
            },
            context_label,
        )
        .await
    }

    pub fn parse_address(s: &str) -> eyre::Result<Address> {
        Address::from_str(s.trim()).context("parse evm address")
    }
}

#[async_trait]
impl EvmNode for EvmChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn pending_nonce(&self, addr: Address) -> eyre::Result<u64> {
        self.with_fallback_and_backoff("get nonce", |p| async move {
            p.get_transaction_count(addr)
                .pending()
                .await
                .context("get nonce")
        })
        .await
    }

    async fn gas_price(&self) -> eyre::Result<u128> {
        self.with_fallback_and_backoff("get gas price", |p| async move {
            p.get_gas_price().await.context("get gas price")
        })
        .await
    }

    /// Primary endpoint only: a revert on the primary must not be masked by a fallback.
    async fn estimate_gas(&self, tx: &TransactionRequest) -> eyre::Result<u64> {
        let p = Self::provider_for_url(&self.rpc_url)?;
        p.estimate_gas(tx.clone()).await.context("estimate gas")
    }

    async fn send_raw(&self, raw: &[u8]) -> eyre::Result<()> {
        let urls = self.all_rpc_urls();
        let cfg = BackoffConfig::default();
        try_all_with_backoff(
            &urls,
            &cfg,
            |u| {
                let u = u.clone();
                async move {
                    let p = Self::provider_for_url(&u)?;
                    match p.send_raw_transaction(raw).await {
                        Ok(_pending) => Ok(()),
                        Err(e) => {
                            let ae: eyre::Report = e.into();
                            if broadcast_err_is_ok(&ae) {
                                Ok(())
                            } else {
                                Err(ae).context("broadcast raw tx")
                            }
                        }
                    }
                }
            },
            "send transaction",
        )
        .await
    }

    async fn native_balance(&self, addr: Address) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("native balance", |p| async move {
            p.get_balance(addr).await.context("get balance")
        })
        .await
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("erc20 balance", |p| async move {
            let c = IERC20::new(token, &p);
            c.balanceOf(owner).call().await.context("erc20 balanceOf")
        })
        .await
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("erc20 allowance", |p| async move {
            let c = IERC20::new(token, &p);
            c.allowance(owner, spender)
                .call()
                .await
                .context("erc20 allowance")
        })
        .await
    }

    async fn receipt_status(&self, tx: B256) -> eyre::Result<Option<bool>> {
        self.with_fallback_and_backoff("get tx receipt", |p| async move {
            let r = p
                .get_transaction_receipt(tx)
                .await
                .context("get transaction receipt")?;
            Ok(r.map(|r| r.status()))
        })
        .await
    }
}
