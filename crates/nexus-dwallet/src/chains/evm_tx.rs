//! Unsigned HyperEVM transactions for the USDC bridge and CoreWriter orders.
//!
//! Transactions are built here, signed elsewhere by the dWallet over [`UnsignedEvmTx::digest`],
//! and broadcast by [`TxBroadcaster`](super::broadcast::TxBroadcaster).

use std::time::Duration;

use alloy::{
    consensus::{SignableTransaction as _, TxEip1559},
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, TxKind, B256, U256},
    rpc::types::TransactionRequest,
    sol,
    sol_types::{SolCall as _, SolValue as _},
};
use eyre::Context as _;
use serde::{Deserialize, Serialize};

use super::evm::{EvmChain, EvmNode, ICoreDepositWallet, ICoreWriter, IERC20};
use crate::amount::scale8;
use crate::config::HyperEvmConfig;
use crate::retry::retry_linear;

const GAS_ESTIMATE_ATTEMPTS: usize = 3;
const GAS_ESTIMATE_STEP: Duration = Duration::from_secs(2);

/// CoreWriter action encoding version.
const ACTION_VERSION: u8 = 0x01;
const ACTION_LIMIT_ORDER: u32 = 1;

sol! {
    struct LimitOrderAction {
        uint32 asset;
        bool isBuy;
        uint64 limitPx;
        uint64 sz;
        bool reduceOnly;
        uint8 tif;
        uint128 cloid;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    Approve,
    Deposit,
    Order,
}

impl CallKind {
    /// Gas limit used when estimation keeps failing.
    pub const fn fallback_gas_limit(self) -> u64 {
        match self {
            Self::Approve => 100_000,
            Self::Order => 150_000,
            Self::Deposit => 300_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    /// Add liquidity only (post-only).
    Alo,
    Gtc,
    Ioc,
}

impl Tif {
    pub const fn wire(self) -> u8 {
        match self {
            Self::Alo => 1,
            Self::Gtc => 2,
            Self::Ioc => 3,
        }
    }
}

/// HyperCore perp asset index for a market symbol such as `ETH-PERP` or `ETH`.
pub fn asset_index(market: &str) -> Option<u32> {
    let m = market.trim().to_uppercase();
    let coin = m.strip_suffix("-PERP").unwrap_or(&m);
    match coin {
        "BTC" => Some(0),
        "ETH" => Some(1),
        "SOL" => Some(4),
        "ARB" => Some(17),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub asset: u32,
    pub is_buy: bool,
    /// Price scaled by 1e8.
    pub limit_px: u64,
    /// Size scaled by 1e8.
    pub sz: u64,
    pub reduce_only: bool,
    pub tif: Tif,
    /// Client order id; 0 means none.
    pub cloid: u128,
}

impl LimitOrder {
    /// Builds an order from a market symbol and decimal price and size strings.
    pub fn parse(market: &str, is_buy: bool, price: &str, size: &str, tif: Tif) -> eyre::Result<Self> {
        let asset = asset_index(market).ok_or_else(|| eyre::eyre!("unknown market: {market}"))?;
        let limit_px = u64::try_from(scale8(price)?).context("limit price must be positive")?;
        let sz = u64::try_from(scale8(size)?).context("size must be positive")?;
        if limit_px == 0 || sz == 0 {
            eyre::bail!("limit price and size must be non-zero");
        }
        Ok(Self {
            asset,
            is_buy,
            limit_px,
            sz,
            reduce_only: false,
            tif,
            cloid: 0,
        })
    }

    /// `0x01 || action id (3 bytes, big endian) || abi.encode(order)`.
    pub fn encode_action(&self) -> Vec<u8> {
        let body = LimitOrderAction {
            asset: self.asset,
            isBuy: self.is_buy,
            limitPx: self.limit_px,
            sz: self.sz,
            reduceOnly: self.reduce_only,
            tif: self.tif.wire(),
            cloid: self.cloid,
        }
        .abi_encode();
        let id = ACTION_LIMIT_ORDER.to_be_bytes();
        let mut out = Vec::with_capacity(4 + body.len());
        out.push(ACTION_VERSION);
        out.extend_from_slice(id.get(1..).unwrap_or_default());
        out.extend_from_slice(&body);
        out
    }
}

/// HyperEVM contract addresses used by the builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperEvmContracts {
    pub usdc: Address,
    pub core_deposit_wallet: Address,
    pub core_writer: Address,
    pub destination_dex: u32,
}

impl HyperEvmContracts {
    pub fn from_config(cfg: &HyperEvmConfig) -> eyre::Result<Self> {
        Ok(Self {
            usdc: EvmChain::parse_address(&cfg.usdc_address).context("hyper_evm.usdc_address")?,
            core_deposit_wallet: EvmChain::parse_address(&cfg.core_deposit_wallet_address)
                .context("hyper_evm.core_deposit_wallet_address")?,
            core_writer: EvmChain::parse_address(&cfg.core_writer_address)
                .context("hyper_evm.core_writer_address")?,
            destination_dex: cfg.destination_dex,
        })
    }
}

/// An EIP-1559 transaction ready for an external signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvmTx {
    pub kind: CallKind,
    pub from: Address,
    pub tx: TxEip1559,
    /// EIP-2718 signing payload (type byte followed by the RLP fields).
    pub unsigned: Bytes,
    /// keccak256 of `unsigned`; this is what the dWallet signs.
    pub digest: B256,
    /// Whether `tx.gas_limit` came from the static fallback.
    pub gas_fallback: bool,
}

impl UnsignedEvmTx {
    pub const fn nonce(&self) -> u64 {
        self.tx.nonce
    }
}

pub struct EvmTxBuilder<'a> {
    node: &'a dyn EvmNode,
    contracts: HyperEvmContracts,
}

impl<'a> EvmTxBuilder<'a> {
    pub const fn new(node: &'a dyn EvmNode, contracts: HyperEvmContracts) -> Self {
        Self { node, contracts }
    }

    pub const fn contracts(&self) -> &HyperEvmContracts {
        &self.contracts
    }

    /// `USDC.approve(CoreDepositWallet, amount)`.
    pub async fn approve_usdc(
        &self,
        from: Address,
        amount: U256,
        nonce: Option<u64>,
    ) -> eyre::Result<UnsignedEvmTx> {
        let input = IERC20::approveCall {
            spender: self.contracts.core_deposit_wallet,
            value: amount,
        }
        .abi_encode();
        self.build(CallKind::Approve, from, self.contracts.usdc, input, nonce)
            .await
    }

    /// `CoreDepositWallet.deposit(amount, destinationDex)`.
    pub async fn deposit_usdc(
        &self,
        from: Address,
        amount: U256,
        nonce: Option<u64>,
    ) -> eyre::Result<UnsignedEvmTx> {
        let input = ICoreDepositWallet::depositCall {
            amount,
            destinationDex: self.contracts.destination_dex,
        }
        .abi_encode();
        self.build(
            CallKind::Deposit,
            from,
            self.contracts.core_deposit_wallet,
            input,
            nonce,
        )
        .await
    }

    /// `CoreWriter.sendRawAction(order action)`.
    pub async fn limit_order(
        &self,
        from: Address,
        order: &LimitOrder,
        nonce: Option<u64>,
    ) -> eyre::Result<UnsignedEvmTx> {
        let input = ICoreWriter::sendRawActionCall {
            data: order.encode_action().into(),
        }
        .abi_encode();
        self.build(CallKind::Order, from, self.contracts.core_writer, input, nonce)
            .await
    }

    async fn build(
        &self,
        kind: CallKind,
        from: Address,
        to: Address,
        input: Vec<u8>,
        nonce: Option<u64>,
    ) -> eyre::Result<UnsignedEvmTx> {
        let chain_id = self.node.chain_id();
        let nonce = match nonce {
            Some(n) => n,
            None => self.node.pending_nonce(from).await?,
        };
        let gas_price = self.node.gas_price().await?;
        let input = Bytes::from(input);

        let req = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(input.clone())
            .with_nonce(nonce)
            .with_chain_id(chain_id);
        let (gas_limit, gas_fallback) = match retry_linear(
            GAS_ESTIMATE_ATTEMPTS,
            GAS_ESTIMATE_STEP,
            "estimate gas",
            || self.node.estimate_gas(&req),
        )
        .await
        {
            Ok(g) => (g, false),
            Err(e) => {
                tracing::warn!(?kind, error = %format!("{e:#}"), fallback = kind.fallback_gas_limit(), "gas estimation failed; using static limit");
                (kind.fallback_gas_limit(), true)
            }
        };

        let tx = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: gas_price,
            max_priority_fee_per_gas: gas_price,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input,
            access_list: alloy::eips::eip2930::AccessList::default(),
        };
        let unsigned = Bytes::from(tx.encoded_for_signing());
        let digest = tx.signature_hash();
        tracing::info!(?kind, nonce, gas_limit, gas_price, %digest, "evm transaction built");
        Ok(UnsignedEvmTx {
            kind,
            from,
            tx,
            unsigned,
            digest,
            gas_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::broadcast::TxBroadcaster;
    use crate::chains::testkit::FakeNode;
    use alloy::primitives::{address, keccak256};
    use alloy::signers::{local::PrivateKeySigner, SignerSync as _};

    fn contracts() -> HyperEvmContracts {
        HyperEvmContracts {
            usdc: address!("0x2B3370eE501B4a559b57D449569354196457D8Ab"),
            core_deposit_wallet: address!("0x0B80659a4076E9E93C7DbE0f10675A16a3e5C206"),
            core_writer: address!("0x3333333333333333333333333333333333333333"),
            destination_dex: 0,
        }
    }

    #[test]
    fn asset_table() {
        assert_eq!(asset_index("BTC-PERP"), Some(0));
        assert_eq!(asset_index("eth-perp"), Some(1));
        assert_eq!(asset_index("SOL"), Some(4));
        assert_eq!(asset_index("ARB-PERP"), Some(17));
        assert_eq!(asset_index("DOGE-PERP"), None);
    }

    #[test]
    fn limit_order_action_layout() -> eyre::Result<()> {
        let order = LimitOrder::parse("ETH-PERP", true, "3000.5", "0.1", Tif::Gtc)?;
        assert_eq!(order.limit_px, 300_050_000_000);
        assert_eq!(order.sz, 10_000_000);
        let bytes = order.encode_action();
        assert_eq!(bytes.get(..4), Some(&[0x01, 0x00, 0x00, 0x01][..]));
        // Seven static words.
        assert_eq!(bytes.len(), 4 + 7 * 32);
        // asset = 1 in the last byte of the first word
        assert_eq!(bytes.get(4 + 31), Some(&1));
        // tif = Gtc (2) in word 6
        assert_eq!(bytes.get(4 + 5 * 32 + 31), Some(&2));
        Ok(())
    }

    #[tokio::test]
    async fn explicit_nonce_is_used_and_digest_matches_payload() -> eyre::Result<()> {
        let node = FakeNode::default();
        let b = EvmTxBuilder::new(&node, contracts());
        let from = address!("0x00000000000000000000000000000000000000aa");
        let tx = b.approve_usdc(from, U256::from(5_u64), Some(41)).await?;
        assert_eq!(tx.nonce(), 41);
        assert_eq!(tx.tx.chain_id, 998);
        assert_eq!(tx.tx.to, TxKind::Call(contracts().usdc));
        assert_eq!(tx.digest, keccak256(&tx.unsigned));
        assert_eq!(tx.tx.max_fee_per_gas, tx.tx.max_priority_fee_per_gas);
        assert!(!tx.gas_fallback);
        Ok(())
    }

    #[tokio::test]
    async fn pending_nonce_is_fetched_when_not_given() -> eyre::Result<()> {
        let node = FakeNode {
            nonce: 7,
            ..FakeNode::default()
        };
        let b = EvmTxBuilder::new(&node, contracts());
        let tx = b
            .deposit_usdc(Address::ZERO, U256::from(1_000_000_u64), None)
            .await?;
        assert_eq!(tx.nonce(), 7);
        assert_eq!(tx.tx.to, TxKind::Call(contracts().core_deposit_wallet));
        Ok(())
    }

    #[tokio::test]
    async fn back_to_back_builds_follow_the_pending_count() -> eyre::Result<()> {
        let key = PrivateKeySigner::random();
        let node = FakeNode {
            nonce: 12,
            ..FakeNode::default()
        };
        let b = EvmTxBuilder::new(&node, contracts());
        let value = U256::from(2_000_000_u64);

        let approve = b.approve_usdc(key.address(), value, None).await?;
        assert_eq!(approve.nonce(), 12);
        let sig = key.sign_hash_sync(&approve.digest)?;
        TxBroadcaster::new(&node)
            .broadcast(&approve, &sig.as_bytes(), None)
            .await?;

        let deposit = b.deposit_usdc(key.address(), value, None).await?;
        assert_eq!(deposit.nonce(), approve.nonce() + 1);
        // Rebuilding before anything else is broadcast keeps the next free nonce.
        let again = b.deposit_usdc(key.address(), value, None).await?;
        assert_eq!(again.nonce(), deposit.nonce());
        assert_ne!(again.nonce(), approve.nonce());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_estimation_falls_back_to_static_limit() -> eyre::Result<()> {
        let node = FakeNode {
            fail_estimate: true,
            ..FakeNode::default()
        };
        let b = EvmTxBuilder::new(&node, contracts());
        let start = tokio::time::Instant::now();
        let order = LimitOrder::parse("BTC", false, "94500.25", "0.01", Tif::Ioc)?;
        let tx = b.limit_order(Address::ZERO, &order, Some(0)).await?;
        assert_eq!(tx.tx.gas_limit, 150_000);
        assert!(tx.gas_fallback);
        assert_eq!(node.estimate_calls(), 3);
        // 2s after the first failure, 4s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(6));

        let tx = b.deposit_usdc(Address::ZERO, U256::from(1_u64), Some(0)).await?;
        assert_eq!(tx.tx.gas_limit, 300_000);
        let tx = b.approve_usdc(Address::ZERO, U256::from(1_u64), Some(0)).await?;
        assert_eq!(tx.tx.gas_limit, 100_000);
        Ok(())
    }
}
