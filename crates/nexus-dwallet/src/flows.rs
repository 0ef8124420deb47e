//! End-to-end HyperEVM flows signed by a dWallet: CoreWriter limit orders and USDC deposits
//! to HyperCore.

use alloy::primitives::{Address, B256, U256};
use eyre::Context as _;
use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::address::dwallet_evm_address;
use crate::amount::{format_base_units, parse_token_amount, USDC_DECIMALS};
use crate::chains::broadcast::TxBroadcaster;
use crate::chains::evm::{wait_for_receipt, EvmNode};
use crate::chains::evm_tx::{CallKind, EvmTxBuilder, HyperEvmContracts, LimitOrder, UnsignedEvmTx};
use crate::dwallet::{HashScheme, ObjectId, SuiAddress};
use crate::ledger::TransactionExecutor;
use crate::poll::PollConfig;
use crate::session::IkaSession;
use crate::settlement::{BalanceQuery, SettlementOutcome, SettlementProgress, SettlementWatcher};

/// HYPE, the HyperEVM gas token.
const NATIVE_DECIMALS: u32 = 18;

/// Everything needed to sign HyperEVM transactions with one dWallet.
pub struct DWalletEvmAccount<'a> {
    pub session: &'a IkaSession,
    pub node: &'a dyn EvmNode,
    pub contracts: HyperEvmContracts,
    pub executor: &'a dyn TransactionExecutor,
    pub password: &'a SecretString,
    /// Sui address paying coordinator fees.
    pub sender: &'a SuiAddress,
    pub dwallet_id: &'a ObjectId,
    pub receipt_wait: PollConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub hash: B256,
    pub nonce: u64,
    pub presign_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    pub approve: Option<SentTx>,
    pub deposit: SentTx,
    pub settlement: SettlementOutcome,
}

impl DWalletEvmAccount<'_> {
    pub async fn address(&self) -> eyre::Result<Address> {
        Ok(dwallet_evm_address(self.session, self.dwallet_id).await?)
    }

    fn builder(&self) -> EvmTxBuilder<'_> {
        EvmTxBuilder::new(self.node, self.contracts)
    }

    /// Fails when the native balance cannot pay for `kinds` at their static gas limits.
    async fn ensure_gas(&self, from: Address, kinds: &[CallKind]) -> eyre::Result<()> {
        let (native, gas_price) =
            tokio::join!(self.node.native_balance(from), self.node.gas_price());
        let native = native.context("native balance")?;
        let limit: u64 = kinds.iter().map(|k| k.fallback_gas_limit()).sum();
        let need = gas_price
            .context("gas price")?
            .saturating_mul(u128::from(limit));
        if native < U256::from(need) {
            eyre::bail!(
                "insufficient HYPE for HyperEVM gas: have {}, need about {}",
                format_base_units(native.saturating_to::<u128>(), NATIVE_DECIMALS)?,
                format_base_units(need, NATIVE_DECIMALS)?,
            );
        }
        Ok(())
    }

    /// Threshold-signs `tx` with one of `presigns` and broadcasts it.
    async fn sign_and_send(
        &self,
        tx: &UnsignedEvmTx,
        presigns: &[ObjectId],
        from: Address,
    ) -> eyre::Result<SentTx> {
        let signed = self
            .session
            .signer()
            .sign(
                self.password,
                self.dwallet_id,
                presigns,
                &tx.unsigned,
                HashScheme::Keccak256,
                self.sender,
                self.executor,
            )
            .await
            .with_context(|| format!("sign {:?} transaction", tx.kind))?;
        let hash = TxBroadcaster::new(self.node)
            .broadcast(tx, &signed.signature, Some(from))
            .await?;
        Ok(SentTx {
            hash,
            nonce: tx.nonce(),
            presign_id: signed.used_presign_id,
        })
    }

    /// Builds, signs and broadcasts a CoreWriter limit order and waits for its receipt.
    pub async fn place_limit_order(
        &self,
        order: &LimitOrder,
        presigns: &[ObjectId],
    ) -> eyre::Result<SentTx> {
        let from = self.address().await?;
        self.ensure_gas(from, &[CallKind::Order]).await?;
        let tx = self.builder().limit_order(from, order, None).await?;
        let sent = self.sign_and_send(&tx, presigns, from).await?;
        wait_for_receipt(self.node, sent.hash, self.receipt_wait).await?;
        tracing::info!(hash = %sent.hash, asset = order.asset, is_buy = order.is_buy, "order placed");
        Ok(sent)
    }

    /// Deposits `amount` USDC (decimal string) into the HyperCore account of the dWallet.
    ///
    /// Approves the bridge first when the allowance is short, which needs two unused presigns.
    /// The deposit uses the approval's nonce plus one. Settlement not being observed within the
    /// watcher's budget is reported, not raised.
    pub async fn deposit_usdc(
        &self,
        amount: &str,
        presigns: &[ObjectId],
        destination: &dyn BalanceQuery,
        watcher: SettlementWatcher,
        on_progress: impl FnMut(&SettlementProgress) + Send,
    ) -> eyre::Result<DepositReceipt> {
        let from = self.address().await?;
        let base = parse_token_amount(amount, USDC_DECIMALS)?;
        if base == 0 {
            eyre::bail!("deposit amount must be positive");
        }
        let value = U256::from(base);
        let usdc = self.contracts.usdc;

        let (balance, allowance) = tokio::join!(
            self.node.erc20_balance(usdc, from),
            self.node
                .erc20_allowance(usdc, from, self.contracts.core_deposit_wallet),
        );
        let balance = balance.context("usdc balance")?;
        if balance < value {
            eyre::bail!(
                "insufficient USDC on HyperEVM: have {}, need {}",
                format_base_units(balance.saturating_to::<u128>(), USDC_DECIMALS)?,
                format_base_units(base, USDC_DECIMALS)?,
            );
        }
        let needs_approval = allowance.context("usdc allowance")? < value;
        let available = self.session.used_presigns().filter_unused(presigns);
        let required = if needs_approval { 2 } else { 1 };
        if available.len() < required {
            eyre::bail!(
                "deposit needs {required} unused presigns, have {}",
                available.len()
            );
        }
        let kinds: &[CallKind] = if needs_approval {
            &[CallKind::Approve, CallKind::Deposit]
        } else {
            &[CallKind::Deposit]
        };
        self.ensure_gas(from, kinds).await?;
        let baseline: Decimal = destination
            .account_value(from)
            .await
            .context("hypercore balance before deposit")?;

        let b = self.builder();
        let approve = if needs_approval {
            let tx = b.approve_usdc(from, value, None).await?;
            Some(self.sign_and_send(&tx, &available, from).await?)
        } else {
            None
        };
        let deposit_nonce = approve.as_ref().map(|a| a.nonce + 1);
        let tx = b.deposit_usdc(from, value, deposit_nonce).await?;
        let remaining = self.session.used_presigns().filter_unused(&available);
        let deposit = self.sign_and_send(&tx, &remaining, from).await?;
        wait_for_receipt(self.node, deposit.hash, self.receipt_wait).await?;
        tracing::info!(hash = %deposit.hash, amount, "deposit confirmed on HyperEVM");

        let settlement = watcher
            .watch(destination, from, baseline, on_progress)
            .await;
        Ok(DepositReceipt {
            approve,
            deposit,
            settlement,
        })
    }
}
