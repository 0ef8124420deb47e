//! In-memory [`EvmNode`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

use super::evm::EvmNode;

pub struct FakeNode {
    pub nonce: u64,
    pub gas_price: u128,
    pub fail_estimate: bool,
    pub native_balance: U256,
    pub usdc_balance: U256,
    pub allowance: U256,
    pub reverted: bool,
    pub(crate) estimates: AtomicUsize,
    pub sent: Mutex<Vec<Vec<u8>>>,
    /// Transactions broadcast so far.
    pub(crate) next_nonce: AtomicU64,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            nonce: 0,
            gas_price: 100_000_000,
            fail_estimate: false,
            // 1 HYPE.
            native_balance: U256::from(1_000_000_000_000_000_000_u64),
            usdc_balance: U256::ZERO,
            allowance: U256::ZERO,
            reverted: false,
            estimates: AtomicUsize::new(0),
            sent: Mutex::new(vec![]),
            next_nonce: AtomicU64::new(0),
        }
    }
}

impl FakeNode {
    pub fn estimate_calls(&self) -> usize {
        self.estimates.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EvmNode for FakeNode {
    fn chain_id(&self) -> u64 {
        998
    }

    async fn pending_nonce(&self, _addr: Address) -> eyre::Result<u64> {
        // Pending count does not move until something is broadcast.
        Ok(self.nonce + self.next_nonce.load(Ordering::SeqCst))
    }

    async fn gas_price(&self) -> eyre::Result<u128> {
        Ok(self.gas_price)
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> eyre::Result<u64> {
        self.estimates.fetch_add(1, Ordering::SeqCst);
        if self.fail_estimate {
            eyre::bail!("execution reverted");
        }
        Ok(60_000)
    }

    async fn send_raw(&self, raw: &[u8]) -> eyre::Result<()> {
        self.next_nonce.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(raw.to_vec());
        Ok(())
    }

    async fn native_balance(&self, _addr: Address) -> eyre::Result<U256> {
        Ok(self.native_balance)
    }

    async fn erc20_balance(&self, _token: Address, _owner: Address) -> eyre::Result<U256> {
        Ok(self.usdc_balance)
    }

    async fn erc20_allowance(
        &self,
        _token: Address,
        _owner: Address,
        _spender: Address,
    ) -> eyre::Result<U256> {
        Ok(self.allowance)
    }

    async fn receipt_status(&self, _tx: B256) -> eyre::Result<Option<bool>> {
        Ok(Some(!self.reverted))
    }
}
