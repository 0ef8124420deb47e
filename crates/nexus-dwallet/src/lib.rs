#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]
//! Orchestration core for Ika dWallets.
//!
//! Drives the user side of the Ika MPC protocol over Sui (DKG, activation, presigns and
//! threshold signing) and uses the resulting signatures to place orders and deposit USDC on
//! HyperEVM.

pub mod activation;
pub mod address;
pub mod amount;
pub mod chains;
pub mod config;
pub mod dkg;
pub mod dwallet;
pub mod errors;
pub mod flows;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod paths;
pub mod perps;
pub mod poll;
pub mod presign;
pub mod retry;
pub mod session;
pub mod settlement;
pub mod signer;
pub mod store;
pub mod sui_rpc;
pub mod transaction;

#[cfg(test)]
mod testkit;

pub use activation::{ActivationOrchestrator, ActivationOutcome};
pub use chains::broadcast::TxBroadcaster;
pub use chains::evm::{EvmChain, EvmNode};
pub use chains::evm_tx::{EvmTxBuilder, HyperEvmContracts, LimitOrder, Tif, UnsignedEvmTx};
pub use config::NexusConfig;
pub use dkg::{DkgOrchestrator, DkgOutcome};
pub use dwallet::{Curve, DWallet, DWalletState, HashScheme, ObjectId, SuiAddress};
pub use errors::DWalletError;
pub use flows::{DWalletEvmAccount, DepositReceipt, SentTx};
pub use keys::KeyMaterialDeriver;
pub use ledger::{IkaLedger, MpcProtocol, TransactionExecutor};
pub use perps::hyperliquid::HyperliquidClient;
pub use presign::{PresignPool, UsedPresigns};
pub use retry::RetryingSession;
pub use session::IkaSession;
pub use settlement::{BalanceQuery, SettlementOutcome, SettlementWatcher};
pub use signer::{SignOutcome, ThresholdSigner};
pub use sui_rpc::SuiJsonRpcLedger;
