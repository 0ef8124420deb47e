//! Per-user orchestration context shared by the DKG, activation, presign and signing flows.

use std::sync::Arc;

use secrecy::SecretString;

use crate::activation::ActivationOrchestrator;
use crate::config::{IkaNetwork, NexusConfig, TimingsConfig};
use crate::dkg::DkgOrchestrator;
use crate::dwallet::{Curve, DWallet, ObjectId, SuiAddress};
use crate::errors::{DWalletError, Resource};
use crate::keys::{KeyMaterialDeriver, UserShareEncryptionKeys};
use crate::ledger::{CoinRef, IkaLedger, MpcProtocol};
use crate::poll::{poll_until, PollConfig, PollOutcome};
use crate::presign::{PresignPool, UsedPresigns};
use crate::retry::RetryingSession;
use crate::signer::ThresholdSigner;

/// Coins selected to pay coordinator fees.
#[derive(Debug, Clone)]
pub struct FeeCoins {
    pub ika: CoinRef,
    pub sui: Vec<CoinRef>,
}

/// Everything an orchestrator needs: ledger access, the MPC library, network ids, timings,
/// the key-derivation salt and the session's used-presign set.
///
/// Nothing here is process-global; two sessions never share state unless the caller shares
/// the [`UsedPresigns`] handle explicitly.
pub struct IkaSession {
    pub(crate) ledger: Arc<dyn IkaLedger>,
    pub(crate) protocol: Arc<dyn MpcProtocol>,
    pub(crate) network: IkaNetwork,
    pub(crate) retry: RetryingSession,
    pub(crate) deriver: KeyMaterialDeriver,
    pub(crate) timings: TimingsConfig,
    pub(crate) used_presigns: Arc<UsedPresigns>,
}

impl std::fmt::Debug for IkaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IkaSession")
            .field("network", &self.network)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl IkaSession {
    pub fn new(
        ledger: Arc<dyn IkaLedger>,
        protocol: Arc<dyn MpcProtocol>,
        network: IkaNetwork,
        deriver: KeyMaterialDeriver,
        timings: TimingsConfig,
    ) -> Self {
        Self {
            ledger,
            protocol,
            network,
            retry: RetryingSession::new(timings.rate_limit_backoff()),
            deriver,
            timings,
            used_presigns: Arc::new(UsedPresigns::default()),
        }
    }

    pub fn from_config(
        cfg: &NexusConfig,
        ledger: Arc<dyn IkaLedger>,
        protocol: Arc<dyn MpcProtocol>,
    ) -> eyre::Result<Self> {
        Ok(Self::new(
            ledger,
            protocol,
            cfg.ika_network()?,
            KeyMaterialDeriver::new(cfg.key_derivation_salt()?),
            cfg.timings.clone(),
        ))
    }

    /// Shares a used-presign set with another session of the same user.
    #[must_use]
    pub fn with_used_presigns(mut self, used: Arc<UsedPresigns>) -> Self {
        self.used_presigns = used;
        self
    }

    pub fn used_presigns(&self) -> &Arc<UsedPresigns> {
        &self.used_presigns
    }

    pub const fn network(&self) -> &IkaNetwork {
        &self.network
    }

    pub const fn dkg(&self) -> DkgOrchestrator<'_> {
        DkgOrchestrator::new(self)
    }

    pub const fn activation(&self) -> ActivationOrchestrator<'_> {
        ActivationOrchestrator::new(self)
    }

    pub const fn presigns(&self) -> PresignPool<'_> {
        PresignPool::new(self)
    }

    pub const fn signer(&self) -> ThresholdSigner<'_> {
        ThresholdSigner::new(self)
    }

    pub(crate) fn derive_keys(
        &self,
        password: &SecretString,
        curve: Curve,
    ) -> Result<UserShareEncryptionKeys, DWalletError> {
        self.deriver.derive(password, curve)
    }

    pub(crate) async fn read_dwallet(&self, id: &ObjectId) -> Result<DWallet, DWalletError> {
        Ok(self
            .retry
            .call("get_dwallet", || self.ledger.get_dwallet(id))
            .await?)
    }

    /// Current state tag of a dWallet, for display and reconciliation.
    pub async fn dwallet_state(&self, id: &ObjectId) -> Result<String, DWalletError> {
        Ok(self.read_dwallet(id).await?.state.tag().to_owned())
    }

    /// Picks the first fee-token coin and requires `min_gas_coins` distinct gas coins.
    pub(crate) async fn select_fee_coins(
        &self,
        owner: &SuiAddress,
        min_gas_coins: usize,
    ) -> Result<FeeCoins, DWalletError> {
        let ika = self
            .retry
            .call("owned_coins(ika)", || {
                self.ledger.owned_coins(owner, &self.network.ika_coin_type)
            })
            .await?;
        let sui = self
            .retry
            .call("owned_coins(sui)", || {
                self.ledger.owned_coins(owner, &self.network.sui_coin_type)
            })
            .await?;
        let Some(ika) = ika.into_iter().next() else {
            return Err(DWalletError::InsufficientResources {
                missing: Resource::FeeToken,
            });
        };
        if sui.len() < min_gas_coins {
            return Err(DWalletError::InsufficientResources {
                missing: Resource::GasCoins {
                    required: min_gas_coins,
                    found: sui.len(),
                },
            });
        }
        Ok(FeeCoins { ika, sui })
    }

    /// Polls the dWallet until `accept` returns `Some`, or fails when it reaches a terminal
    /// state other than the one awaited.
    pub(crate) async fn wait_for_dwallet<T>(
        &self,
        id: &ObjectId,
        cfg: PollConfig,
        target: &'static str,
        accept: impl Fn(DWallet) -> Option<T>,
    ) -> Result<PollOutcome<T>, DWalletError> {
        let accept = &accept;
        poll_until(cfg, target, || async move {
            let w = self.read_dwallet(id).await?;
            if w.state.is_terminal() {
                return Err(DWalletError::StateUnreachable {
                    id: id.clone(),
                    target,
                    last_seen: w.state.tag().to_owned(),
                });
            }
            Ok(accept(w))
        })
        .await
    }
}
