//! Distributed key generation: one user-approved transaction that registers the encryption
//! key, requests DKG, and records the new dWallet in the wallet registry.

use secrecy::SecretString;

use crate::dwallet::{Curve, SuiAddress};
use crate::errors::DWalletError;
use crate::ledger::TransactionExecutor;
use crate::session::IkaSession;
use crate::transaction::{IkaTransactionBuilder, SessionIdentifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkgOutcome {
    pub digest: String,
    pub session_id: SessionIdentifier,
    /// The client's local DKG contribution, as stored in the registry.
    pub user_public_output: Vec<u8>,
}

#[derive(Debug)]
pub struct DkgOrchestrator<'a> {
    session: &'a IkaSession,
}

impl<'a> DkgOrchestrator<'a> {
    pub const fn new(session: &'a IkaSession) -> Self {
        Self { session }
    }

    /// Creates a dWallet on `curve` for `sender`.
    ///
    /// The DKG fee is paid from the first fee-token coin and the second gas coin, so the
    /// sender needs at least two gas coins. The dWallet capability is transferred to the sender.
    pub async fn create(
        &self,
        password: &SecretString,
        curve: Curve,
        sender: &SuiAddress,
        executor: &dyn TransactionExecutor,
    ) -> Result<DkgOutcome, DWalletError> {
        let s = self.session;
        let keys = s.derive_keys(password, curve)?;

        let fees = s.select_fee_coins(sender, 2).await?;
        let Some(dkg_gas) = fees.sui.get(1) else {
            return Err(DWalletError::InsufficientResources {
                missing: crate::errors::Resource::GasCoins {
                    required: 2,
                    found: fees.sui.len(),
                },
            });
        };

        let session_id = SessionIdentifier::random();
        let network_key = s
            .retry
            .call("latest_network_encryption_key", || {
                s.ledger.latest_network_encryption_key()
            })
            .await?;
        tracing::info!(curve = curve.as_str(), network_key = %network_key.id, "preparing dkg");

        let input = s
            .retry
            .call("prepare_dkg", || {
                s.protocol
                    .prepare_dkg(&keys, &network_key, &session_id, sender)
            })
            .await?;

        let mut b = IkaTransactionBuilder::new(sender.clone(), &s.network, &keys);
        b.register_encryption_key(curve);
        let ika = b.tx().object(&fees.ika.object_id);
        let sui = b.tx().object(&dkg_gas.object_id);
        let session_arg = b.register_session_identifier(&session_id);
        let cap = b.request_dwallet_dkg(&input, session_arg, &network_key, curve, ika, sui);
        let label = curve.chain().registry_label();
        b.register_dwallet(label, label, cap, &session_id, &input.user_public_output);
        b.tx().transfer_objects(vec![cap], sender);

        let res = executor.sign_and_execute(b.finish()).await?;
        tracing::info!(digest = %res.digest, curve = curve.as_str(), "dkg requested");
        Ok(DkgOutcome {
            digest: res.digest,
            session_id,
            user_public_output: input.user_public_output,
        })
    }
}
