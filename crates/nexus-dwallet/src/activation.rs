//! Moves a dWallet from `AwaitingKeyHolderSignature` to `Active` by accepting the encrypted
//! user share.

use secrecy::SecretString;

use crate::dwallet::{Curve, DWalletState, ObjectId, SuiAddress};
use crate::errors::DWalletError;
use crate::ledger::TransactionExecutor;
use crate::poll::PollOutcome;
use crate::session::IkaSession;
use crate::transaction::IkaTransactionBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Nothing was submitted; the dWallet was already active.
    AlreadyActive,
    Activated { digest: String },
    /// The acceptance executed but `Active` was not observed in time. The dWallet usually
    /// becomes active shortly after; callers may re-check with [`IkaSession::dwallet_state`].
    SubmittedUnconfirmed { digest: String },
}

enum Ready {
    Active,
    Awaiting(Vec<u8>),
}

#[derive(Debug)]
pub struct ActivationOrchestrator<'a> {
    session: &'a IkaSession,
}

impl<'a> ActivationOrchestrator<'a> {
    pub const fn new(session: &'a IkaSession) -> Self {
        Self { session }
    }

    /// Idempotent: calling it on an active dWallet returns [`ActivationOutcome::AlreadyActive`]
    /// without prompting the user.
    ///
    /// `user_public_output` is [`DkgOutcome::user_public_output`](crate::dkg::DkgOutcome) from
    /// the DKG that created the dWallet. The network's output is checked against it before
    /// anything is signed.
    pub async fn activate(
        &self,
        password: &SecretString,
        curve: Curve,
        dwallet_id: &ObjectId,
        user_public_output: &[u8],
        sender: &SuiAddress,
        executor: &dyn TransactionExecutor,
    ) -> Result<ActivationOutcome, DWalletError> {
        let s = self.session;
        let current = s.read_dwallet(dwallet_id).await?;
        if current.curve != curve {
            return Err(DWalletError::KeyMaterial(format!(
                "dwallet {dwallet_id} uses curve {}, not {}",
                current.curve.as_str(),
                curve.as_str()
            )));
        }
        match &current.state {
            DWalletState::Active { .. } => return Ok(ActivationOutcome::AlreadyActive),
            DWalletState::Frozen => {
                return Err(DWalletError::StateUnreachable {
                    id: dwallet_id.clone(),
                    target: "AwaitingKeyHolderSignature",
                    last_seen: current.state.tag().to_owned(),
                })
            }
            DWalletState::DkgInProgress
            | DWalletState::AwaitingKeyHolderSignature { .. }
            | DWalletState::Unrecognized(_) => {}
        }

        tracing::info!(dwallet = %dwallet_id, state = current.state.tag(), "waiting for network dkg");
        let waited = s
            .wait_for_dwallet(
                dwallet_id,
                s.timings.activation_awaiting_signature.poll(),
                "AwaitingKeyHolderSignature",
                |w| match w.state {
                    DWalletState::Active { .. } => Some(Ready::Active),
                    DWalletState::AwaitingKeyHolderSignature {
                        public_output: Some(po),
                    } => Some(Ready::Awaiting(po)),
                    DWalletState::AwaitingKeyHolderSignature { public_output: None }
                    | DWalletState::DkgInProgress
                    | DWalletState::Frozen
                    | DWalletState::Unrecognized(_) => None,
                },
            )
            .await?;
        let public_output = match waited {
            PollOutcome::Ready(Ready::Active) => return Ok(ActivationOutcome::AlreadyActive),
            PollOutcome::Ready(Ready::Awaiting(po)) => po,
            PollOutcome::TimedOut => {
                let last_seen = s.dwallet_state(dwallet_id).await?;
                return Err(DWalletError::StateUnreachable {
                    id: dwallet_id.clone(),
                    target: "AwaitingKeyHolderSignature",
                    last_seen,
                });
            }
        };

        if !s
            .protocol
            .verify_user_output(curve, user_public_output, &public_output)?
        {
            tracing::warn!(dwallet = %dwallet_id, "network dkg output does not match local output");
            return Err(DWalletError::UserOutputMismatch(dwallet_id.clone()));
        }

        let wallet = s.read_dwallet(dwallet_id).await?;
        let table = wallet
            .encrypted_shares_table
            .ok_or_else(|| DWalletError::NoEncryptedShare(dwallet_id.clone()))?;
        let shares = s
            .retry
            .call("encrypted_shares", || s.ledger.dynamic_field_object_ids(&table))
            .await?;
        let share_id = shares
            .into_iter()
            .next()
            .ok_or_else(|| DWalletError::NoEncryptedShare(dwallet_id.clone()))?;

        let keys = s.derive_keys(password, curve)?;
        let mut b = IkaTransactionBuilder::new(sender.clone(), &s.network, &keys);
        b.accept_encrypted_user_share(dwallet_id, &share_id, &public_output);
        let digest = executor.sign_and_execute(b.finish()).await?.digest;
        tracing::info!(dwallet = %dwallet_id, %digest, share = %share_id, "encrypted share accepted");

        let active = s
            .wait_for_dwallet(
                dwallet_id,
                s.timings.activation_active.poll(),
                "Active",
                |w| matches!(w.state, DWalletState::Active { .. }).then_some(()),
            )
            .await;
        match active {
            Ok(PollOutcome::Ready(())) => Ok(ActivationOutcome::Activated { digest }),
            Ok(PollOutcome::TimedOut) => {
                tracing::warn!(dwallet = %dwallet_id, %digest, "activation submitted but not yet active");
                Ok(ActivationOutcome::SubmittedUnconfirmed { digest })
            }
            Err(e) => {
                tracing::warn!(dwallet = %dwallet_id, %digest, error = %e, "activation status unknown");
                Ok(ActivationOutcome::SubmittedUnconfirmed { digest })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testkit::{dwallet_obj, password, sender, session, FakeExecutor, FakeLedger, FakeProtocol};
    use crate::transaction::{CallArg, PureValue};

    const W: &str = "0xd1";

    #[tokio::test]
    async fn active_dwallet_is_left_alone() -> eyre::Result<()> {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "Active", Some(&[7, 7])));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::default();

        let out = s
            .activation()
            .activate(&password(), Curve::Secp256k1, &W.into(), &[7, 7], &sender(), &exec)
            .await?;
        assert_eq!(out, ActivationOutcome::AlreadyActive);
        assert!(exec.executed().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn accepts_first_share_then_observes_active() -> eyre::Result<()> {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "DKGInProgress", None));
        ledger.push_object(W, dwallet_obj(W, "DKGInProgress", None));
        for _ in 0..3 {
            ledger.push_object(W, dwallet_obj(W, "AwaitingKeyHolderSignature", Some(&[4, 2])));
        }
        ledger.push_object(W, dwallet_obj(W, "Active", Some(&[4, 2, 9])));
        ledger.set_dynamic_fields("0x7ab", &["0x5a1", "0x5a2"]);
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::returning(vec![Ok("ACT")]);

        let out = s
            .activation()
            .activate(&password(), Curve::Secp256k1, &W.into(), &[4, 2], &sender(), &exec)
            .await?;
        assert_eq!(out, ActivationOutcome::Activated { digest: "ACT".into() });

        let txs = exec.executed();
        let tx = txs.first().ok_or_else(|| eyre::eyre!("no tx"))?;
        assert!(tx.move_call("accept_encrypted_user_share").is_some());
        assert!(tx.inputs.contains(&CallArg::Pure(PureValue::Id("0x5a1".into()))));
        assert!(!tx.inputs.contains(&CallArg::Pure(PureValue::Id("0x5a2".into()))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_network_output_is_never_signed() {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "AwaitingKeyHolderSignature", Some(&[6, 6, 6])));
        ledger.set_dynamic_fields("0x7ab", &["0x5a1"]);
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::returning(vec![Ok("ACT")]);

        let err = s
            .activation()
            .activate(&password(), Curve::Secp256k1, &W.into(), &[0xaa, 0xbb], &sender(), &exec)
            .await
            .err();
        assert!(matches!(err, Some(DWalletError::UserOutputMismatch(ref id)) if id.as_str() == W));
        assert!(exec.executed().is_empty(), "nothing signed");
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_curve_is_rejected_before_waiting() {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "AwaitingKeyHolderSignature", Some(&[1])));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::default();

        let err = s
            .activation()
            .activate(&password(), Curve::Ed25519, &W.into(), &[1], &sender(), &exec)
            .await
            .err();
        assert!(matches!(err, Some(DWalletError::KeyMaterial(_))));
        assert!(exec.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn frozen_dwallet_cannot_be_activated() {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "Frozen", None));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::default();

        let err = s
            .activation()
            .activate(&password(), Curve::Secp256k1, &W.into(), &[0], &sender(), &exec)
            .await
            .err();
        assert!(matches!(
            err,
            Some(DWalletError::StateUnreachable { ref last_seen, .. }) if last_seen == "Frozen"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_share_is_reported() {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "AwaitingKeyHolderSignature", Some(&[1])));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::default();

        let err = s
            .activation()
            .activate(&password(), Curve::Secp256k1, &W.into(), &[1], &sender(), &exec)
            .await
            .err();
        assert!(matches!(err, Some(DWalletError::NoEncryptedShare(_))));
        assert!(exec.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_activation_is_not_an_error() -> eyre::Result<()> {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "AwaitingKeyHolderSignature", Some(&[1])));
        ledger.set_dynamic_fields("0x7ab", &["0x5a1"]);
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::returning(vec![Ok("ACT")]);

        let out = s
            .activation()
            .activate(&password(), Curve::Secp256k1, &W.into(), &[1], &sender(), &exec)
            .await?;
        assert_eq!(
            out,
            ActivationOutcome::SubmittedUnconfirmed { digest: "ACT".into() }
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_dkg_times_out_with_last_seen_state() {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object(W, dwallet_obj(W, "DKGInProgress", None));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::default();

        let err = s
            .activation()
            .activate(&password(), Curve::Secp256k1, &W.into(), &[0], &sender(), &exec)
            .await
            .err();
        assert!(matches!(
            err,
            Some(DWalletError::StateUnreachable { ref last_seen, .. }) if last_seen == "DKGInProgress"
        ));
    }
}
