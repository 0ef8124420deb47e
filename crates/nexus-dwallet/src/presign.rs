//! Presign requests and the session-local record of consumed presigns.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use secrecy::SecretString;

use crate::dwallet::{raw_field, raw_state_tag, Curve, ObjectId, PresignState, SignatureAlgorithm, SuiAddress};
use crate::errors::{DWalletError, RpcError};
use crate::ledger::TransactionExecutor;
use crate::poll::{poll_until, PollConfig, PollOutcome};
use crate::session::IkaSession;
use crate::transaction::IkaTransactionBuilder;

/// Presign ids consumed by this session.
///
/// Advisory only: it never sees presigns consumed by other clients, so the signer still checks
/// remote state before using a candidate.
#[derive(Debug, Default)]
pub struct UsedPresigns {
    ids: Mutex<HashSet<ObjectId>>,
}

impl UsedPresigns {
    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<ObjectId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_used(&self, id: &ObjectId) {
        self.ids().insert(id.clone());
    }

    pub fn is_used(&self, id: &ObjectId) -> bool {
        self.ids().contains(id)
    }

    /// Drops used ids, keeping the caller's order.
    pub fn filter_unused(&self, candidates: &[ObjectId]) -> Vec<ObjectId> {
        let used = self.ids();
        candidates
            .iter()
            .filter(|c| !used.contains(*c))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignStatus {
    Completed,
    /// Requested on chain but not completed within the wait. Still usable later.
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequestOutcome {
    pub digest: String,
    pub presign_id: ObjectId,
    pub status: PresignStatus,
}

/// A presign observed in the `Completed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPresign {
    pub id: ObjectId,
    pub cap_id: Option<ObjectId>,
    /// `None` when only the raw state tag could be read.
    pub presign: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct PresignPool<'a> {
    session: &'a IkaSession,
}

impl<'a> PresignPool<'a> {
    pub const fn new(session: &'a IkaSession) -> Self {
        Self { session }
    }

    /// Requests a global presign for `dwallet_id` and records it in the wallet registry.
    ///
    /// Not completing within the wait is still a success, reported as
    /// [`PresignStatus::Submitted`].
    pub async fn request(
        &self,
        password: &SecretString,
        curve: Curve,
        algorithm: SignatureAlgorithm,
        dwallet_id: &ObjectId,
        sender: &SuiAddress,
        executor: &dyn TransactionExecutor,
    ) -> Result<PresignRequestOutcome, DWalletError> {
        let s = self.session;
        let keys = s.derive_keys(password, curve)?;
        let fees = s.select_fee_coins(sender, 1).await?;
        let network_key = s
            .retry
            .call("latest_network_encryption_key", || {
                s.ledger.latest_network_encryption_key()
            })
            .await?;

        let mut b = IkaTransactionBuilder::new(sender.clone(), &s.network, &keys);
        let gas = b.tx().gas();
        let fee = b.tx().split_coins(gas, &[s.network.presign_fee_amount]);
        let ika = b.tx().object(&fees.ika.object_id);
        let cap = b.request_global_presign(&network_key, curve, algorithm, ika, fee);
        b.tx().merge_coins(gas, vec![fee]);
        b.add_presign_id(dwallet_id, cap);
        b.tx().transfer_objects(vec![cap], sender);

        let digest = executor.sign_and_execute(b.finish()).await?.digest;
        tracing::info!(dwallet = %dwallet_id, %digest, "presign requested");

        let fx = s
            .retry
            .call("wait_for_transaction", || s.ledger.wait_for_transaction(&digest))
            .await?;
        let presign_id = fx
            .event_id_field("PresignRequestEvent", "presign_id")
            .ok_or(DWalletError::ProtocolEventMissing("PresignRequestEvent"))?;

        let status = match self
            .wait_completed(&presign_id, s.timings.presign_completed.poll())
            .await?
        {
            PollOutcome::Ready(_) => PresignStatus::Completed,
            PollOutcome::TimedOut => PresignStatus::Submitted,
        };
        tracing::info!(presign = %presign_id, ?status, "presign request settled");
        Ok(PresignRequestOutcome {
            digest,
            presign_id,
            status,
        })
    }

    /// Waits for `id` to reach `Completed`.
    ///
    /// A rejected presign fails with [`DWalletError::StateUnreachable`]. When the typed decoder
    /// rejects the object, the raw state tag is used instead.
    pub async fn wait_completed(
        &self,
        id: &ObjectId,
        cfg: PollConfig,
    ) -> Result<PollOutcome<CompletedPresign>, DWalletError> {
        poll_until(cfg, "presign completed", || self.check_completed(id)).await
    }

    async fn check_completed(
        &self,
        id: &ObjectId,
    ) -> Result<Option<CompletedPresign>, DWalletError> {
        let s = self.session;
        match s.retry.call("get_presign", || s.ledger.get_presign(id)).await {
            Ok(p) => match p.state {
                PresignState::Completed { presign } => Ok(Some(CompletedPresign {
                    id: p.id,
                    cap_id: p.cap_id,
                    presign: Some(presign),
                })),
                PresignState::Rejected => Err(DWalletError::StateUnreachable {
                    id: id.clone(),
                    target: "Completed",
                    last_seen: "NetworkRejected".into(),
                }),
                PresignState::Requested | PresignState::Unrecognized(_) => Ok(None),
            },
            Err(RpcError::Decode(reason)) => {
                tracing::debug!(presign = %id, %reason, "typed presign read failed; using raw state");
                let raw = s.retry.call("get_object", || s.ledger.get_object(id)).await?;
                let tag = raw_state_tag(&raw).unwrap_or_default();
                if !tag.contains("Completed") {
                    return Ok(None);
                }
                Ok(Some(CompletedPresign {
                    id: id.clone(),
                    cap_id: raw_field(&raw, "cap_id")
                        .and_then(serde_json::Value::as_str)
                        .map(ObjectId::new),
                    presign: raw_field(&raw, "presign").and_then(crate::dwallet::bytes_from_json),
                }))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::{LedgerEvent, TransactionEffects};
    use crate::testkit::{password, presign_obj, sender, session, FakeExecutor, FakeLedger, FakeProtocol};
    use serde_json::json;

    fn presign_event(digest: &str, id: &str) -> TransactionEffects {
        TransactionEffects {
            digest: digest.into(),
            events: vec![LedgerEvent {
                event_type: "0x3::coordinator_inner::DWalletSessionEvent<0x3::coordinator_inner::PresignRequestEvent>".into(),
                parsed_json: json!({ "event_data": { "presign_id": id } }),
            }],
            object_changes: vec![],
        }
    }

    #[test]
    fn used_presigns_filter_keeps_order() {
        let used = UsedPresigns::default();
        let ids: Vec<ObjectId> = ["0x1", "0x2", "0x3", "0x4"].into_iter().map(ObjectId::new).collect();
        used.mark_used(&ObjectId::new("0x2"));
        assert!(used.is_used(&ObjectId::new("0x2")));
        assert_eq!(
            used.filter_unused(&ids),
            vec![ObjectId::new("0x1"), ObjectId::new("0x3"), ObjectId::new("0x4")]
        );
        assert_eq!(used.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_splits_fee_and_waits_for_completion() -> eyre::Result<()> {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.set_effects(presign_event("P1", "0xp1"));
        ledger.push_object("0xp1", presign_obj("0xp1", "Requested", None));
        ledger.push_object("0xp1", presign_obj("0xp1", "Completed", Some(&[1, 2, 3])));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::returning(vec![Ok("P1")]);

        let out = s
            .presigns()
            .request(
                &password(),
                Curve::Secp256k1,
                SignatureAlgorithm::EcdsaSecp256k1,
                &"0xd1".into(),
                &sender(),
                &exec,
            )
            .await?;
        assert_eq!(out.presign_id, ObjectId::new("0xp1"));
        assert_eq!(out.status, PresignStatus::Completed);

        let txs = exec.executed();
        let tx = txs.first().ok_or_else(|| eyre::eyre!("no tx"))?;
        assert!(tx.move_call("request_global_presign").is_some());
        assert!(tx.move_call("add_presign_id").is_some());
        assert!(tx.commands.iter().any(|c| matches!(c, crate::transaction::Command::SplitCoins { .. })));
        assert!(tx.commands.iter().any(|c| matches!(c, crate::transaction::Command::MergeCoins { .. })));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_presign_is_reported_as_submitted() -> eyre::Result<()> {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.set_effects(presign_event("P1", "0xp1"));
        ledger.push_object("0xp1", presign_obj("0xp1", "Requested", None));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::returning(vec![Ok("P1")]);

        let out = s
            .presigns()
            .request(
                &password(),
                Curve::Secp256k1,
                SignatureAlgorithm::EcdsaSecp256k1,
                &"0xd1".into(),
                &sender(),
                &exec,
            )
            .await?;
        assert_eq!(out.status, PresignStatus::Submitted);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn missing_event_is_a_protocol_error() {
        let ledger = Arc::new(FakeLedger::funded());
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));
        let exec = FakeExecutor::returning(vec![Ok("P1")]);

        let err = s
            .presigns()
            .request(
                &password(),
                Curve::Secp256k1,
                SignatureAlgorithm::EcdsaSecp256k1,
                &"0xd1".into(),
                &sender(),
                &exec,
            )
            .await
            .err();
        assert!(matches!(
            err,
            Some(DWalletError::ProtocolEventMissing("PresignRequestEvent"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_completed_presign_falls_back_to_raw_tag() -> eyre::Result<()> {
        let ledger = Arc::new(FakeLedger::funded());
        // Completed without bytes fails the typed decoder.
        ledger.push_object("0xp9", presign_obj("0xp9", "Completed", None));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));

        let out = s
            .presigns()
            .wait_completed(&"0xp9".into(), PollConfig::secs(10, 2))
            .await?
            .ready()
            .ok_or_else(|| eyre::eyre!("not completed"))?;
        assert_eq!(out.cap_id, Some(ObjectId::new("0xp9cap")));
        assert_eq!(out.presign, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_presign_aborts_the_wait() {
        let ledger = Arc::new(FakeLedger::funded());
        ledger.push_object("0xp9", presign_obj("0xp9", "NetworkRejected", None));
        let s = session(&ledger, &Arc::new(FakeProtocol::default()));

        let err = s
            .presigns()
            .wait_completed(&"0xp9".into(), PollConfig::secs(10, 2))
            .await
            .err();
        assert!(matches!(err, Some(DWalletError::StateUnreachable { .. })));
    }
}
