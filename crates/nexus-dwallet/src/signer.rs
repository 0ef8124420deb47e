//! Threshold signing with one presign out of a caller-supplied candidate list.

use secrecy::SecretString;

use crate::dwallet::{DWalletState, HashScheme, ObjectId, SignState, SuiAddress};
use crate::errors::{DWalletError, RpcError};
use crate::ledger::{TransactionExecutor, UserSignRequest};
use crate::poll::{poll_until, PollOutcome};
use crate::presign::{CompletedPresign, PresignPool};
use crate::session::IkaSession;
use crate::transaction::IkaTransactionBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    /// 64 bytes (`r || s`) or 65 bytes (`r || s || v`).
    pub signature: Vec<u8>,
    pub used_presign_id: ObjectId,
    pub digest: String,
    pub sign_id: ObjectId,
}

#[derive(Debug)]
pub struct ThresholdSigner<'a> {
    session: &'a IkaSession,
}

impl<'a> ThresholdSigner<'a> {
    pub const fn new(session: &'a IkaSession) -> Self {
        Self { session }
    }

    /// Signs `message` with the dWallet, consuming the first usable candidate presign.
    ///
    /// Candidates are tried in order. One that does not complete within the per-candidate
    /// wait is skipped; any other failure aborts. The presign is marked used as soon as the
    /// sign request executes, even if the signature is never observed.
    #[expect(clippy::too_many_arguments, reason = "one argument per sign request input")]
    pub async fn sign(
        &self,
        password: &SecretString,
        dwallet_id: &ObjectId,
        candidates: &[ObjectId],
        message: &[u8],
        hash: HashScheme,
        sender: &SuiAddress,
        executor: &dyn TransactionExecutor,
    ) -> Result<SignOutcome, DWalletError> {
        let s = self.session;
        let candidates = s.used_presigns.filter_unused(candidates);
        if candidates.is_empty() {
            return Err(DWalletError::NoPresigns);
        }
        let presign = self.first_completed(&candidates).await?;
        tracing::info!(dwallet = %dwallet_id, presign = %presign.id, "presign selected");

        let wallet = s
            .wait_for_dwallet(
                dwallet_id,
                s.timings.signer_dwallet_active.poll(),
                "Active",
                |w| match w.state {
                    DWalletState::Active { .. } => Some(w),
                    DWalletState::DkgInProgress
                    | DWalletState::AwaitingKeyHolderSignature { .. }
                    | DWalletState::Frozen
                    | DWalletState::Unrecognized(_) => None,
                },
            )
            .await
            .map_err(|e| match e {
                DWalletError::StateUnreachable { .. } => DWalletError::NotActive(dwallet_id.clone()),
                other => other,
            })?
            .ready()
            .ok_or_else(|| DWalletError::NotActive(dwallet_id.clone()))?;
        let combined = wallet
            .combined_public_output()
            .ok_or_else(|| DWalletError::NotActive(dwallet_id.clone()))?
            .to_vec();
        let curve = wallet.curve;
        let algorithm = curve.chain().signature_algorithm();

        let keys = s.derive_keys(password, curve)?;
        let fees = s.select_fee_coins(sender, 1).await?;
        let Some(gas) = fees.sui.first() else {
            return Err(DWalletError::InsufficientResources {
                missing: crate::errors::Resource::GasCoins { required: 1, found: 0 },
            });
        };

        let table = wallet
            .encrypted_shares_table
            .clone()
            .ok_or_else(|| DWalletError::NoEncryptedShare(dwallet_id.clone()))?;
        let share_id = s
            .retry
            .call("encrypted_shares", || s.ledger.dynamic_field_object_ids(&table))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DWalletError::NoEncryptedShare(dwallet_id.clone()))?;
        let share = s
            .retry
            .call("get_encrypted_user_share", || {
                s.ledger.get_encrypted_user_share(&share_id)
            })
            .await?;

        let presign_cap = presign.cap_id.clone().ok_or_else(|| {
            RpcError::Decode(format!("presign {}: missing cap_id", presign.id))
        })?;
        let presign_bytes = presign.presign.clone().ok_or_else(|| {
            RpcError::Decode(format!("presign {}: missing presign bytes", presign.id))
        })?;

        let user_sign_message = s
            .protocol
            .create_user_sign_message(UserSignRequest {
                keys: &keys,
                combined_public_output: &combined,
                encrypted_share: &share,
                presign: &presign_bytes,
                message,
                hash,
                algorithm,
            })
            .await?;
        tracing::debug!(bytes = user_sign_message.len(), "user sign message prepared");

        let mut b = IkaTransactionBuilder::new(sender.clone(), &s.network, &keys);
        let approval = b.approve_message(&wallet.dwallet_cap_id, algorithm, hash, message);
        let verified = b.verify_presign_cap(&presign_cap);
        let ika = b.tx().object(&fees.ika.object_id);
        let sui = b.tx().object(&gas.object_id);
        b.request_sign(verified, approval, user_sign_message, ika, sui);

        let digest = executor.sign_and_execute(b.finish()).await?.digest;
        s.used_presigns.mark_used(&presign.id);
        tracing::info!(dwallet = %dwallet_id, %digest, presign = %presign.id, "sign requested");

        let fx = s
            .retry
            .call("wait_for_transaction", || s.ledger.wait_for_transaction(&digest))
            .await?;
        let sign_id = fx
            .event_id_field("SignRequestEvent", "sign_id")
            .or_else(|| fx.created_object_of_type("SignSession"))
            .ok_or_else(|| DWalletError::SignSessionNotFound {
                digest: digest.clone(),
            })?;

        let wait = s.timings.sign_session_completed.poll();
        let signature = match self.wait_signature(&sign_id, wait).await? {
            PollOutcome::Ready(sig) => sig,
            PollOutcome::TimedOut => {
                return Err(DWalletError::SignaturePending {
                    sign_id,
                    presign_id: presign.id,
                    waited: wait.timeout,
                })
            }
        };
        if !matches!(signature.len(), 64 | 65) {
            return Err(DWalletError::InvalidSignatureLength(signature.len()));
        }
        tracing::info!(sign = %sign_id, len = signature.len(), "signature ready");
        Ok(SignOutcome {
            signature,
            used_presign_id: presign.id,
            digest,
            sign_id,
        })
    }

    /// Walks the candidates in order and returns the first one observed `Completed`.
    async fn first_completed(&self, candidates: &[ObjectId]) -> Result<CompletedPresign, DWalletError> {
        let pool = PresignPool::new(self.session);
        let wait = self.session.timings.signer_presign_candidate.poll();
        for id in candidates {
            match pool.wait_completed(id, wait).await? {
                PollOutcome::Ready(p) => return Ok(p),
                PollOutcome::TimedOut => {
                    tracing::warn!(presign = %id, timeout_s = wait.timeout.as_secs(), "presign not completed; trying next");
                }
            }
        }
        Err(DWalletError::AllPresignsExhausted {
            tried: candidates.len(),
        })
    }

    async fn wait_signature(
        &self,
        sign_id: &ObjectId,
        wait: crate::poll::PollConfig,
    ) -> Result<PollOutcome<Vec<u8>>, DWalletError> {
        let s = self.session;
        poll_until(wait, "sign session completed", || async {
            let session = s
                .retry
                .call("get_sign_session", || s.ledger.get_sign_session(sign_id))
                .await?;
            match session.state {
                SignState::Completed { signature } => Ok(Some(signature)),
                SignState::Rejected => Err(DWalletError::SignRejected(sign_id.clone())),
                SignState::Requested | SignState::Unrecognized(_) => Ok(None),
            }
        })
        .await
    }
}
