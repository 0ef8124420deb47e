//! In-memory fakes for the ledger, executor and MPC library.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{IkaNetwork, TimingsConfig};
use crate::dwallet::{Curve, NetworkEncryptionKey, ObjectId, SuiAddress};
use crate::errors::{ExecutorError, ProtocolError, RpcError};
use crate::keys::{KeyMaterialDeriver, UserShareEncryptionKeys};
use crate::ledger::{
    CoinRef, DkgRequestInput, ExecutionResult, IkaLedger, MpcProtocol, TransactionEffects,
    TransactionExecutor, UserSignRequest,
};
use crate::session::IkaSession;
use crate::transaction::{ComposedTransaction, SessionIdentifier};

pub const IKA: &str = "0xika::ika::IKA";
pub const SUI: &str = "0x2::sui::SUI";

pub fn network() -> IkaNetwork {
    IkaNetwork {
        coordinator_package: ObjectId::new("0xc0"),
        coordinator_object: ObjectId::new("0xc1"),
        registry_package: ObjectId::new("0xe0"),
        registry_object: ObjectId::new("0xe1"),
        ika_coin_type: IKA.into(),
        sui_coin_type: SUI.into(),
        presign_fee_amount: 1_000_000,
    }
}

pub fn sender() -> SuiAddress {
    ObjectId::new("0x5e")
}

pub fn password() -> secrecy::SecretString {
    secrecy::SecretString::from("correct horse".to_owned())
}

fn move_object(id: &str, fields: Value) -> Value {
    let mut fields = fields;
    if let Some(o) = fields.as_object_mut() {
        o.insert("id".into(), json!({ "id": id }));
    }
    json!({ "objectId": id, "content": { "fields": fields } })
}

pub fn dwallet_obj(id: &str, tag: &str, public_output: Option<&[u8]>) -> Value {
    let state = public_output.map_or_else(
        || json!({ "variant": tag, "fields": {} }),
        |po| json!({ "variant": tag, "fields": { "public_output": po } }),
    );
    move_object(
        id,
        json!({
            "curve": 0,
            "dwallet_cap_id": "0xdcap",
            "encrypted_user_secret_key_shares": { "fields": { "id": { "id": "0x7ab" } } },
            "state": state,
        }),
    )
}

pub fn presign_obj(id: &str, tag: &str, presign: Option<&[u8]>) -> Value {
    let state = presign.map_or_else(
        || json!({ "variant": tag, "fields": {} }),
        |p| json!({ "variant": tag, "fields": { "presign": p } }),
    );
    move_object(id, json!({ "cap_id": format!("{id}cap"), "state": state }))
}

pub fn sign_obj(id: &str, tag: &str, signature: Option<&[u8]>) -> Value {
    let state = signature.map_or_else(
        || json!({ "variant": tag, "fields": {} }),
        |s| json!({ "variant": tag, "fields": { "signature": s } }),
    );
    move_object(id, json!({ "state": state }))
}

pub fn share_obj(id: &str) -> Value {
    move_object(
        id,
        json!({ "encrypted_centralized_secret_share_and_proof": [9, 9, 9] }),
    )
}

#[derive(Default)]
struct LedgerState {
    /// Successive snapshots per object. The last snapshot is sticky.
    objects: HashMap<ObjectId, VecDeque<Value>>,
    dynamic_fields: HashMap<ObjectId, Vec<ObjectId>>,
    effects: HashMap<String, TransactionEffects>,
    coins: HashMap<String, Vec<CoinRef>>,
    /// Errors returned by the next `get_object` calls, before any snapshot.
    get_object_failures: VecDeque<RpcError>,
    reads: HashMap<ObjectId, usize>,
}

#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    fn with_state<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut g = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut g)
    }

    pub fn push_object(&self, id: &str, v: Value) {
        self.with_state(|s| {
            s.objects.entry(ObjectId::new(id)).or_default().push_back(v);
        });
    }

    pub fn set_dynamic_fields(&self, parent: &str, ids: &[&str]) {
        self.with_state(|s| {
            s.dynamic_fields.insert(
                ObjectId::new(parent),
                ids.iter().map(ObjectId::new).collect(),
            );
        });
    }

    pub fn set_effects(&self, fx: TransactionEffects) {
        self.with_state(|s| {
            s.effects.insert(fx.digest.clone(), fx);
        });
    }

    pub fn set_coins(&self, coin_type: &str, ids: &[&str]) {
        self.with_state(|s| {
            s.coins.insert(
                coin_type.to_owned(),
                ids.iter()
                    .map(|id| CoinRef {
                        object_id: ObjectId::new(id),
                        balance: 10_000_000_000,
                    })
                    .collect(),
            );
        });
    }

    pub fn fail_next_get_object(&self, e: RpcError) {
        self.with_state(|s| s.get_object_failures.push_back(e));
    }

    pub fn reads_of(&self, id: &str) -> usize {
        self.with_state(|s| s.reads.get(&ObjectId::new(id)).copied().unwrap_or(0))
    }

    /// Ledger with two gas coins, one fee coin and a network key.
    pub fn funded() -> Self {
        let l = Self::default();
        l.set_coins(IKA, &["0x1ca"]);
        l.set_coins(SUI, &["0x5a", "0x5b"]);
        l
    }
}

#[async_trait]
impl IkaLedger for FakeLedger {
    async fn get_object(&self, id: &ObjectId) -> Result<Value, RpcError> {
        self.with_state(|s| {
            *s.reads.entry(id.clone()).or_default() += 1;
            if let Some(e) = s.get_object_failures.pop_front() {
                return Err(e);
            }
            let q = s
                .objects
                .get_mut(id)
                .ok_or_else(|| RpcError::NotFound(id.to_string()))?;
            if q.len() > 1 {
                q.pop_front()
                    .ok_or_else(|| RpcError::NotFound(id.to_string()))
            } else {
                q.front()
                    .cloned()
                    .ok_or_else(|| RpcError::NotFound(id.to_string()))
            }
        })
    }

    async fn dynamic_field_object_ids(&self, parent: &ObjectId) -> Result<Vec<ObjectId>, RpcError> {
        Ok(self.with_state(|s| s.dynamic_fields.get(parent).cloned().unwrap_or_default()))
    }

    async fn latest_network_encryption_key(&self) -> Result<NetworkEncryptionKey, RpcError> {
        Ok(NetworkEncryptionKey {
            id: ObjectId::new("0xnek"),
        })
    }

    async fn wait_for_transaction(&self, digest: &str) -> Result<TransactionEffects, RpcError> {
        Ok(self.with_state(|s| {
            s.effects.get(digest).cloned().unwrap_or_else(|| TransactionEffects {
                digest: digest.to_owned(),
                ..TransactionEffects::default()
            })
        }))
    }

    async fn owned_coins(&self, _owner: &SuiAddress, coin_type: &str) -> Result<Vec<CoinRef>, RpcError> {
        Ok(self.with_state(|s| s.coins.get(coin_type).cloned().unwrap_or_default()))
    }
}

/// Executes by recording the transaction and handing out digests in order.
#[derive(Default)]
pub struct FakeExecutor {
    digests: Mutex<VecDeque<Result<String, ExecutorError>>>,
    pub executed: Mutex<Vec<ComposedTransaction>>,
}

impl FakeExecutor {
    pub fn returning(results: Vec<Result<&str, ExecutorError>>) -> Self {
        Self {
            digests: Mutex::new(
                results
                    .into_iter()
                    .map(|r| r.map(str::to_owned))
                    .collect(),
            ),
            executed: Mutex::new(vec![]),
        }
    }

    pub fn executed(&self) -> Vec<ComposedTransaction> {
        self.executed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TransactionExecutor for FakeExecutor {
    async fn sign_and_execute(&self, tx: ComposedTransaction) -> Result<ExecutionResult, ExecutorError> {
        self.executed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(tx);
        let next = self
            .digests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok("DIGEST".to_owned()));
        next.map(|digest| ExecutionResult { digest })
    }
}

#[derive(Default)]
pub struct FakeProtocol {
    /// Combined outputs passed to `create_user_sign_message`.
    pub sign_outputs: Mutex<Vec<Vec<u8>>>,
    pub public_key: Vec<u8>,
    /// Errors returned by the next `prepare_dkg` calls.
    pub dkg_failures: Mutex<VecDeque<ProtocolError>>,
    pub dkg_calls: AtomicUsize,
}

impl FakeProtocol {
    pub fn failing_dkg(errors: Vec<ProtocolError>) -> Self {
        Self {
            dkg_failures: Mutex::new(errors.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl MpcProtocol for FakeProtocol {
    async fn prepare_dkg(
        &self,
        _keys: &UserShareEncryptionKeys,
        _network_key: &NetworkEncryptionKey,
        _session: &SessionIdentifier,
        _sender: &SuiAddress,
    ) -> Result<DkgRequestInput, ProtocolError> {
        self.dkg_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .dkg_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(DkgRequestInput {
            user_dkg_message: vec![1],
            encrypted_user_share_and_proof: vec![2],
            user_public_output: vec![0xaa, 0xbb],
        })
    }

    async fn create_user_sign_message(&self, req: UserSignRequest<'_>) -> Result<Vec<u8>, ProtocolError> {
        self.sign_outputs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(req.combined_public_output.to_vec());
        Ok(vec![0x51])
    }

    /// Matches when the bytes are equal.
    fn verify_user_output(
        &self,
        _curve: Curve,
        user_public_output: &[u8],
        network_public_output: &[u8],
    ) -> Result<bool, ProtocolError> {
        Ok(user_public_output == network_public_output)
    }

    fn public_key_from_output(&self, _curve: Curve, _public_output: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if self.public_key.is_empty() {
            return Err(ProtocolError("no public key configured".into()));
        }
        Ok(self.public_key.clone())
    }
}

pub fn session(ledger: &Arc<FakeLedger>, protocol: &Arc<FakeProtocol>) -> IkaSession {
    IkaSession::new(
        Arc::clone(ledger) as Arc<dyn IkaLedger>,
        Arc::clone(protocol) as Arc<dyn MpcProtocol>,
        network(),
        KeyMaterialDeriver::default(),
        TimingsConfig::default(),
    )
}
