//! Seams to the outside world: the coordinator ledger, the user's transaction signer, and the
//! MPC cryptography library.

use async_trait::async_trait;
use serde_json::Value;

use crate::dwallet::{
    Curve, DWallet, EncryptedUserShare, HashScheme, NetworkEncryptionKey, ObjectId, Presign,
    SignSession, SignatureAlgorithm, SuiAddress,
};
use crate::errors::{ExecutorError, ProtocolError, RpcError};
use crate::keys::UserShareEncryptionKeys;
use crate::transaction::{ComposedTransaction, SessionIdentifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    /// Fully qualified Move event type, e.g. `0x..::coordinator_inner::SignRequestEvent`.
    pub event_type: String,
    pub parsed_json: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChange {
    /// `created`, `mutated`, `transferred`, ...
    pub kind: String,
    pub object_type: Option<String>,
    pub object_id: Option<ObjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionEffects {
    pub digest: String,
    pub events: Vec<LedgerEvent>,
    pub object_changes: Vec<ObjectChange>,
}

impl TransactionEffects {
    /// Reads an id field from the first event whose type contains `event`.
    ///
    /// Coordinator events nest their payload under `event_data` in newer packages.
    pub fn event_id_field(&self, event: &str, field: &str) -> Option<ObjectId> {
        self.events
            .iter()
            .filter(|e| e.event_type.contains(event))
            .find_map(|e| {
                e.parsed_json
                    .get("event_data")
                    .and_then(|d| d.get(field))
                    .or_else(|| e.parsed_json.get(field))
                    .and_then(Value::as_str)
                    .map(ObjectId::new)
            })
    }

    pub fn created_object_of_type(&self, type_fragment: &str) -> Option<ObjectId> {
        self.object_changes
            .iter()
            .filter(|c| c.kind == "created")
            .filter(|c| {
                c.object_type
                    .as_deref()
                    .is_some_and(|t| t.contains(type_fragment))
            })
            .find_map(|c| c.object_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinRef {
    pub object_id: ObjectId,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub digest: String,
}

/// Read interface to the Sui ledger hosting the Ika coordinator.
///
/// Only [`IkaLedger::get_object`] is needed for typed reads; the typed getters decode its
/// output and report unknown layouts as [`RpcError::Decode`].
#[async_trait]
pub trait IkaLedger: Send + Sync {
    /// Raw `sui_getObject` data (with content) for `id`.
    async fn get_object(&self, id: &ObjectId) -> Result<Value, RpcError>;

    /// Object ids of the dynamic fields (table entries) under `parent`, in ledger order.
    async fn dynamic_field_object_ids(&self, parent: &ObjectId) -> Result<Vec<ObjectId>, RpcError>;

    async fn latest_network_encryption_key(&self) -> Result<NetworkEncryptionKey, RpcError>;

    /// Waits until `digest` is indexed and returns its events and object changes.
    async fn wait_for_transaction(&self, digest: &str) -> Result<TransactionEffects, RpcError>;

    /// Coins of `coin_type` owned by `owner`, in ledger order.
    async fn owned_coins(&self, owner: &SuiAddress, coin_type: &str)
        -> Result<Vec<CoinRef>, RpcError>;

    async fn get_dwallet(&self, id: &ObjectId) -> Result<DWallet, RpcError> {
        DWallet::from_move_object(&self.get_object(id).await?)
    }

    async fn get_presign(&self, id: &ObjectId) -> Result<Presign, RpcError> {
        Presign::from_move_object(&self.get_object(id).await?)
    }

    async fn get_sign_session(&self, id: &ObjectId) -> Result<SignSession, RpcError> {
        SignSession::from_move_object(&self.get_object(id).await?)
    }

    async fn get_encrypted_user_share(&self, id: &ObjectId) -> Result<EncryptedUserShare, RpcError> {
        EncryptedUserShare::from_move_object(&self.get_object(id).await?)
    }
}

/// The user's transaction signer, typically a wallet extension.
///
/// This is the only point where the user is prompted. Implementations return
/// [`ExecutorError::Rejected`] when the user declines.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    async fn sign_and_execute(&self, tx: ComposedTransaction)
        -> Result<ExecutionResult, ExecutorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkgRequestInput {
    /// Centralized public key share and its proof.
    pub user_dkg_message: Vec<u8>,
    pub encrypted_user_share_and_proof: Vec<u8>,
    /// The client's local DKG contribution. Not the dWallet's combined output.
    pub user_public_output: Vec<u8>,
}

pub struct UserSignRequest<'a> {
    pub keys: &'a UserShareEncryptionKeys,
    /// Network-combined output of the active dWallet.
    pub combined_public_output: &'a [u8],
    pub encrypted_share: &'a EncryptedUserShare,
    pub presign: &'a [u8],
    pub message: &'a [u8],
    pub hash: HashScheme,
    pub algorithm: SignatureAlgorithm,
}

/// Boundary to the MPC cryptography library.
#[async_trait]
pub trait MpcProtocol: Send + Sync {
    /// Computes the client's half of DKG. May be CPU heavy; implementations may offload it.
    async fn prepare_dkg(
        &self,
        keys: &UserShareEncryptionKeys,
        network_key: &NetworkEncryptionKey,
        session: &SessionIdentifier,
        sender: &SuiAddress,
    ) -> Result<DkgRequestInput, ProtocolError>;

    /// Computes the client's partial signature over `message`.
    async fn create_user_sign_message(
        &self,
        req: UserSignRequest<'_>,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Whether the network's DKG output for the dWallet is consistent with the client's
    /// local `user_public_output` from [`MpcProtocol::prepare_dkg`].
    fn verify_user_output(
        &self,
        curve: Curve,
        user_public_output: &[u8],
        network_public_output: &[u8],
    ) -> Result<bool, ProtocolError>;

    /// Extracts the dWallet public key (SEC1 for secp256k1) from a combined public output.
    fn public_key_from_output(&self, curve: Curve, public_output: &[u8])
        -> Result<Vec<u8>, ProtocolError>;
}
