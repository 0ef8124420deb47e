use std::time::Duration;
use thiserror::Error;

use crate::dwallet::ObjectId;

/// Failure reported by the ledger read interface (Sui JSON-RPC or a fake).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    #[error("json-rpc error {code}: {message}")]
    JsonRpc { code: i64, message: String },

    #[error("transport: {0}")]
    Transport(String),

    /// The typed decoder did not understand the object. Callers that can live with less
    /// structure fall back to a raw read.
    #[error("decode: {0}")]
    Decode(String),

    #[error("object not found: {0}")]
    NotFound(String),
}

/// JSON-RPC code the coordinator's RPC gateway uses for request throttling.
pub const RATE_LIMIT_RPC_CODE: i64 = -32010;

impl RpcError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Http { status, message } => {
                *status == 429 || message.contains("Too many requests")
            }
            Self::JsonRpc { code, message } => {
                *code == RATE_LIMIT_RPC_CODE || message.contains("Too many requests")
            }
            Self::Transport(message) => message.contains("Too many requests"),
            Self::Decode(_) | Self::NotFound(_) => false,
        }
    }
}

/// Failure returned by the caller-supplied transaction executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The user declined in their wallet. Never retried.
    #[error("rejected by signer: {0}")]
    Rejected(String),

    #[error("execution failed: {0}")]
    Failed(String),
}

/// Failure reported by the MPC cryptography boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("mpc protocol: {0}")]
pub struct ProtocolError(pub String);

impl ProtocolError {
    /// The MPC library reports throttled coordinator reads as plain messages.
    pub fn is_rate_limited(&self) -> bool {
        self.0.contains("Too many requests") || self.0.contains("429")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The coordinator's fee token (IKA).
    FeeToken,
    /// Gas coins (SUI). `required` is the minimum number of distinct coin objects.
    GasCoins { required: usize, found: usize },
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FeeToken => write!(f, "no fee-token coins found"),
            Self::GasCoins { required, found } => {
                write!(f, "need at least {required} gas coin objects, found {found}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DWalletError {
    #[error("user rejected the transaction: {0}")]
    UserRejected(String),

    #[error("network unavailable after retries: {0}")]
    NetworkUnavailable(RpcError),

    #[error(transparent)]
    Rpc(RpcError),

    #[error("transaction execution failed: {0}")]
    ExecutionFailed(String),

    #[error("insufficient resources: {missing}")]
    InsufficientResources { missing: Resource },

    #[error("dwallet {id} cannot reach state {target} (last seen: {last_seen})")]
    StateUnreachable {
        id: ObjectId,
        target: &'static str,
        last_seen: String,
    },

    #[error("network dkg output for dwallet {0} does not match the local user output")]
    UserOutputMismatch(ObjectId),

    #[error("no encrypted user share found for dwallet {0}; the network may not have finished DKG")]
    NoEncryptedShare(ObjectId),

    #[error("{0} not found in transaction events")]
    ProtocolEventMissing(&'static str),

    #[error("no presigns available")]
    NoPresigns,

    #[error("all {tried} presign candidate(s) timed out")]
    AllPresignsExhausted { tried: usize },

    #[error("dwallet {0} is not active")]
    NotActive(ObjectId),

    #[error("sign session not found in transaction {digest}")]
    SignSessionNotFound { digest: String },

    #[error("sign session {sign_id} did not complete within {waited:?}")]
    SignaturePending {
        sign_id: ObjectId,
        presign_id: ObjectId,
        waited: Duration,
    },

    #[error("sign session {0} was rejected by the network")]
    SignRejected(ObjectId),

    #[error("unexpected signature length: {0}")]
    InvalidSignatureLength(usize),

    #[error("could not determine recovery id from signature")]
    CannotDetermineRecoveryId,

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid key material: {0}")]
    KeyMaterial(String),
}

impl DWalletError {
    /// Stable machine-readable code for callers that surface errors to a UI.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UserRejected(_) => "user_rejected",
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::Rpc(_) => "rpc_error",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::InsufficientResources { .. } => "insufficient_resources",
            Self::StateUnreachable { .. } => "state_unreachable",
            Self::UserOutputMismatch(_) => "user_output_mismatch",
            Self::NoEncryptedShare(_) => "no_encrypted_share",
            Self::ProtocolEventMissing(_) => "protocol_event_missing",
            Self::NoPresigns => "no_presigns",
            Self::AllPresignsExhausted { .. } => "all_presigns_exhausted",
            Self::NotActive(_) => "not_active",
            Self::SignSessionNotFound { .. } => "sign_session_not_found",
            Self::SignaturePending { .. } => "signature_pending",
            Self::SignRejected(_) => "sign_rejected",
            Self::InvalidSignatureLength(_) => "invalid_signature_length",
            Self::CannotDetermineRecoveryId => "cannot_determine_recovery_id",
            Self::EmptyPassword => "empty_password",
            Self::Timeout { .. } => "timeout",
            Self::Protocol(_) => "protocol_error",
            Self::KeyMaterial(_) => "key_material",
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<RpcError> for DWalletError {
    fn from(e: RpcError) -> Self {
        // Only an exhausted rate-limit retry reaches here still rate limited.
        if e.is_rate_limited() {
            Self::NetworkUnavailable(e)
        } else {
            Self::Rpc(e)
        }
    }
}

impl From<ExecutorError> for DWalletError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Rejected(msg) => Self::UserRejected(msg),
            ExecutorError::Failed(msg) => Self::ExecutionFailed(msg),
        }
    }
}
