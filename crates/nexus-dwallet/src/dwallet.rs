//! On-ledger objects owned by the Ika coordinator, decoded from Sui object JSON.
//!
//! Remote schemas evolve independently of this crate, so every state enum carries an
//! `Unrecognized` variant instead of failing on a tag it has not seen before.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;

/// A 32-byte Sui object id, kept in normalized `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

/// Sui addresses and object ids share one representation.
pub type SuiAddress = ObjectId;

impl ObjectId {
    pub fn new(s: impl AsRef<str>) -> Self {
        let t = s.as_ref().trim().to_lowercase();
        if t.starts_with("0x") {
            Self(t)
        } else {
            Self(format!("0x{t}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for progress messages.
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Curves supported by the coordinator, with their on-chain numeric ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    Secp256k1,
    Ed25519,
}

impl Curve {
    pub const fn id(self) -> u32 {
        match self {
            Self::Secp256k1 => 0,
            Self::Ed25519 => 2,
        }
    }

    pub const fn from_id(id: u64) -> Option<Self> {
        match id {
            0 => Some(Self::Secp256k1),
            2 => Some(Self::Ed25519),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Secp256k1 => "secp256k1",
            Self::Ed25519 => "ed25519",
        }
    }

    /// Chain family a dWallet on this curve controls.
    pub const fn chain(self) -> Chain {
        match self {
            Self::Secp256k1 => Chain::Evm,
            Self::Ed25519 => Chain::Solana,
        }
    }
}

/// Target chain family of a dWallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Evm,
    Solana,
}

impl Chain {
    pub const fn curve(self) -> Curve {
        match self {
            Self::Evm => Curve::Secp256k1,
            Self::Solana => Curve::Ed25519,
        }
    }

    pub const fn signature_algorithm(self) -> SignatureAlgorithm {
        match self {
            Self::Evm => SignatureAlgorithm::EcdsaSecp256k1,
            Self::Solana => SignatureAlgorithm::EdDsa,
        }
    }

    /// Label stored in the wallet registry.
    pub const fn registry_label(self) -> &'static str {
        match self {
            Self::Evm => "EVM",
            Self::Solana => "SOLANA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    EcdsaSecp256k1,
    EdDsa,
}

impl SignatureAlgorithm {
    /// Algorithm ids are numbered per curve.
    pub const fn id(self) -> u32 {
        match self {
            Self::EcdsaSecp256k1 | Self::EdDsa => 0,
        }
    }

    pub const fn curve(self) -> Curve {
        match self {
            Self::EcdsaSecp256k1 => Curve::Secp256k1,
            Self::EdDsa => Curve::Ed25519,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashScheme {
    Keccak256,
    Sha256,
    Sha512,
}

impl HashScheme {
    /// Hash ids are numbered per (curve, algorithm) pair.
    pub const fn id(self) -> u32 {
        match self {
            Self::Keccak256 | Self::Sha512 => 0,
            Self::Sha256 => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DWalletState {
    DkgInProgress,
    /// The network finished its half of DKG; the key holder must accept the encrypted share.
    AwaitingKeyHolderSignature { public_output: Option<Vec<u8>> },
    /// `public_output` is the network-combined output and never changes after activation.
    Active { public_output: Vec<u8> },
    Frozen,
    Unrecognized(String),
}

impl DWalletState {
    pub fn tag(&self) -> &str {
        match self {
            Self::DkgInProgress => "DKGInProgress",
            Self::AwaitingKeyHolderSignature { .. } => "AwaitingKeyHolderSignature",
            Self::Active { .. } => "Active",
            Self::Frozen => "Frozen",
            Self::Unrecognized(tag) => tag,
        }
    }

    /// States from which no forward transition is triggered by this client.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Frozen)
    }

    fn from_tagged(tag: &str, fields: Option<&Value>) -> Result<Self, RpcError> {
        let public_output = fields.and_then(|f| f.get("public_output")).and_then(bytes_from_json);
        Ok(match tag {
            "DKGRequested"
            | "DKGInProgress"
            | "AwaitingUserDKGVerificationInitiation"
            | "AwaitingNetworkDKGVerification" => Self::DkgInProgress,
            "AwaitingKeyHolderSignature" => Self::AwaitingKeyHolderSignature { public_output },
            "Active" => Self::Active {
                public_output: public_output
                    .ok_or_else(|| RpcError::Decode("active dwallet without public_output".into()))?,
            },
            "Frozen" => Self::Frozen,
            other => Self::Unrecognized(other.to_owned()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DWallet {
    pub id: ObjectId,
    pub curve: Curve,
    pub state: DWalletState,
    /// Capability exclusively owned by the controlling user.
    pub dwallet_cap_id: ObjectId,
    /// Table holding the encrypted user secret key shares.
    pub encrypted_shares_table: Option<ObjectId>,
}

impl DWallet {
    pub fn from_move_object(obj: &Value) -> Result<Self, RpcError> {
        let fields = move_fields(obj)?;
        let id = object_id_of(obj, fields)?;
        let curve_id = fields
            .get("curve")
            .and_then(number_from_json)
            .ok_or_else(|| RpcError::Decode(format!("dwallet {id}: missing curve")))?;
        let curve = Curve::from_id(curve_id)
            .ok_or_else(|| RpcError::Decode(format!("dwallet {id}: unknown curve {curve_id}")))?;
        let dwallet_cap_id = fields
            .get("dwallet_cap_id")
            .and_then(id_from_json)
            .ok_or_else(|| RpcError::Decode(format!("dwallet {id}: missing dwallet_cap_id")))?;
        let encrypted_shares_table = fields
            .get("encrypted_user_secret_key_shares")
            .and_then(table_id);
        let state_v = fields
            .get("state")
            .ok_or_else(|| RpcError::Decode(format!("dwallet {id}: missing state")))?;
        let tag = state_tag(state_v)
            .ok_or_else(|| RpcError::Decode(format!("dwallet {id}: untagged state")))?;
        let state = DWalletState::from_tagged(&tag, state_fields(state_v, &tag))?;
        Ok(Self {
            id,
            curve,
            state,
            dwallet_cap_id,
            encrypted_shares_table,
        })
    }

    /// The network-combined public output, available once the dWallet is active.
    pub fn combined_public_output(&self) -> Option<&[u8]> {
        match &self.state {
            DWalletState::Active { public_output } => Some(public_output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresignState {
    Requested,
    Completed { presign: Vec<u8> },
    Rejected,
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presign {
    pub id: ObjectId,
    pub cap_id: Option<ObjectId>,
    pub state: PresignState,
}

impl Presign {
    pub fn from_move_object(obj: &Value) -> Result<Self, RpcError> {
        let fields = move_fields(obj)?;
        let id = object_id_of(obj, fields)?;
        let cap_id = fields.get("cap_id").and_then(id_from_json);
        let state_v = fields
            .get("state")
            .ok_or_else(|| RpcError::Decode(format!("presign {id}: missing state")))?;
        let tag = state_tag(state_v)
            .ok_or_else(|| RpcError::Decode(format!("presign {id}: untagged state")))?;
        let state = match tag.as_str() {
            "Requested" => PresignState::Requested,
            "Completed" => PresignState::Completed {
                presign: state_fields(state_v, &tag)
                    .and_then(|f| f.get("presign"))
                    .and_then(bytes_from_json)
                    .ok_or_else(|| {
                        RpcError::Decode(format!("presign {id}: completed without presign bytes"))
                    })?,
            },
            "NetworkRejected" => PresignState::Rejected,
            other => PresignState::Unrecognized(other.to_owned()),
        };
        Ok(Self { id, cap_id, state })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignState {
    Requested,
    Completed { signature: Vec<u8> },
    Rejected,
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignSession {
    pub id: ObjectId,
    pub state: SignState,
}

impl SignSession {
    pub fn from_move_object(obj: &Value) -> Result<Self, RpcError> {
        let fields = move_fields(obj)?;
        let id = object_id_of(obj, fields)?;
        let state_v = fields
            .get("state")
            .ok_or_else(|| RpcError::Decode(format!("sign session {id}: missing state")))?;
        let tag = state_tag(state_v)
            .ok_or_else(|| RpcError::Decode(format!("sign session {id}: untagged state")))?;
        let state = match tag.as_str() {
            "Requested" => SignState::Requested,
            "Completed" => SignState::Completed {
                signature: state_fields(state_v, &tag)
                    .and_then(|f| f.get("signature"))
                    .and_then(bytes_from_json)
                    .ok_or_else(|| {
                        RpcError::Decode(format!("sign session {id}: completed without signature"))
                    })?,
            },
            "NetworkRejected" | "Rejected" => SignState::Rejected,
            other => SignState::Unrecognized(other.to_owned()),
        };
        Ok(Self { id, state })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedUserShare {
    pub id: ObjectId,
    pub encrypted_share: Vec<u8>,
}

impl EncryptedUserShare {
    pub fn from_move_object(obj: &Value) -> Result<Self, RpcError> {
        let outer = move_fields(obj)?;
        // Table entries are wrapped in a dynamic `Field { name, value }`.
        let fields = outer
            .get("value")
            .and_then(|v| v.get("fields"))
            .unwrap_or(outer);
        let id = object_id_of(obj, fields)?;
        let encrypted_share = fields
            .get("encrypted_centralized_secret_share_and_proof")
            .and_then(bytes_from_json)
            .ok_or_else(|| RpcError::Decode(format!("encrypted share {id}: missing ciphertext")))?;
        Ok(Self {
            id,
            encrypted_share,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEncryptionKey {
    pub id: ObjectId,
}

/// The state tag of a Move object read without a typed decoder.
///
/// Used when the typed decoder rejects an object; only the tag is trusted.
pub fn raw_state_tag(obj: &Value) -> Option<String> {
    let state = move_fields(obj).ok()?.get("state")?;
    state_tag(state)
}

/// Best-effort field lookup on a raw object, for the same fallback path as [`raw_state_tag`].
pub fn raw_field<'a>(obj: &'a Value, name: &str) -> Option<&'a Value> {
    let fields = move_fields(obj).ok()?;
    fields.get(name).or_else(|| {
        let state = fields.get("state")?;
        let tag = state_tag(state)?;
        state_fields(state, &tag)?.get(name)
    })
}

fn move_fields(obj: &Value) -> Result<&Value, RpcError> {
    obj.get("content")
        .and_then(|c| c.get("fields"))
        .ok_or_else(|| RpcError::Decode("object has no move content".into()))
}

fn object_id_of(obj: &Value, fields: &Value) -> Result<ObjectId, RpcError> {
    obj.get("objectId")
        .and_then(Value::as_str)
        .map(ObjectId::new)
        .or_else(|| fields.get("id").and_then(id_from_json))
        .ok_or_else(|| RpcError::Decode("object without id".into()))
}

/// Enum tags show up in several encodings depending on node version:
/// `{variant, fields}`, `{$kind, <Tag>: {..}}`, `{type: "..::State::Tag"}` or `{<Tag>: {..}}`.
pub(crate) fn state_tag(state: &Value) -> Option<String> {
    if let Some(s) = state.get("variant").and_then(Value::as_str) {
        return Some(s.to_owned());
    }
    if let Some(s) = state.get("$kind").and_then(Value::as_str) {
        return Some(s.to_owned());
    }
    if let Some(s) = state.get("type").and_then(Value::as_str) {
        // Drop type arguments first: `..::State<0x2::sui::SUI>` is `State`.
        let path = s.split_once('<').map_or(s, |(head, _)| head);
        if let Some((_, tail)) = path.rsplit_once("::") {
            return Some(tail.to_owned());
        }
    }
    if let Some(s) = state.as_str() {
        return Some(s.to_owned());
    }
    let obj = state.as_object()?;
    if obj.len() == 1 {
        return obj.keys().next().cloned();
    }
    None
}

fn state_fields<'a>(state: &'a Value, tag: &str) -> Option<&'a Value> {
    state.get("fields").or_else(|| state.get(tag))
}

fn id_from_json(v: &Value) -> Option<ObjectId> {
    if let Some(s) = v.as_str() {
        return Some(ObjectId::new(s));
    }
    // UID: { id: "0x.." } or { id: { id: "0x.." } }
    v.get("id").and_then(id_from_json)
}

fn table_id(v: &Value) -> Option<ObjectId> {
    v.get("fields")
        .and_then(|f| f.get("id"))
        .and_then(id_from_json)
        .or_else(|| v.get("id").and_then(id_from_json))
}

fn number_from_json(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Byte vectors arrive as `[u8, ..]` arrays, base64 strings, or `0x` hex strings.
pub(crate) fn bytes_from_json(v: &Value) -> Option<Vec<u8>> {
    if let Some(arr) = v.as_array() {
        return arr
            .iter()
            .map(|x| x.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect();
    }
    let s = v.as_str()?.trim();
    if let Some(h) = s.strip_prefix("0x") {
        return hex::decode(h).ok();
    }
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}
