//! Programmable transactions for the coordinator, composed locally and handed to the
//! user's [`TransactionExecutor`](crate::ledger::TransactionExecutor) for signing.

use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::config::IkaNetwork;
use crate::dwallet::{Curve, HashScheme, NetworkEncryptionKey, ObjectId, SignatureAlgorithm, SuiAddress};
use crate::keys::UserShareEncryptionKeys;
use crate::ledger::DkgRequestInput;

/// Fresh 32-byte DKG/sign session identifier.
///
/// Always random. It guards against replay, so it must never be derived from user secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentifier([u8; 32]);

impl SessionIdentifier {
    pub fn random() -> Self {
        let mut b = [0_u8; 32];
        rand::rng().fill_bytes(&mut b);
        Self(b)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Widened form stored by the wallet registry (`vector<u64>`).
    pub fn to_u64_vec(&self) -> Vec<u64> {
        self.0.iter().copied().map(u64::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PureValue {
    Address(SuiAddress),
    Id(ObjectId),
    String(String),
    U32(u32),
    U64(u64),
    VecU8(Vec<u8>),
    VecU64(Vec<u64>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallArg {
    Object(ObjectId),
    Pure(PureValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    GasCoin,
    Input(u16),
    Result(u16),
    NestedResult(u16, u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    pub package: ObjectId,
    pub module: String,
    pub function: String,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Argument>,
}

impl MoveCall {
    pub fn target(&self) -> String {
        format!("{}::{}::{}", self.package, self.module, self.function)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    MoveCall(MoveCall),
    SplitCoins {
        coin: Argument,
        amounts: Vec<Argument>,
    },
    MergeCoins {
        destination: Argument,
        sources: Vec<Argument>,
    },
    TransferObjects {
        objects: Vec<Argument>,
        address: Argument,
    },
}

/// A fully composed transaction, ready for the user's signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedTransaction {
    pub sender: SuiAddress,
    pub inputs: Vec<CallArg>,
    pub commands: Vec<Command>,
}

impl ComposedTransaction {
    pub fn move_calls(&self) -> impl Iterator<Item = &MoveCall> {
        self.commands.iter().filter_map(|c| match c {
            Command::MoveCall(m) => Some(m),
            Command::SplitCoins { .. }
            | Command::MergeCoins { .. }
            | Command::TransferObjects { .. } => None,
        })
    }

    pub fn move_call(&self, function: &str) -> Option<&MoveCall> {
        self.move_calls().find(|m| m.function == function)
    }

    pub fn input(&self, arg: Argument) -> Option<&CallArg> {
        match arg {
            Argument::Input(i) => self.inputs.get(usize::from(i)),
            Argument::GasCoin | Argument::Result(_) | Argument::NestedResult(..) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    sender: SuiAddress,
    inputs: Vec<CallArg>,
    commands: Vec<Command>,
}

impl TransactionBuilder {
    pub const fn new(sender: SuiAddress) -> Self {
        Self {
            sender,
            inputs: Vec::new(),
            commands: Vec::new(),
        }
    }

    fn push_input(&mut self, arg: CallArg) -> Argument {
        if let Some(i) = self.inputs.iter().position(|a| *a == arg) {
            return Argument::Input(u16::try_from(i).unwrap_or(u16::MAX));
        }
        self.inputs.push(arg);
        Argument::Input(u16::try_from(self.inputs.len() - 1).unwrap_or(u16::MAX))
    }

    fn push_command(&mut self, cmd: Command) -> Argument {
        self.commands.push(cmd);
        Argument::Result(u16::try_from(self.commands.len() - 1).unwrap_or(u16::MAX))
    }

    pub const fn gas(&self) -> Argument {
        Argument::GasCoin
    }

    /// Object inputs are de-duplicated; the same object may only appear once per transaction.
    pub fn object(&mut self, id: &ObjectId) -> Argument {
        self.push_input(CallArg::Object(id.clone()))
    }

    pub fn pure(&mut self, v: PureValue) -> Argument {
        self.push_input(CallArg::Pure(v))
    }

    pub fn move_call(
        &mut self,
        package: &ObjectId,
        module: &str,
        function: &str,
        arguments: Vec<Argument>,
    ) -> Argument {
        self.push_command(Command::MoveCall(MoveCall {
            package: package.clone(),
            module: module.to_owned(),
            function: function.to_owned(),
            type_arguments: vec![],
            arguments,
        }))
    }

    pub fn split_coins(&mut self, coin: Argument, amounts: &[u64]) -> Argument {
        let amounts = amounts.iter().map(|a| self.pure(PureValue::U64(*a))).collect();
        let r = self.push_command(Command::SplitCoins { coin, amounts });
        match r {
            Argument::Result(i) => Argument::NestedResult(i, 0),
            other => other,
        }
    }

    pub fn merge_coins(&mut self, destination: Argument, sources: Vec<Argument>) {
        self.push_command(Command::MergeCoins {
            destination,
            sources,
        });
    }

    pub fn transfer_objects(&mut self, objects: Vec<Argument>, recipient: &SuiAddress) {
        let address = self.pure(PureValue::Address(recipient.clone()));
        self.push_command(Command::TransferObjects { objects, address });
    }

    pub fn finish(self) -> ComposedTransaction {
        ComposedTransaction {
            sender: self.sender,
            inputs: self.inputs,
            commands: self.commands,
        }
    }
}

const COORDINATOR: &str = "coordinator";
const REGISTRY: &str = "nexus_wallet_management";

/// Adds coordinator and registry calls on top of a [`TransactionBuilder`].
pub struct IkaTransactionBuilder<'a> {
    tx: TransactionBuilder,
    network: &'a IkaNetwork,
    keys: &'a UserShareEncryptionKeys,
}

impl<'a> IkaTransactionBuilder<'a> {
    pub const fn new(
        sender: SuiAddress,
        network: &'a IkaNetwork,
        keys: &'a UserShareEncryptionKeys,
    ) -> Self {
        Self {
            tx: TransactionBuilder::new(sender),
            network,
            keys,
        }
    }

    pub fn tx(&mut self) -> &mut TransactionBuilder {
        &mut self.tx
    }

    fn coordinator_call(&mut self, function: &str, mut args: Vec<Argument>) -> Argument {
        let coordinator = self.tx.object(&self.network.coordinator_object);
        args.insert(0, coordinator);
        let pkg = self.network.coordinator_package.clone();
        self.tx.move_call(&pkg, COORDINATOR, function, args)
    }

    fn registry_call(&mut self, function: &str, mut args: Vec<Argument>) -> Argument {
        let registry = self.tx.object(&self.network.registry_object);
        args.insert(0, registry);
        let pkg = self.network.registry_package.clone();
        self.tx.move_call(&pkg, REGISTRY, function, args)
    }

    pub fn register_encryption_key(&mut self, curve: Curve) {
        let args = vec![
            self.tx.pure(PureValue::U32(curve.id())),
            self.tx.pure(PureValue::VecU8(self.keys.encryption_key().to_vec())),
            self.tx
                .pure(PureValue::VecU8(self.keys.encryption_key_signature().to_vec())),
            self.tx
                .pure(PureValue::VecU8(self.keys.signer_public_key().to_vec())),
        ];
        self.coordinator_call("register_encryption_key", args);
    }

    pub fn register_session_identifier(&mut self, session: &SessionIdentifier) -> Argument {
        let bytes = self.tx.pure(PureValue::VecU8(session.as_bytes().to_vec()));
        self.coordinator_call("register_session_identifier", vec![bytes])
    }

    /// Returns the new dWallet capability.
    pub fn request_dwallet_dkg(
        &mut self,
        input: &DkgRequestInput,
        session: Argument,
        network_key: &NetworkEncryptionKey,
        curve: Curve,
        ika_coin: Argument,
        sui_coin: Argument,
    ) -> Argument {
        let args = vec![
            self.tx.pure(PureValue::Id(network_key.id.clone())),
            self.tx.pure(PureValue::U32(curve.id())),
            self.tx.pure(PureValue::VecU8(input.user_dkg_message.clone())),
            self.tx
                .pure(PureValue::VecU8(input.encrypted_user_share_and_proof.clone())),
            self.tx.pure(PureValue::VecU8(input.user_public_output.clone())),
            self.tx
                .pure(PureValue::VecU8(self.keys.signer_public_key().to_vec())),
            session,
            ika_coin,
            sui_coin,
        ];
        self.coordinator_call("request_dwallet_dkg", args)
    }

    pub fn accept_encrypted_user_share(
        &mut self,
        dwallet_id: &ObjectId,
        encrypted_share_id: &ObjectId,
        public_output: &[u8],
    ) {
        let args = vec![
            self.tx.pure(PureValue::Id(dwallet_id.clone())),
            self.tx.pure(PureValue::Id(encrypted_share_id.clone())),
            self.tx.pure(PureValue::VecU8(
                self.keys.user_output_signature(public_output).to_vec(),
            )),
        ];
        self.coordinator_call("accept_encrypted_user_share", args);
    }

    /// Returns the unverified presign capability.
    pub fn request_global_presign(
        &mut self,
        network_key: &NetworkEncryptionKey,
        curve: Curve,
        algorithm: SignatureAlgorithm,
        ika_coin: Argument,
        sui_coin: Argument,
    ) -> Argument {
        let session = SessionIdentifier::random();
        let session = self.register_session_identifier(&session);
        let args = vec![
            self.tx.pure(PureValue::Id(network_key.id.clone())),
            self.tx.pure(PureValue::U32(curve.id())),
            self.tx.pure(PureValue::U32(algorithm.id())),
            session,
            ika_coin,
            sui_coin,
        ];
        self.coordinator_call("request_global_presign", args)
    }

    /// Binds `message`, hash scheme and algorithm to the dWallet capability.
    pub fn approve_message(
        &mut self,
        dwallet_cap: &ObjectId,
        algorithm: SignatureAlgorithm,
        hash: HashScheme,
        message: &[u8],
    ) -> Argument {
        let args = vec![
            self.tx.object(dwallet_cap),
            self.tx.pure(PureValue::U32(algorithm.id())),
            self.tx.pure(PureValue::U32(hash.id())),
            self.tx.pure(PureValue::VecU8(message.to_vec())),
        ];
        self.coordinator_call("approve_message", args)
    }

    pub fn verify_presign_cap(&mut self, presign_cap: &ObjectId) -> Argument {
        let cap = self.tx.object(presign_cap);
        self.coordinator_call("verify_presign_cap", vec![cap])
    }

    pub fn request_sign(
        &mut self,
        verified_presign_cap: Argument,
        message_approval: Argument,
        user_sign_message: Vec<u8>,
        ika_coin: Argument,
        sui_coin: Argument,
    ) -> Argument {
        let session = SessionIdentifier::random();
        let session = self.register_session_identifier(&session);
        let args = vec![
            verified_presign_cap,
            message_approval,
            self.tx.pure(PureValue::VecU8(user_sign_message)),
            session,
            ika_coin,
            sui_coin,
        ];
        self.coordinator_call("request_sign", args)
    }

    pub fn register_dwallet(
        &mut self,
        label: &str,
        chain: &str,
        dwallet_cap: Argument,
        session: &SessionIdentifier,
        user_public_output: &[u8],
    ) {
        let args = vec![
            self.tx.pure(PureValue::String(label.to_owned())),
            self.tx.pure(PureValue::String(chain.to_owned())),
            dwallet_cap,
            self.tx.pure(PureValue::VecU64(session.to_u64_vec())),
            self.tx.pure(PureValue::VecU8(user_public_output.to_vec())),
        ];
        self.registry_call("register_dwallet", args);
    }

    pub fn add_presign_id(&mut self, dwallet: &SuiAddress, presign_cap: Argument) {
        let args = vec![
            self.tx.pure(PureValue::Address(dwallet.clone())),
            presign_cap,
        ];
        self.registry_call("add_presign_id", args);
    }

    pub fn finish(self) -> ComposedTransaction {
        self.tx.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn session_identifiers_are_fresh() {
        let a = SessionIdentifier::random();
        let b = SessionIdentifier::random();
        assert_ne!(a, b);
        assert_eq!(a.to_u64_vec().len(), 32);
    }

    #[test]
    fn object_inputs_are_deduplicated() {
        let mut tx = TransactionBuilder::new(ObjectId::new("0xs"));
        let a = tx.object(&ObjectId::new("0x1"));
        let b = tx.object(&ObjectId::new("0x1"));
        assert_eq!(a, b);
        let split = tx.split_coins(Argument::GasCoin, &[1_000_000]);
        assert_eq!(split, Argument::NestedResult(0, 0));
        let done = tx.finish();
        assert_eq!(done.inputs.len(), 2);
    }

    #[test]
    fn coordinator_calls_take_the_coordinator_object_first() -> eyre::Result<()> {
        let network = IkaNetwork {
            coordinator_package: ObjectId::new("0xc0"),
            coordinator_object: ObjectId::new("0xc1"),
            registry_package: ObjectId::new("0xe0"),
            registry_object: ObjectId::new("0xe1"),
            ika_coin_type: "ika".into(),
            sui_coin_type: "sui".into(),
            presign_fee_amount: 1,
        };
        let keys = crate::keys::KeyMaterialDeriver::default()
            .derive(&SecretString::from("pw".to_owned()), Curve::Secp256k1)?;
        let mut b = IkaTransactionBuilder::new(ObjectId::new("0xs"), &network, &keys);
        b.verify_presign_cap(&ObjectId::new("0xcap"));
        let tx = b.finish();
        let call = tx.move_call("verify_presign_cap");
        assert_eq!(
            call.map(MoveCall::target).as_deref(),
            Some("0xc0::coordinator::verify_presign_cap")
        );
        let first = call.and_then(|c| c.arguments.first().copied());
        assert_eq!(
            first.and_then(|a| tx.input(a)),
            Some(&CallArg::Object(ObjectId::new("0xc1")))
        );
        Ok(())
    }
}
