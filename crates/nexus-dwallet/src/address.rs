//! EVM address of a secp256k1 dWallet.

use alloy::primitives::{keccak256, Address};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;

use crate::dwallet::{DWalletState, ObjectId};
use crate::errors::DWalletError;
use crate::poll::{PollConfig, PollOutcome};
use crate::session::IkaSession;

const ACTIVE_WAIT: PollConfig = PollConfig::secs(30, 3);

/// `keccak256(uncompressed key without the 0x04 tag)[12..]`.
///
/// Accepts compressed (33), raw (64) and uncompressed (65) SEC1 keys.
pub fn evm_address_from_public_key(key: &[u8]) -> Result<Address, DWalletError> {
    let uncompressed: Vec<u8> = match key.len() {
        64 => key.to_vec(),
        65 => match key.split_first() {
            Some((0x04, rest)) => rest.to_vec(),
            _ => return Err(DWalletError::KeyMaterial("65-byte key without 0x04 tag".into())),
        },
        33 => {
            let pk = k256::PublicKey::from_sec1_bytes(key)
                .map_err(|e| DWalletError::KeyMaterial(format!("invalid compressed key: {e}")))?;
            let point = pk.to_encoded_point(false);
            point.as_bytes().get(1..).unwrap_or_default().to_vec()
        }
        n => return Err(DWalletError::KeyMaterial(format!("unsupported public key length {n}"))),
    };
    let hash = keccak256(&uncompressed);
    Ok(Address::from_slice(hash.get(12..).unwrap_or_default()))
}

/// Waits for the dWallet to be active and derives its EVM address from the combined output.
pub async fn dwallet_evm_address(
    session: &IkaSession,
    dwallet_id: &ObjectId,
) -> Result<Address, DWalletError> {
    let wallet = session
        .wait_for_dwallet(dwallet_id, ACTIVE_WAIT, "Active", |w| match w.state {
            DWalletState::Active { .. } => Some(w),
            DWalletState::DkgInProgress
            | DWalletState::AwaitingKeyHolderSignature { .. }
            | DWalletState::Frozen
            | DWalletState::Unrecognized(_) => None,
        })
        .await?;
    let PollOutcome::Ready(wallet) = wallet else {
        return Err(DWalletError::NotActive(dwallet_id.clone()));
    };
    let output = wallet
        .combined_public_output()
        .ok_or_else(|| DWalletError::NotActive(dwallet_id.clone()))?;
    let key = session
        .protocol
        .public_key_from_output(wallet.curve, output)?;
    let addr = evm_address_from_public_key(&key)?;
    tracing::debug!(dwallet = %dwallet_id, %addr, "evm address derived");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testkit::{dwallet_obj, session, FakeLedger, FakeProtocol};
    use alloy::primitives::address;

    // secp256k1 generator point; its address is well known.
    const G_COMPRESSED: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const G_ADDRESS: Address = address!("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");

    #[test]
    fn all_key_encodings_agree() -> eyre::Result<()> {
        let compressed = hex::decode(G_COMPRESSED)?;
        let from_compressed = evm_address_from_public_key(&compressed)?;
        assert_eq!(from_compressed, G_ADDRESS);

        let pk = k256::PublicKey::from_sec1_bytes(&compressed)
            .map_err(|e| eyre::eyre!("sec1: {e}"))?;
        let full = pk.to_encoded_point(false).as_bytes().to_vec();
        assert_eq!(evm_address_from_public_key(&full)?, G_ADDRESS);
        let raw = full.get(1..).unwrap_or_default();
        assert_eq!(evm_address_from_public_key(raw)?, G_ADDRESS);
        assert_eq!(
            Address::from_slice(keccak256(raw).get(12..).unwrap_or_default()),
            G_ADDRESS
        );
        Ok(())
    }

    #[test]
    fn odd_lengths_are_rejected() {
        assert!(matches!(
            evm_address_from_public_key(&[4; 20]),
            Err(DWalletError::KeyMaterial(_))
        ));
    }

    #[tokio::test]
    async fn active_dwallet_address_comes_from_combined_output() -> eyre::Result<()> {
        let ledger = Arc::new(FakeLedger::default());
        ledger.push_object("0xd1", dwallet_obj("0xd1", "Active", Some(&[1, 2, 3])));
        let protocol = Arc::new(FakeProtocol {
            public_key: hex::decode(G_COMPRESSED)?,
            ..FakeProtocol::default()
        });
        let s = session(&ledger, &protocol);
        assert_eq!(dwallet_evm_address(&s, &"0xd1".into()).await?, G_ADDRESS);
        Ok(())
    }
}
