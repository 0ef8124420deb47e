//! Attaches an externally produced ECDSA signature to an [`UnsignedEvmTx`] and broadcasts it.

use alloy::{
    consensus::{SignableTransaction as _, TxEnvelope},
    eips::eip2718::Encodable2718 as _,
    primitives::{Address, Signature, B256, U256},
};

use super::evm::EvmNode;
use super::evm_tx::UnsignedEvmTx;
use crate::errors::DWalletError;

/// Rebuilds a recoverable signature from `r || s` or `r || s || v`.
///
/// With `v` present, 27/28 and 0/1 are both accepted. Without it, both parities are tried
/// and the one recovering to `expected` is kept. Without `expected`, a 64-byte signature
/// is only accepted when exactly one parity recovers.
pub fn recoverable_signature(
    digest: &B256,
    sig: &[u8],
    expected: Option<Address>,
) -> Result<Signature, DWalletError> {
    let (Some(r), Some(s)) = (sig.get(..32), sig.get(32..64)) else {
        return Err(DWalletError::InvalidSignatureLength(sig.len()));
    };
    let r = U256::from_be_slice(r);
    let s = U256::from_be_slice(s);
    match sig.len() {
        65 => {
            let v = sig.get(64).copied().unwrap_or_default();
            let parity = match v {
                0 | 27 => false,
                1 | 28 => true,
                _ => return Err(DWalletError::CannotDetermineRecoveryId),
            };
            Ok(Signature::new(r, s, parity))
        }
        64 => {
            let candidates: Vec<Signature> = [false, true]
                .into_iter()
                .map(|parity| Signature::new(r, s, parity))
                .filter(|c| match (c.recover_address_from_prehash(digest), expected) {
                    (Ok(addr), Some(want)) => addr == want,
                    (Ok(_), None) => true,
                    (Err(_), _) => false,
                })
                .collect();
            match candidates.as_slice() {
                [only] => Ok(*only),
                _ => Err(DWalletError::CannotDetermineRecoveryId),
            }
        }
        n => Err(DWalletError::InvalidSignatureLength(n)),
    }
}

/// EIP-2718 bytes and hash of `tx` signed with `sig`.
pub fn signed_envelope(tx: &UnsignedEvmTx, sig: Signature) -> (Vec<u8>, B256) {
    let signed = tx.tx.clone().into_signed(sig);
    let hash = *signed.hash();
    let envelope = TxEnvelope::Eip1559(signed);
    (envelope.encoded_2718(), hash)
}

pub struct TxBroadcaster<'a> {
    node: &'a dyn EvmNode,
}

impl<'a> TxBroadcaster<'a> {
    pub const fn new(node: &'a dyn EvmNode) -> Self {
        Self { node }
    }

    /// Broadcasts `tx` with the dWallet's signature and returns the transaction hash.
    pub async fn broadcast(
        &self,
        tx: &UnsignedEvmTx,
        signature: &[u8],
        expected_sender: Option<Address>,
    ) -> eyre::Result<B256> {
        let sig = recoverable_signature(&tx.digest, signature, expected_sender.or(Some(tx.from)))?;
        let (raw, hash) = signed_envelope(tx, sig);
        tracing::debug!(bytes = raw.len(), nonce = tx.nonce(), "broadcasting");
        self.node.send_raw(&raw).await?;
        tracing::info!(%hash, kind = ?tx.kind, nonce = tx.nonce(), "transaction broadcast");
        Ok(hash)
    }
}
