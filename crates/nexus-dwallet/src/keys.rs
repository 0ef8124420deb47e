use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hkdf::Hkdf;
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use crate::dwallet::Curve;
use crate::errors::DWalletError;

/// Domain separator mixed into every password-derived seed.
///
/// Changing it changes every derived key, which orphans existing dWallets.
pub const DEFAULT_DOMAIN_SALT: &[u8; 32] = b"NEXUS_DWALLET_SALT_V1_2026_02_07";

/// Password to user-share key material. Pure and deterministic for a given salt.
#[derive(Debug, Clone)]
pub struct KeyMaterialDeriver {
    salt: Vec<u8>,
}

impl Default for KeyMaterialDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN_SALT.to_vec())
    }
}

impl KeyMaterialDeriver {
    pub const fn new(salt: Vec<u8>) -> Self {
        Self { salt }
    }

    pub fn derive(
        &self,
        password: &SecretString,
        curve: Curve,
    ) -> Result<UserShareEncryptionKeys, DWalletError> {
        let pw = password.expose_secret();
        if pw.is_empty() {
            return Err(DWalletError::EmptyPassword);
        }
        let mut h = Sha256::new();
        h.update(&self.salt);
        h.update(pw.as_bytes());
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(h.finalize().into());
        UserShareEncryptionKeys::from_seed(&seed, curve)
    }
}

/// Keys the client holds for one dWallet curve.
///
/// The encryption keypair receives the user's secret share from the network. The ed25519
/// signing key proves ownership of the encryption key and signs user outputs.
pub struct UserShareEncryptionKeys {
    curve: Curve,
    encryption_secret: Zeroizing<[u8; 32]>,
    encryption_key: Vec<u8>,
    signing_key: SigningKey,
}

impl std::fmt::Debug for UserShareEncryptionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserShareEncryptionKeys")
            .field("curve", &self.curve)
            .field("encryption_key", &hex::encode(&self.encryption_key))
            .field("signer", &hex::encode(self.signer_public_key()))
            .finish_non_exhaustive()
    }
}

impl UserShareEncryptionKeys {
    fn from_seed(seed: &[u8; 32], curve: Curve) -> Result<Self, DWalletError> {
        let encryption_secret = derive_subkey(seed, curve, "encryption")?;
        let encryption_key = match curve {
            Curve::Secp256k1 => {
                let sk = k256::SecretKey::from_slice(encryption_secret.as_slice())
                    .map_err(|e| DWalletError::KeyMaterial(format!("secp256k1 scalar: {e}")))?;
                sk.public_key().to_encoded_point(true).as_bytes().to_vec()
            }
            Curve::Ed25519 => SigningKey::from_bytes(&encryption_secret)
                .verifying_key()
                .to_bytes()
                .to_vec(),
        };
        let signing_seed = derive_subkey(seed, curve, "signing")?;
        let signing_key = SigningKey::from_bytes(&signing_seed);
        Ok(Self {
            curve,
            encryption_secret,
            encryption_key,
            signing_key,
        })
    }

    pub const fn curve(&self) -> Curve {
        self.curve
    }

    /// Public encryption key as registered on the coordinator.
    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    /// Secret half of the encryption keypair, for decrypting the user's share.
    pub fn decryption_key(&self) -> &[u8; 32] {
        &self.encryption_secret
    }

    pub fn signer_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key.sign(msg).to_bytes()
    }

    /// Proof of ownership attached to `register_encryption_key`.
    pub fn encryption_key_signature(&self) -> [u8; 64] {
        self.sign(&self.encryption_key)
    }

    /// Signature over the dWallet's public output, attached when accepting the encrypted share.
    pub fn user_output_signature(&self, public_output: &[u8]) -> [u8; 64] {
        self.sign(public_output)
    }

    pub fn verify(&self, msg: &[u8], sig: &[u8; 64]) -> bool {
        let vk: VerifyingKey = self.signing_key.verifying_key();
        vk.verify(msg, &ed25519_dalek::Signature::from_bytes(sig))
            .is_ok()
    }
}

fn derive_subkey(
    seed: &[u8; 32],
    curve: Curve,
    purpose: &str,
) -> Result<Zeroizing<[u8; 32]>, DWalletError> {
    let hk = Hkdf::<Sha256>::new(None, seed);
    let info = format!("nexus-dwallet:{}:{purpose}", curve.as_str());
    let mut out = Zeroizing::new([0_u8; 32]);
    hk.expand(info.as_bytes(), out.as_mut_slice())
        .map_err(|e| DWalletError::KeyMaterial(format!("hkdf expand: {e}")))?;
    Ok(out)
}
