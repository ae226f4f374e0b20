//! Signing capabilities used by [`Tx::sign`](crate::Tx::sign) and
//! [`Tx::verify_signature`](crate::Tx::verify_signature).

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::RngCore;

use crate::error::TxError;

/// Produces signatures on behalf of one identity.
pub trait Signer: Send + Sync {
    /// Public key bytes recorded as the entry's `source`.
    fn public_key(&self) -> Vec<u8>;

    /// Sign `msg`.
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, TxError>;
}

/// Checks signatures produced by some [`Signer`].
pub trait Verifier: Send + Sync {
    /// Validate `signature` over `msg` against `public_key`.
    fn verify(&self, public_key: &[u8], signature: &[u8], msg: &[u8]) -> Result<(), TxError>;
}

/// ed25519 signer.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Signer from a 32-byte secret seed. Accepts the raw bytes of an iroh
    /// `SecretKey`, so a node signs with its network identity.
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Signer with a fresh random key.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self::from_bytes(&seed)
    }

    /// The 32-byte verifying key.
    pub fn verifying_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.verifying_key())
            .finish_non_exhaustive()
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> Vec<u8> {
        self.verifying_key().to_vec()
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, TxError> {
        let signature = self
            .key
            .try_sign(msg)
            .map_err(|e| TxError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

/// ed25519 verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], signature: &[u8], msg: &[u8]) -> Result<(), TxError> {
        let key_bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| TxError::InvalidKey(format!("expected 32 bytes, got {}", public_key.len())))?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|e| TxError::InvalidKey(e.to_string()))?;
        let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| {
            TxError::Verification(format!("expected 64-byte signature, got {}", signature.len()))
        })?;
        verifying_key
            .verify(msg, &Signature::from_bytes(&sig_bytes))
            .map_err(|e| TxError::Verification(e.to_string()))
    }
}
