//! The transaction log entry.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use skein_types::TxHash;

use crate::error::TxError;
use crate::signer::{Signer, Verifier};

/// A single entry in a key's transaction chain.
///
/// The hash covers the key, the data hash, the previous hash and both
/// participant keys. `timestamp` and `height` are bookkeeping and are not
/// part of the signed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// Key this entry belongs to.
    pub key: Vec<u8>,
    /// Hash of the preceding entry, or [`TxHash::ZERO`] for genesis.
    pub prev_hash: TxHash,
    /// Public key of the author. Set by [`Tx::sign`].
    pub source: Vec<u8>,
    /// Public key of the recipient, if any.
    pub destination: Vec<u8>,
    /// Creation time in nanoseconds since the unix epoch.
    pub timestamp: u64,
    /// 1-based position in the chain.
    pub height: u64,
    /// Payload.
    pub data: Vec<u8>,
    /// Signature over [`Tx::hash`] by `source`.
    pub signature: Vec<u8>,
}

impl Tx {
    /// Build an unsigned entry.
    ///
    /// Height is 1 when `prev_hash` is the zero sentinel. Otherwise it is
    /// left at 0 for the caller to fill in; [`Tx::extend`] does this.
    pub fn new(key: impl Into<Vec<u8>>, prev_hash: TxHash, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            prev_hash,
            source: Vec::new(),
            destination: Vec::new(),
            timestamp: now_nanos(),
            height: if prev_hash.is_zero() { 1 } else { 0 },
            data: data.into(),
            signature: Vec::new(),
        }
    }

    /// Build the unsigned entry that follows `prev` in the same chain.
    pub fn extend(prev: &Tx, data: impl Into<Vec<u8>>) -> Self {
        let mut tx = Self::new(prev.key.clone(), prev.hash(), data);
        tx.height = prev.height + 1;
        tx
    }

    /// `sha256(data)`.
    pub fn data_hash(&self) -> [u8; 32] {
        Sha256::digest(&self.data).into()
    }

    /// `sha256(key ‖ data_hash ‖ prev_hash ‖ source ‖ destination)`.
    pub fn hash(&self) -> TxHash {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update(self.data_hash());
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(&self.source);
        hasher.update(&self.destination);
        TxHash::from(<[u8; 32]>::from(hasher.finalize()))
    }

    /// Whether this entry starts a chain.
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }

    /// Set `source` to the signer's public key and sign the entry hash.
    pub fn sign(&mut self, signer: &dyn Signer) -> Result<(), TxError> {
        self.source = signer.public_key();
        let hash = self.hash();
        self.signature = signer.sign(hash.as_bytes())?;
        Ok(())
    }

    /// Recompute the hash and check the signature against `source`.
    pub fn verify_signature(&self, verifier: &dyn Verifier) -> Result<(), TxError> {
        let hash = self.hash();
        verifier.verify(&self.source, &self.signature, hash.as_bytes())
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
