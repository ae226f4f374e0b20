//! Error types for the transaction log crate.

use skein_types::TxHash;

/// Errors raised while signing or verifying a transaction.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// The signer failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The signature does not validate against the entry's source key.
    #[error("signature verification failed: {0}")]
    Verification(String),

    /// Key material has the wrong length or encoding.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Reasons an entry cannot extend a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The entry's previous hash does not match the current tip.
    #[error("prev hash mismatch: expected {expected}, got {actual}")]
    PrevHash {
        /// Hash of the current tip (zero when the chain is empty).
        expected: TxHash,
        /// Previous hash carried by the rejected entry.
        actual: TxHash,
    },

    /// The entry's height is not exactly one above the tip.
    #[error("height mismatch: expected {expected}, got {actual}")]
    Height {
        /// Height the entry should carry.
        expected: u64,
        /// Height carried by the rejected entry.
        actual: u64,
    },

    /// The entry belongs to a different key than the chain.
    #[error("entry key does not match chain key")]
    Key,
}
