//! Error types for vnode storage operations.

use skein_txlog::ChainError;

/// Errors that can occur during vnode storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested inode, block or transaction does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An appended transaction does not extend the key's chain.
    #[error("chain mismatch for key {key}: {reason}")]
    ChainMismatch {
        /// The key whose chain rejected the entry.
        key: String,
        /// Why the entry was rejected.
        reason: String,
    },

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The storage engine reported a failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The vnode could not be reached. Only raised by remote stores.
    #[error("vnode unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn chain_mismatch(key: &[u8], reason: ChainError) -> Self {
        Self::ChainMismatch {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn no_inode(key: &[u8]) -> Self {
        Self::NotFound(format!("inode {}", String::from_utf8_lossy(key)))
    }

    pub(crate) fn no_chain(key: &[u8]) -> Self {
        Self::NotFound(format!("transactions for {}", String::from_utf8_lossy(key)))
    }

    /// Whether this is a [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<postcard::Error> for StoreError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
