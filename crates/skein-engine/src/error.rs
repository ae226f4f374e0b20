//! Error types for the engine.

use skein_net::{NetError, RemoteError, RemoteErrorKind};
use skein_store::StoreError;
use skein_txlog::TxError;
use skein_types::Vnode;

/// Errors that can occur during coordinator and replication operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A vnode store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Network transport error.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Signing a transaction failed.
    #[error("transaction error: {0}")]
    Tx(#[from] TxError),

    /// The key has no data.
    #[error("key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The ring returned no vnodes for the key.
    #[error("empty preference list for key {key}")]
    EmptyPreferenceList {
        /// The key that could not be placed.
        key: String,
    },

    /// A leader-side write reached a host that does not serve the leader.
    #[error("not leader for {key}: leader is {leader}")]
    NotLeader {
        /// Key being written.
        key: String,
        /// Leader according to this host's ring.
        leader: Vnode,
    },

    /// Replica synchronisation failed.
    #[error("replication error: {0}")]
    Replication(String),

    /// A transaction payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Whether the key (or one of its parts) does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Store(e) => e.is_not_found(),
            Self::Net(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether the failure was reaching a vnode rather than the vnode
    /// answering.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Store(StoreError::Unavailable(_)) => true,
            Self::Net(e) => {
                e.is_connection()
                    || matches!(e, NetError::Remote(r) if r.kind == RemoteErrorKind::Unavailable)
            }
            _ => false,
        }
    }

    pub(crate) fn not_found(key: &[u8]) -> Self {
        Self::NotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }
}

impl From<postcard::Error> for EngineError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<EngineError> for RemoteError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Store(e) => e.into(),
            EngineError::Net(e) => e.into(),
            EngineError::NotFound { key } => {
                RemoteError::new(RemoteErrorKind::NotFound, format!("key not found: {key}"))
            }
            other => RemoteError::new(RemoteErrorKind::Internal, other.to_string()),
        }
    }
}
