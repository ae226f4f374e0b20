//! Error types for network operations.

use serde::{Deserialize, Serialize};
use skein_store::StoreError;
use skein_types::VnodeId;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to connect to a remote host.
    #[error("connection error: {0}")]
    Connect(String),

    /// Failed to open a stream on a pooled connection.
    #[error("stream open error: {0}")]
    StreamOpen(String),

    /// Reading or writing a stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream before answering.
    #[error("stream closed")]
    StreamClosed,

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote side processed the request and reported a failure.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The vnode is not registered in this process.
    #[error("vnode not local: {0}")]
    UnknownVnode(VnodeId),

    /// The peer answered with an unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The caller cancelled a streaming call.
    #[error("cancelled")]
    Cancelled,

    /// The local endpoint could not be created or used.
    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// A host string could not be parsed.
    #[error("invalid host {host}: {reason}")]
    InvalidHost {
        /// The offending host string.
        host: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl NetError {
    /// Whether the failure leaves the pooled connection unusable.
    ///
    /// These errors evict the connection; the next call to the host redials.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::StreamOpen(_) | Self::Io(_) | Self::StreamClosed | Self::Cancelled
        )
    }

    /// Whether the remote reported that the item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote(e) if e.kind == RemoteErrorKind::NotFound)
    }
}

impl From<postcard::Error> for NetError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Category of a [`RemoteError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// Inode, block or transaction absent.
    NotFound,
    /// Append rejected by the chain check.
    ChainMismatch {
        /// Key whose chain rejected the entry.
        key: String,
    },
    /// Local storage failure on the remote host.
    Storage,
    /// The addressed vnode is not served by the host.
    UnknownVnode,
    /// The host, or a host behind it, could not be reached.
    Unavailable,
    /// Malformed or unexpected request.
    Invalid,
    /// Any other failure.
    Internal,
}

/// A failure reported by the remote side, carried over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    /// What went wrong.
    pub kind: RemoteErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RemoteError {
    /// Build an error of the given kind.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The vnode is not registered on the answering host.
    pub fn unknown_vnode(id: VnodeId) -> Self {
        Self::new(RemoteErrorKind::UnknownVnode, format!("vnode {} not served here", id.short()))
    }

    /// The host could not be reached.
    pub fn unavailable(e: &NetError) -> Self {
        Self::new(RemoteErrorKind::Unavailable, e.to_string())
    }

    /// Whether this is a not-found report.
    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }
}

impl From<StoreError> for RemoteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => Self::new(RemoteErrorKind::NotFound, m),
            StoreError::ChainMismatch { key, reason } => {
                Self::new(RemoteErrorKind::ChainMismatch { key }, reason)
            }
            StoreError::Unavailable(m) => Self::new(RemoteErrorKind::Unavailable, m),
            other => Self::new(RemoteErrorKind::Storage, other.to_string()),
        }
    }
}

impl From<NetError> for RemoteError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Remote(remote) => remote,
            other if other.is_connection() => Self::unavailable(&other),
            other => Self::new(RemoteErrorKind::Internal, other.to_string()),
        }
    }
}

impl From<RemoteError> for StoreError {
    fn from(e: RemoteError) -> Self {
        match e.kind {
            RemoteErrorKind::NotFound => StoreError::NotFound(e.message),
            RemoteErrorKind::ChainMismatch { key } => StoreError::ChainMismatch {
                key,
                reason: e.message,
            },
            RemoteErrorKind::Unavailable => StoreError::Unavailable(e.message),
            _ => StoreError::Storage(e.to_string()),
        }
    }
}

impl From<NetError> for StoreError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Remote(remote) => remote.into(),
            other if other.is_connection() => StoreError::Unavailable(other.to_string()),
            other => StoreError::Storage(other.to_string()),
        }
    }
}
