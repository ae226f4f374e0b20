//! Connection abstraction shared by the QUIC and in-process networks.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::NetError;

/// Send half of a bidirectional stream.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Receive half of a bidirectional stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// An established connection to one host that multiplexes streams.
#[async_trait::async_trait]
pub trait Link: Send + Sync {
    /// Open a new bidirectional stream.
    async fn open_bi(&self) -> Result<(BoxWriter, BoxReader), NetError>;

    /// Close the connection. In-flight streams fail.
    fn close(&self);

    /// Whether the connection is known to be dead.
    fn is_closed(&self) -> bool;
}

/// Establishes connections to hosts.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `host`.
    async fn dial(&self, host: &str) -> Result<Arc<dyn Link>, NetError>;
}
