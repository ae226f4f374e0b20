//! iroh QUIC links.
//!
//! Hosts are addressed as `<endpoint_id>` or `<endpoint_id>@<ip:port>`.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use iroh::{Endpoint, EndpointAddr, EndpointId};
use tracing::{debug, warn};

use crate::error::NetError;
use crate::link::{BoxReader, BoxWriter, Dialer, Link};
use crate::server::RpcServer;

/// Base ALPN of the skein protocol.
pub const SKEIN_ALPN: &[u8] = b"skein/0";

/// Derive a cluster-specific ALPN from a shared secret.
///
/// The ALPN is `skein/0/<first 16 hex chars of blake3(secret)>`, so hosts
/// configured with different secrets fail the handshake.
pub fn cluster_alpn(secret: &[u8]) -> Vec<u8> {
    let hash = blake3::hash(secret);
    let hex = hash.to_hex();
    format!("skein/0/{}", &hex[..16]).into_bytes()
}

/// Parse a host string into an iroh address.
pub fn parse_host(host: &str) -> Result<EndpointAddr, NetError> {
    let invalid = |reason: String| NetError::InvalidHost {
        host: host.to_string(),
        reason,
    };
    let (id_str, addr_str) = match host.split_once('@') {
        Some((id, addr)) => (id, Some(addr)),
        None => (host, None),
    };

    let endpoint_id: EndpointId = id_str
        .parse()
        .map_err(|e| invalid(format!("invalid endpoint id: {e}")))?;

    let mut addr = EndpointAddr::new(endpoint_id);
    if let Some(sa) = addr_str {
        let socket_addr: SocketAddr = sa
            .parse()
            .map_err(|e| invalid(format!("invalid socket address: {e}")))?;
        addr = addr.with_ip_addr(socket_addr);
    }
    Ok(addr)
}

/// A pooled QUIC connection.
pub struct QuicLink(Connection);

#[async_trait::async_trait]
impl Link for QuicLink {
    async fn open_bi(&self) -> Result<(BoxWriter, BoxReader), NetError> {
        let (send, recv) = self
            .0
            .open_bi()
            .await
            .map_err(|e| NetError::StreamOpen(e.to_string()))?;
        Ok((Box::new(send), Box::new(recv)))
    }

    fn close(&self) {
        self.0.close(0u32.into(), b"reaped");
    }

    fn is_closed(&self) -> bool {
        self.0.close_reason().is_some()
    }
}

/// Dials hosts over an iroh endpoint.
///
/// Ring hosts are usually bare endpoint ids. Direct addresses learned from
/// configuration are kept here and used when the host string has none.
pub struct QuicDialer {
    endpoint: Endpoint,
    alpn: Vec<u8>,
    addresses: RwLock<HashMap<EndpointId, EndpointAddr>>,
}

impl QuicDialer {
    pub fn new(endpoint: Endpoint, alpn: Vec<u8>) -> Self {
        Self {
            endpoint,
            alpn,
            addresses: RwLock::new(HashMap::new()),
        }
    }

    /// Remember the direct addresses of a peer.
    pub fn add_peer(&self, addr: EndpointAddr) {
        self.addresses
            .write()
            .expect("lock poisoned")
            .insert(addr.id, addr);
    }

    fn resolve(&self, host: &str) -> Result<EndpointAddr, NetError> {
        let addr = parse_host(host)?;
        if addr.ip_addrs().next().is_some() {
            return Ok(addr);
        }
        let known = self.addresses.read().expect("lock poisoned");
        Ok(known.get(&addr.id).cloned().unwrap_or(addr))
    }
}

#[async_trait::async_trait]
impl Dialer for QuicDialer {
    async fn dial(&self, host: &str) -> Result<Arc<dyn Link>, NetError> {
        let addr = self.resolve(host)?;
        debug!(remote = %addr.id.fmt_short(), "connecting to host");
        let conn = self
            .endpoint
            .connect(addr, &self.alpn)
            .await
            .map_err(|e| NetError::Connect(e.to_string()))?;
        Ok(Arc::new(QuicLink(conn)))
    }
}

/// Accepts skein connections dispatched by an iroh
/// [`Router`](iroh::protocol::Router).
pub struct RpcProtocol {
    server: Arc<RpcServer>,
}

impl RpcProtocol {
    pub fn new(server: Arc<RpcServer>) -> Self {
        Self { server }
    }
}

impl fmt::Debug for RpcProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcProtocol").finish_non_exhaustive()
    }
}

impl ProtocolHandler for RpcProtocol {
    async fn accept(&self, conn: Connection) -> Result<(), AcceptError> {
        let remote = conn.remote_id();
        debug!(remote = %remote.fmt_short(), "accepted connection");
        loop {
            match conn.accept_bi().await {
                Ok((send, recv)) => {
                    let server = self.server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_stream(Box::new(recv), Box::new(send)).await {
                            warn!(remote = %remote.fmt_short(), %e, "stream failed");
                        }
                    });
                }
                Err(e) => {
                    debug!(remote = %remote.fmt_short(), %e, "connection closed");
                    return Ok(());
                }
            }
        }
    }
}
