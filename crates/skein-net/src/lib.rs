//! Vnode transport over pooled connections.
//!
//! This crate lets callers operate on any vnode without caring whether it
//! lives in this process or on another host:
//!
//! - [`RpcMessage`]: the wire protocol (length-prefixed postcard frames).
//! - [`ConnPool`]: outbound connections keyed by host, evicted on failure.
//! - [`NetTransport`]: batched per-host vnode calls, leader routing and the
//!   three bulk protocols (transaction catch-up, key transfer, block
//!   replication).
//! - [`RpcServer`]: answers requests against locally registered vnodes.
//! - [`RemoteVnode`]: a [`VnodeStore`](skein_store::VnodeStore) that forwards
//!   every call to the owning host.
//! - [`QuicDialer`] / [`RpcProtocol`]: iroh QUIC plumbing for deployments;
//!   [`MemoryNetwork`] wires hosts together in-process.

mod client;
mod error;
mod framing;
mod link;
mod memory;
mod message;
mod pool;
mod quic;
mod remote;
mod server;
mod transport;


pub use client::RpcClient;
pub use error::{NetError, RemoteError, RemoteErrorKind};
pub use framing::{MAX_MESSAGE_SIZE, read_frame, write_frame};
pub use link::{BoxReader, BoxWriter, Dialer, Link};
pub use memory::{MemoryDialer, MemoryNetwork};
pub use message::{RpcMessage, VnodeResponse};
pub use pool::ConnPool;
pub use quic::{QuicDialer, QuicLink, RpcProtocol, SKEIN_ALPN, cluster_alpn, parse_host};
pub use remote::RemoteVnode;
pub use server::{LeaderService, RpcServer};
pub use transport::{NetTransport, ReplSink, StreamOutcome};
