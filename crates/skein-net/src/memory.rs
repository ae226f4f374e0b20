//! In-process network connecting [`RpcServer`]s through duplex pipes.
//!
//! Used by tests and single-process clusters. Links can be severed and
//! hosts made unreachable to exercise failure handling.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::link::{BoxReader, BoxWriter, Dialer, Link};
use crate::server::RpcServer;

/// Bytes buffered in each direction of a stream.
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct Inner {
    servers: HashMap<String, Arc<RpcServer>>,
    unreachable: HashSet<String>,
    stalled: HashSet<String>,
    links: HashMap<String, Vec<Weak<MemoryLink>>>,
}

/// Registry of in-process hosts.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Inner>>,
    stall_lifted: Arc<Notify>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `server` reachable as `host`.
    pub fn register(&self, host: impl Into<String>, server: Arc<RpcServer>) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.servers.insert(host.into(), server);
    }

    /// A dialer for this network.
    pub fn dialer(&self) -> MemoryDialer {
        MemoryDialer {
            network: self.clone(),
        }
    }

    /// Close every live link to `host`, failing streams in flight.
    pub fn sever(&self, host: &str) {
        let links = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.links.remove(host).unwrap_or_default()
        };
        let mut severed = 0;
        for link in links.iter().filter_map(Weak::upgrade) {
            link.close();
            severed += 1;
        }
        debug!(host, severed, "severed links");
    }

    /// Refuse (or allow again) new dials to `host`.
    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if reachable {
            inner.unreachable.remove(host);
        } else {
            inner.unreachable.insert(host.to_string());
        }
    }

    /// Hold new dials to `host` until the stall is lifted, like a peer that
    /// accepts nothing and never answers.
    pub fn set_stalled(&self, host: &str, stalled: bool) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if stalled {
            inner.stalled.insert(host.to_string());
        } else {
            inner.stalled.remove(host);
            self.stall_lifted.notify_waiters();
        }
    }

    async fn wait_unstalled(&self, host: &str) {
        loop {
            let lifted = self.stall_lifted.notified();
            if !self.inner.lock().expect("lock poisoned").stalled.contains(host) {
                return;
            }
            debug!(host, "dial stalled");
            lifted.await;
        }
    }
}

/// Dials hosts of a [`MemoryNetwork`].
pub struct MemoryDialer {
    network: MemoryNetwork,
}

#[async_trait::async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, host: &str) -> Result<Arc<dyn Link>, NetError> {
        self.network.wait_unstalled(host).await;
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        if inner.unreachable.contains(host) {
            return Err(NetError::Connect(format!("{host} unreachable")));
        }
        let server = inner
            .servers
            .get(host)
            .cloned()
            .ok_or_else(|| NetError::Connect(format!("no host {host}")))?;

        let link = Arc::new(MemoryLink {
            host: host.to_string(),
            server,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        let live = inner.links.entry(host.to_string()).or_default();
        live.retain(|l| l.strong_count() > 0);
        live.push(Arc::downgrade(&link));
        Ok(link)
    }
}

struct MemoryLink {
    host: String,
    server: Arc<RpcServer>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl Link for MemoryLink {
    async fn open_bi(&self) -> Result<(BoxWriter, BoxReader), NetError> {
        if self.is_closed() {
            return Err(NetError::StreamOpen(format!("link to {} closed", self.host)));
        }
        let (client, server_end) = tokio::io::duplex(PIPE_CAPACITY);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server_end);

        let server = self.server.clone();
        let cancel = self.cancel.clone();
        let host = self.host.clone();
        tokio::spawn(async move {
            tokio::select! {
                r = server.serve_stream(Box::new(server_read), Box::new(server_write)) => {
                    if let Err(e) = r {
                        warn!(%host, %e, "stream failed");
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });

        Ok((Box::new(client_write), Box::new(client_read)))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
