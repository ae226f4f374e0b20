//! Outbound connection pool keyed by host.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::NetError;
use crate::link::{Dialer, Link};

/// Cached connections to remote hosts.
///
/// Lookups take the read lock so calls to different hosts never serialize.
/// Dialing happens outside any lock; if two callers race to dial the same
/// host, the first connection inserted wins and the other is closed.
pub struct ConnPool {
    dialer: Arc<dyn Dialer>,
    conns: RwLock<HashMap<String, Arc<dyn Link>>>,
    dials: AtomicU64,
}

impl ConnPool {
    /// Create an empty pool that dials through `dialer`.
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            conns: RwLock::new(HashMap::new()),
            dials: AtomicU64::new(0),
        }
    }

    /// Return the cached connection to `host`, dialing one if needed.
    pub async fn get(&self, host: &str) -> Result<Arc<dyn Link>, NetError> {
        {
            let conns = self.conns.read().await;
            if let Some(link) = conns.get(host).filter(|l| !l.is_closed()) {
                return Ok(link.clone());
            }
        }

        debug!(host, "dialing host");
        self.dials.fetch_add(1, Ordering::Relaxed);
        let fresh = self.dialer.dial(host).await?;

        let mut conns = self.conns.write().await;
        if let Some(existing) = conns.get(host).filter(|l| !l.is_closed()) {
            fresh.close();
            return Ok(existing.clone());
        }
        conns.insert(host.to_string(), fresh.clone());
        Ok(fresh)
    }

    /// Close `link` and evict it, unless the pool already holds a newer
    /// connection for `host`.
    pub async fn reap(&self, host: &str, link: &Arc<dyn Link>) {
        link.close();
        let mut conns = self.conns.write().await;
        if conns.get(host).is_some_and(|cached| Arc::ptr_eq(cached, link)) {
            conns.remove(host);
            debug!(host, "reaped connection");
        }
    }

    /// Close and drop every cached connection.
    pub async fn clear(&self) {
        let mut conns = self.conns.write().await;
        for link in conns.values() {
            link.close();
        }
        conns.clear();
    }

    /// Whether a live connection to `host` is cached.
    pub async fn contains(&self, host: &str) -> bool {
        self.conns
            .read()
            .await
            .get(host)
            .is_some_and(|l| !l.is_closed())
    }

    /// Number of cached connections.
    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }

    /// Whether no connections are cached.
    pub async fn is_empty(&self) -> bool {
        self.conns.read().await.is_empty()
    }

    /// Total dials attempted since creation.
    pub fn dial_count(&self) -> u64 {
        self.dials.load(Ordering::Relaxed)
    }
}
