//! Ring-aware coordinator for client reads and writes.
//!
//! Every write goes to the leader of its key (the first vnode of the ring's
//! preference list). The leader appends a signed transaction recording the
//! operation to the key's chain, updates its inode, then hands the remaining
//! replicas to the replication engine. The leader is never elected: when
//! the ring changes, the next lookup simply names a different vnode.

use std::slice;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use skein_net::{LeaderService, NetTransport, RemoteError};
use skein_ring::RingOracle;
use skein_store::{LocalStore, VnodeStore};
use skein_txlog::{Signer, Tx};
use skein_types::{
    Consistency, Inode, LeaderInfo, ReplRequest, RequestOptions, ResponseMeta, TxHash, Vnode,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::error::EngineError;
use crate::op::TxOp;
use crate::replication::{ReplicationEngine, shard_for};

/// Number of lock stripes serialising leader writes per key.
pub(crate) const WRITE_STRIPES: usize = 64;

/// Upper bound on the buffer reserved up front for a block-backed read.
const MAX_READ_PREALLOC: usize = 4 * 1024 * 1024;

/// Configuration for [`ConsistentStore`].
#[derive(Debug, Clone)]
pub struct ConsistentStoreConfig {
    /// Values up to this many bytes are stored inline in the inode instead
    /// of as a content-addressed block.
    pub inline_threshold: usize,
}

impl Default for ConsistentStoreConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 1024,
        }
    }
}

/// Coordinates client operations across the vnodes responsible for a key.
pub struct ConsistentStore {
    config: ConsistentStoreConfig,
    ring: Arc<dyn RingOracle>,
    transport: Arc<NetTransport>,
    signer: Arc<dyn Signer>,
    replication: Arc<ReplicationEngine>,
    write_locks: Vec<Mutex<()>>,
}

impl ConsistentStore {
    pub fn new(
        config: ConsistentStoreConfig,
        ring: Arc<dyn RingOracle>,
        transport: Arc<NetTransport>,
        signer: Arc<dyn Signer>,
        replication: Arc<ReplicationEngine>,
    ) -> Self {
        Self {
            config,
            ring,
            transport,
            signer,
            replication,
            write_locks: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn transport(&self) -> &Arc<NetTransport> {
        &self.transport
    }

    pub fn replication(&self) -> &Arc<ReplicationEngine> {
        &self.replication
    }

    /// Resolve `key` to its leader and replicas.
    pub fn lookup_leader(&self, key: &[u8]) -> Result<LeaderInfo, EngineError> {
        LeaderInfo::from_preference_list(self.ring.lookup(key)).ok_or_else(|| {
            EngineError::EmptyPreferenceList {
                key: String::from_utf8_lossy(key).into_owned(),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Client operations
    // -----------------------------------------------------------------------

    /// Store `data` under `key`.
    ///
    /// Returns once the leader has the write; replicas follow asynchronously
    /// unless [`Consistency::All`] is requested.
    pub async fn set(
        &self,
        key: &[u8],
        data: Bytes,
        options: RequestOptions,
    ) -> Result<ResponseMeta, EngineError> {
        let start = Instant::now();
        let info = self.lookup_leader(key)?;

        let inode = if data.len() <= self.config.inline_threshold {
            Inode::inline(key, &data)
        } else {
            let stored = self
                .transport
                .set_block(slice::from_ref(&info.leader), data.clone())
                .await;
            for r in stored {
                r.result.map_err(|e| EngineError::Net(e.into()))?;
            }
            Inode::from_data(key, &data)
        };

        let leader = if self.transport.is_local(&info.leader) {
            self.set_inode(inode, options).await?
        } else {
            self.transport
                .set_inode(&info.leader.host, inode, options)
                .await?
        };

        info!(key = %String::from_utf8_lossy(key), size = data.len(), vnode = %leader, "set");
        Ok(ResponseMeta {
            vnode: leader,
            elapsed: start.elapsed(),
        })
    }

    /// Read the data stored under `key`.
    pub async fn get(
        &self,
        key: &[u8],
        options: RequestOptions,
    ) -> Result<(Bytes, ResponseMeta), EngineError> {
        let start = Instant::now();
        let info = self.lookup_leader(key)?;
        let (vnode, store, inode) = self.locate(&info, key, options).await?;

        let data = match inode.inline_data() {
            Some(data) => Bytes::from(data),
            None => {
                // The recorded size is only a hint; grow as blocks arrive.
                let mut buf = Vec::with_capacity((inode.size as usize).min(MAX_READ_PREALLOC));
                for id in inode.block_ids() {
                    let block = store.get_block(&id).await?;
                    buf.reserve(block.len());
                    buf.extend_from_slice(&block);
                }
                Bytes::from(buf)
            }
        };

        Ok((
            data,
            ResponseMeta {
                vnode,
                elapsed: start.elapsed(),
            },
        ))
    }

    /// Inode of `key`, without fetching its blocks.
    pub async fn stat(
        &self,
        key: &[u8],
        options: RequestOptions,
    ) -> Result<(Inode, ResponseMeta), EngineError> {
        let start = Instant::now();
        let info = self.lookup_leader(key)?;
        let (vnode, _, inode) = self.locate(&info, key, options).await?;
        Ok((
            inode,
            ResponseMeta {
                vnode,
                elapsed: start.elapsed(),
            },
        ))
    }

    /// Delete `key`. Fails with [`EngineError::NotFound`] if it has no data.
    pub async fn delete(
        &self,
        key: &[u8],
        options: RequestOptions,
    ) -> Result<ResponseMeta, EngineError> {
        let start = Instant::now();
        let info = self.lookup_leader(key)?;

        let leader = if self.transport.is_local(&info.leader) {
            self.delete_inode(key, options).await?
        } else {
            self.transport
                .delete_inode(&info.leader.host, Inode::new(key), options)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        EngineError::not_found(key)
                    } else {
                        e.into()
                    }
                })?
        };

        info!(key = %String::from_utf8_lossy(key), vnode = %leader, "delete");
        Ok(ResponseMeta {
            vnode: leader,
            elapsed: start.elapsed(),
        })
    }

    // -----------------------------------------------------------------------
    // Leader side
    // -----------------------------------------------------------------------

    /// Record `inode` as the new state of its key on the local leader vnode
    /// and schedule replication.
    #[instrument(skip_all, fields(key = %String::from_utf8_lossy(&inode.id)))]
    pub async fn set_inode(
        &self,
        inode: Inode,
        options: RequestOptions,
    ) -> Result<Vnode, EngineError> {
        let info = self.lookup_leader(&inode.id)?;
        let store = self.leader_store(&info, &inode.id)?;

        {
            let _guard = self.lock(&inode.id).await;
            self.append_op(store.as_ref(), &inode.id, &TxOp::Set(inode.clone()))
                .await?;
            store.set_inode(inode.clone()).await?;
        }
        // Replicas may be slow or down; other keys on this stripe must not wait.
        self.propagate(&info, &inode.id, options).await?;
        Ok(info.leader)
    }

    /// Delete `key` on the local leader vnode and schedule replication.
    #[instrument(skip_all, fields(key = %String::from_utf8_lossy(key)))]
    pub async fn delete_inode(
        &self,
        key: &[u8],
        options: RequestOptions,
    ) -> Result<Vnode, EngineError> {
        let info = self.lookup_leader(key)?;
        let store = self.leader_store(&info, key)?;

        {
            let _guard = self.lock(key).await;
            match store.get_inode(key).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Err(EngineError::not_found(key)),
                Err(e) => return Err(e.into()),
            }
            self.append_op(store.as_ref(), key, &TxOp::Delete).await?;
            store.delete_inode(key).await?;
        }
        self.propagate(&info, key, options).await?;
        Ok(info.leader)
    }

    fn leader_store(&self, info: &LeaderInfo, key: &[u8]) -> Result<Arc<dyn LocalStore>, EngineError> {
        self.transport
            .local(&info.leader.id)
            .ok_or_else(|| EngineError::NotLeader {
                key: String::from_utf8_lossy(key).into_owned(),
                leader: info.leader.clone(),
            })
    }

    async fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.write_locks[shard_for(key, self.write_locks.len())]
            .lock()
            .await
    }

    /// Append a signed entry for `op` to the tip of `key`'s chain.
    async fn append_op(
        &self,
        store: &dyn LocalStore,
        key: &[u8],
        op: &TxOp,
    ) -> Result<(), EngineError> {
        let data = op.encode()?;
        let mut tx = match store.last_tx(key).await {
            Ok(tip) => Tx::extend(&tip, data),
            Err(e) if e.is_not_found() => Tx::new(key, TxHash::ZERO, data),
            Err(e) => return Err(e.into()),
        };
        tx.sign(self.signer.as_ref())?;
        debug!(height = tx.height, hash = %tx.hash().short(), "appending transaction");
        store.append_tx(tx).await?;
        Ok(())
    }

    async fn propagate(
        &self,
        info: &LeaderInfo,
        key: &[u8],
        options: RequestOptions,
    ) -> Result<(), EngineError> {
        let requests = info
            .replicas
            .iter()
            .filter(|vn| vn.id != info.leader.id)
            .map(|dst| ReplRequest {
                src: info.leader.clone(),
                dst: dst.clone(),
                key: key.to_vec(),
            });

        if options.consistency == Consistency::All {
            for req in requests {
                self.replication.replicate(&req).await.map_err(|e| {
                    EngineError::Replication(format!("replica {} failed: {e}", req.dst))
                })?;
            }
        } else {
            for req in requests {
                self.replication.enqueue(req);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Vnodes to try, in order, for a read.
    fn read_candidates(&self, info: &LeaderInfo, options: RequestOptions) -> Vec<Vnode> {
        match options.consistency {
            Consistency::Lazy => {
                let (mut local, remote): (Vec<Vnode>, Vec<Vnode>) = info
                    .preference_list()
                    .into_iter()
                    .partition(|vn| self.transport.is_local(vn));
                local.extend(remote);
                local
            }
            Consistency::Leader if options.read_fallback => info.preference_list(),
            _ => vec![info.leader.clone()],
        }
    }

    /// First candidate vnode that returns the inode of `key`.
    ///
    /// Lazy reads move on after any failure. Leader reads move on only when
    /// fallback is enabled and the vnode could not be reached; a not-found
    /// answer from the leader is final.
    async fn locate(
        &self,
        info: &LeaderInfo,
        key: &[u8],
        options: RequestOptions,
    ) -> Result<(Vnode, Arc<dyn VnodeStore>, Inode), EngineError> {
        let mut last_error = None;
        for vn in self.read_candidates(info, options) {
            let store = self.transport.store_for(&vn);
            let err = match store.get_inode(key).await {
                Ok(inode) => return Ok((vn, store, inode)),
                Err(e) if e.is_not_found() => EngineError::not_found(key),
                Err(e) => EngineError::Store(e),
            };
            let next = match options.consistency {
                Consistency::Lazy => true,
                _ => options.read_fallback && err.is_unavailable(),
            };
            if !next {
                return Err(err);
            }
            debug!(vnode = %vn, error = %err, "read failed, trying next replica");
            last_error = Some(err);
        }
        Err(last_error.unwrap_or_else(|| EngineError::not_found(key)))
    }
}

#[async_trait]
impl LeaderService for ConsistentStore {
    async fn set_inode(&self, inode: Inode, options: RequestOptions) -> Result<Vnode, RemoteError> {
        Ok(ConsistentStore::set_inode(self, inode, options).await?)
    }

    async fn delete_inode(
        &self,
        inode: Inode,
        options: RequestOptions,
    ) -> Result<Vnode, RemoteError> {
        Ok(ConsistentStore::delete_inode(self, &inode.id, options).await?)
    }

    fn lookup_leader(&self, key: &[u8]) -> Vec<Vnode> {
        self.ring.lookup(key)
    }
}
