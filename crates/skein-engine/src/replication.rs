//! Asynchronous replica reconciliation.
//!
//! [`ReplicationEngine`] drains [`ReplRequest`]s with a fixed set of
//! workers. Requests are routed to a worker by a hash of their key, so
//! catch-ups for the same key never run concurrently or out of order.
//! Each request gets exactly one attempt; failures are logged and dropped.

use std::collections::BTreeMap;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use sha2::{Digest, Sha256};
use skein_net::{NetTransport, RemoteError, RemoteErrorKind, ReplSink, StreamOutcome, VnodeResponse};
use skein_ring::Ring;
use skein_store::{LocalStore, StoreError};
use skein_types::{BlockId, ReplRequest, TxHash, Vnode, VnodeId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::op::TxOp;

/// Worker pool sizing.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Number of workers; each owns one queue.
    pub workers: usize,
    /// Capacity of each worker's queue. Requests beyond it are dropped.
    pub queue_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Counters since the engine started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Outcome of bootstrapping a vnode from another.
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub blocks: StreamOutcome,
    pub keys: StreamOutcome,
}

/// Key-sharded replication workers.
pub struct ReplicationEngine {
    transport: Arc<NetTransport>,
    queues: Vec<mpsc::Sender<ReplRequest>>,
    /// Requests queued or in progress.
    pending: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    cancel: CancellationToken,
}

/// Routes incoming key transfers to the engine without keeping it alive.
struct EngineSink(Weak<ReplicationEngine>);

impl ReplSink for EngineSink {
    fn enqueue(&self, req: ReplRequest) -> bool {
        self.0.upgrade().is_some_and(|engine| engine.enqueue(req))
    }
}

impl ReplicationEngine {
    /// Spawn the workers and register the engine as `transport`'s
    /// replication sink.
    pub fn start(config: ReplicationConfig, transport: Arc<NetTransport>) -> Arc<Self> {
        let workers = config.workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut receivers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            queues.push(tx);
            receivers.push(rx);
        }

        let engine = Arc::new(Self {
            transport: transport.clone(),
            queues,
            pending: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });
        transport.set_repl_sink(Arc::new(EngineSink(Arc::downgrade(&engine))));

        for (index, rx) in receivers.into_iter().enumerate() {
            tokio::spawn(run_worker(
                index,
                Arc::downgrade(&engine),
                rx,
                engine.cancel.clone(),
            ));
        }
        info!(workers, queue_capacity = config.queue_capacity, "replication engine started");
        engine
    }

    /// Queue `req` for its key's worker. Never blocks; returns `false` and
    /// logs when the queue is full.
    pub fn enqueue(&self, req: ReplRequest) -> bool {
        let shard = shard_for(&req.key, self.queues.len());
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.queues[shard].try_send(req) {
            Ok(()) => true,
            Err(TrySendError::Full(req)) | Err(TrySendError::Closed(req)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %String::from_utf8_lossy(&req.key),
                    dst = %req.dst,
                    "replication queue full, dropping request"
                );
                false
            }
        }
    }

    /// Wait until every queued request has been processed.
    pub async fn wait_idle(&self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the workers and cancel streams in flight.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Bring `req.dst` up to date with `req.src` for one key.
    ///
    /// Pulls the missing chain suffix when `dst` is local, pushes it when
    /// only `src` is local. Afterwards the destination's inode (and any
    /// block it lacks) reflects the operation at its chain tip. Returns the
    /// number of entries appended.
    #[instrument(skip_all, fields(key = %String::from_utf8_lossy(&req.key), src = %req.src, dst = %req.dst))]
    pub async fn replicate(&self, req: &ReplRequest) -> Result<u64, EngineError> {
        if let Some(dst) = self.transport.local(&req.dst.id) {
            self.pull(req, dst).await
        } else if let Some(src) = self.transport.local(&req.src.id) {
            self.push(req, src).await
        } else {
            Err(EngineError::Replication(
                "neither source nor destination is served here".into(),
            ))
        }
    }

    async fn pull(&self, req: &ReplRequest, dst: Arc<dyn LocalStore>) -> Result<u64, EngineError> {
        let key = req.key.as_slice();
        let seek = tip_hash(dst.as_ref(), key).await?;
        let outcome = self
            .transport
            .replicate_transactions(key, seek, &req.src, &req.dst, &self.cancel)
            .await?;
        if let Some(e) = outcome.last_error {
            return Err(EngineError::Replication(format!(
                "{} of {} entries applied: {e}",
                outcome.applied, outcome.items
            )));
        }

        let tip = match dst.last_tx(key).await {
            Ok(tip) => tip,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        match TxOp::decode(&tip.data)? {
            TxOp::Set(inode) => {
                for id in inode.block_ids() {
                    match dst.get_block(&id).await {
                        Ok(_) => continue,
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                    let data = single(
                        self.transport
                            .get_block(slice::from_ref(&req.src), &id)
                            .await,
                    )
                    .map_err(|e| missing_block(&id, e))?;
                    dst.set_block(data).await?;
                }
                dst.set_inode(inode).await?;
            }
            TxOp::Delete => ignore_not_found(dst.delete_inode(key).await.map(|_| ()))?,
        }
        Ok(outcome.applied)
    }

    async fn push(&self, req: &ReplRequest, src: Arc<dyn LocalStore>) -> Result<u64, EngineError> {
        let key = req.key.as_slice();
        let dst = slice::from_ref(&req.dst);

        let seek = match single(self.transport.last_tx(dst, key).await) {
            Ok(tx) => Some(tx.hash()),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(remote(e)),
        };

        let mut applied = 0u64;
        let mut last_error = None;
        for tx in src.transactions(key, seek).await? {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Replication("cancelled".into()));
            }
            match single(self.transport.append_tx(dst, &tx?).await) {
                Ok(()) => applied += 1,
                Err(e) => last_error = Some(e),
            }
        }
        if let Some(e) = last_error {
            return Err(EngineError::Replication(format!(
                "{applied} entries applied: {e}"
            )));
        }

        let tip = match src.last_tx(key).await {
            Ok(tip) => tip,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        match TxOp::decode(&tip.data)? {
            TxOp::Set(inode) => {
                for id in inode.block_ids() {
                    let data = src.get_block(&id).await?;
                    single(self.transport.set_block(dst, data).await).map_err(remote)?;
                }
                single(self.transport.store_inode(dst, &inode).await).map_err(remote)?;
            }
            TxOp::Delete => {
                match single(self.transport.remove_inode(dst, key).await) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(remote(e)),
                }
            }
        }
        Ok(applied)
    }

    /// Copy every block of the local vnode `src` to `dst`, then offer it
    /// every key so that `dst` catches up the ones it lacks.
    pub async fn bootstrap(&self, src: &Vnode, dst: &Vnode) -> Result<BootstrapReport, EngineError> {
        info!(%src, %dst, "bootstrapping vnode");
        let blocks = self
            .transport
            .replicate_blocks(src, dst, &self.cancel)
            .await?;
        let keys = self.transport.transfer_keys(src, dst, &self.cancel).await?;
        info!(
            %src,
            %dst,
            blocks = blocks.applied,
            keys = keys.items,
            "bootstrap finished"
        );
        Ok(BootstrapReport { blocks, keys })
    }

    /// Hand keys held by local vnodes to the vnodes that join their
    /// preference lists going from `old` to `new`. Returns the number of
    /// keys the destinations accepted.
    pub async fn rebalance(&self, old: &Ring, new: &Ring) -> Result<u64, EngineError> {
        let mut accepted = 0;
        for id in self.transport.local_vnodes() {
            let Some(store) = self.transport.local(&id) else {
                continue;
            };
            let keys = local_keys(store).await?;

            let mut moves: BTreeMap<VnodeId, (Vnode, Vnode, Vec<Vec<u8>>)> = BTreeMap::new();
            for h in Ring::handoffs(old, new, &keys) {
                if h.src.id != id {
                    continue;
                }
                moves
                    .entry(h.dst.id)
                    .or_insert_with(|| (h.src.clone(), h.dst.clone(), Vec::new()))
                    .2
                    .push(h.key);
            }

            for (src, dst, keys) in moves.into_values() {
                debug!(%src, %dst, count = keys.len(), "handing off keys");
                let outcome = self
                    .transport
                    .transfer_key_set(&src, &dst, keys, &self.cancel)
                    .await?;
                if let Some(e) = &outcome.last_error {
                    warn!(%src, %dst, %e, "handoff partially failed");
                }
                accepted += outcome.applied;
            }
        }
        Ok(accepted)
    }
}

async fn run_worker(
    index: usize,
    engine: Weak<ReplicationEngine>,
    mut rx: mpsc::Receiver<ReplRequest>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            r = rx.recv() => r,
            _ = cancel.cancelled() => break,
        };
        let Some(req) = next else { break };
        let Some(engine) = engine.upgrade() else { break };

        match engine.replicate(&req).await {
            Ok(applied) => {
                engine.completed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = index, dst = %req.dst, applied, "replica caught up");
            }
            Err(e) => {
                engine.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker = index,
                    key = %String::from_utf8_lossy(&req.key),
                    src = %req.src,
                    dst = %req.dst,
                    error = %e,
                    "replication failed, dropping request"
                );
            }
        }
        engine.pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = index, "replication worker stopped");
}

/// Worker index for `key`.
pub(crate) fn shard_for(key: &[u8], workers: usize) -> usize {
    let digest = Sha256::digest(key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(prefix) % workers as u64) as usize
}

async fn tip_hash(store: &dyn LocalStore, key: &[u8]) -> Result<Option<TxHash>, EngineError> {
    match store.last_tx(key).await {
        Ok(tip) => Ok(Some(tip.hash())),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn local_keys(store: Arc<dyn LocalStore>) -> Result<Vec<Vec<u8>>, EngineError> {
    let keys = tokio::task::spawn_blocking(move || {
        let mut keys = Vec::new();
        store.iter_inodes(&mut |inode| {
            keys.push(inode.id);
            Ok(())
        })?;
        Ok::<_, StoreError>(keys)
    })
    .await
    .map_err(|e| EngineError::Replication(format!("key scan panicked: {e}")))??;
    Ok(keys)
}

/// The only result of a single-vnode batch.
fn single<T>(mut out: Vec<VnodeResponse<T>>) -> Result<T, RemoteError> {
    match out.pop() {
        Some(r) => r.result,
        None => Err(RemoteError::new(RemoteErrorKind::Internal, "empty batch response")),
    }
}

fn remote(e: RemoteError) -> EngineError {
    EngineError::Net(e.into())
}

fn missing_block(id: &BlockId, e: RemoteError) -> EngineError {
    EngineError::Replication(format!("block {} unavailable on source: {e}", id.short()))
}

fn ignore_not_found(result: Result<(), StoreError>) -> Result<(), EngineError> {
    match result {
        Err(e) if !e.is_not_found() => Err(e.into()),
        _ => Ok(()),
    }
}
