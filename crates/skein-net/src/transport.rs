//! Uniform access to local and remote vnodes.
//!
//! [`NetTransport`] owns the registry of vnodes served by this process and
//! an [`RpcClient`] for everything else. Batched calls group the addressed
//! vnodes by host, answer local ones in-process and send one request per
//! remote host; every vnode gets its own result, so a failure on one host
//! or one vnode never hides the others.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use skein_store::{LocalStore, StoreError, VnodeStore};
use skein_txlog::{Ed25519Verifier, Tx, Verifier};
use skein_types::{BlockId, Inode, LeaderInfo, ReplRequest, RequestOptions, TxHash, Vnode, VnodeId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{RpcClient, RpcStream};
use crate::error::{NetError, RemoteError, RemoteErrorKind};
use crate::message::{RpcMessage, VnodeResponse};
use crate::pool::ConnPool;
use crate::remote::RemoteVnode;

/// Items buffered between a bulk traversal and the stream it feeds.
const STREAM_BUFFER: usize = 64;

/// Destination for replication work discovered by key transfers.
pub trait ReplSink: Send + Sync {
    /// Queue `req` without blocking. Returns `false` if it was dropped.
    fn enqueue(&self, req: ReplRequest) -> bool;
}

/// Fold of the per-item outcomes of a bulk protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Items received or sent.
    pub items: u64,
    /// Items applied without error.
    pub applied: u64,
    /// The last per-item failure.
    pub last_error: Option<RemoteError>,
}

impl StreamOutcome {
    fn record<T, E>(&mut self, result: Result<T, E>)
    where
        E: Into<RemoteError> + std::fmt::Display,
    {
        self.items += 1;
        match result {
            Ok(_) => self.applied += 1,
            Err(e) => {
                debug!(%e, "stream item failed");
                self.last_error = Some(e.into());
            }
        }
    }

    /// `Err` with the last per-item failure, if there was one.
    pub fn into_result(self) -> Result<Self, RemoteError> {
        match self.last_error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// Transport for vnode operations.
pub struct NetTransport {
    host: String,
    client: RpcClient,
    locals: Mutex<HashMap<VnodeId, Arc<dyn LocalStore>>>,
    sink: RwLock<Option<Arc<dyn ReplSink>>>,
    /// Checks every entry received from elsewhere before it is appended.
    verifier: Arc<dyn Verifier>,
}

impl NetTransport {
    /// Transport for the process reachable at `host`.
    pub fn new(host: impl Into<String>, pool: Arc<ConnPool>) -> Self {
        Self {
            host: host.into(),
            client: RpcClient::new(pool),
            locals: Mutex::new(HashMap::new()),
            sink: RwLock::new(None),
            verifier: Arc::new(Ed25519Verifier),
        }
    }

    /// This process's host address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The outbound connection pool.
    pub fn pool(&self) -> &Arc<ConnPool> {
        self.client.pool()
    }

    // -------------------------------------------------------------------
    // Local registry
    // -------------------------------------------------------------------

    /// Serve `id` from `store` in this process.
    pub fn register(&self, id: VnodeId, store: Arc<dyn LocalStore>) {
        debug!(vnode = %id.short(), "registered local vnode");
        self.locals.lock().expect("lock poisoned").insert(id, store);
    }

    /// Stop serving `id`.
    pub fn deregister(&self, id: &VnodeId) -> Option<Arc<dyn LocalStore>> {
        self.locals.lock().expect("lock poisoned").remove(id)
    }

    /// The local store for `id`, if registered.
    pub fn local(&self, id: &VnodeId) -> Option<Arc<dyn LocalStore>> {
        self.locals.lock().expect("lock poisoned").get(id).cloned()
    }

    /// Whether `vnode` is served by this process.
    pub fn is_local(&self, vnode: &Vnode) -> bool {
        self.locals
            .lock()
            .expect("lock poisoned")
            .contains_key(&vnode.id)
    }

    /// Ids of every locally registered vnode.
    pub fn local_vnodes(&self) -> Vec<VnodeId> {
        self.locals
            .lock()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Store handle for `vnode`: the local store if registered, otherwise a
    /// forwarding handle to its host.
    pub fn store_for(&self, vnode: &Vnode) -> Arc<dyn VnodeStore> {
        match self.local(&vnode.id) {
            Some(store) => store as Arc<dyn VnodeStore>,
            None => Arc::new(RemoteVnode::new(self.client.clone(), vnode.clone())),
        }
    }

    /// Route replication work discovered by incoming key transfers.
    pub fn set_repl_sink(&self, sink: Arc<dyn ReplSink>) {
        *self.sink.write().expect("lock poisoned") = Some(sink);
    }

    /// Reject `tx` unless its signature matches its `source`.
    pub fn check_signature(&self, tx: &Tx) -> Result<(), RemoteError> {
        check_signature(self.verifier.as_ref(), tx)
    }

    fn sink(&self) -> Option<Arc<dyn ReplSink>> {
        self.sink.read().expect("lock poisoned").clone()
    }

    // -------------------------------------------------------------------
    // Batched vnode calls
    // -------------------------------------------------------------------

    async fn batch<T, F, Fut, Q, U>(
        &self,
        vnodes: &[Vnode],
        local: F,
        request: Q,
        unpack: U,
    ) -> Vec<VnodeResponse<T>>
    where
        F: Fn(Arc<dyn LocalStore>) -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        Q: Fn(Vec<VnodeId>) -> RpcMessage + Send,
        U: Fn(RpcMessage) -> Option<Vec<VnodeResponse<T>>> + Send,
        T: Send,
    {
        let mut results: Vec<Option<Result<T, RemoteError>>> =
            vnodes.iter().map(|_| None).collect();
        let mut remote: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for (i, vn) in vnodes.iter().enumerate() {
            match self.local(&vn.id) {
                Some(store) => results[i] = Some(local(store).await.map_err(RemoteError::from)),
                None => remote.entry(vn.host.as_str()).or_default().push(i),
            }
        }

        for (host, slots) in remote {
            let ids: Vec<VnodeId> = slots.iter().map(|&i| vnodes[i].id).collect();
            let response = match self.client.call(host, request(ids)).await {
                Ok(msg) => {
                    let name = msg.name();
                    unpack(msg).ok_or_else(|| {
                        NetError::Protocol(format!("unexpected response {name}"))
                    })
                }
                Err(e) => Err(e),
            };
            match response {
                Ok(list) => {
                    let mut list = list.into_iter();
                    for &i in &slots {
                        results[i] = Some(match list.next() {
                            Some(r) if r.vnode == vnodes[i].id => r.result,
                            _ => Err(RemoteError::new(
                                RemoteErrorKind::Invalid,
                                "response does not match request",
                            )),
                        });
                    }
                }
                Err(e) => {
                    warn!(host, %e, "batched call failed");
                    let err = RemoteError::from(e);
                    for &i in &slots {
                        results[i] = Some(Err(err.clone()));
                    }
                }
            }
        }

        vnodes
            .iter()
            .zip(results)
            .map(|(vn, result)| VnodeResponse {
                vnode: vn.id,
                result: result.unwrap_or_else(|| {
                    Err(RemoteError::new(RemoteErrorKind::Internal, "no result"))
                }),
            })
            .collect()
    }

    /// Inode of `key` on each vnode.
    pub async fn stat(&self, vnodes: &[Vnode], key: &[u8]) -> Vec<VnodeResponse<Inode>> {
        self.batch(
            vnodes,
            |store| async move { store.get_inode(key).await },
            |ids| RpcMessage::Stat {
                key: key.to_vec(),
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::Inodes(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Block `id` from each vnode.
    pub async fn get_block(&self, vnodes: &[Vnode], id: &BlockId) -> Vec<VnodeResponse<Bytes>> {
        self.batch(
            vnodes,
            |store| async move { store.get_block(id).await },
            |ids| RpcMessage::GetBlock { id: *id, vnodes: ids },
            |msg| match msg {
                RpcMessage::Blocks(r) => Some(
                    r.into_iter()
                        .map(|r| VnodeResponse {
                            vnode: r.vnode,
                            result: r.result.map(Bytes::from),
                        })
                        .collect(),
                ),
                _ => None,
            },
        )
        .await
    }

    /// Store `data` on each vnode.
    pub async fn set_block(&self, vnodes: &[Vnode], data: Bytes) -> Vec<VnodeResponse<BlockId>> {
        let data = &data;
        self.batch(
            vnodes,
            |store| async move { store.set_block(data.clone()).await },
            |ids| RpcMessage::SetBlock {
                data: data.to_vec(),
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::BlockIds(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Delete block `id` from each vnode.
    pub async fn delete_block(&self, vnodes: &[Vnode], id: &BlockId) -> Vec<VnodeResponse<()>> {
        self.batch(
            vnodes,
            |store| async move { store.delete_block(id).await },
            |ids| RpcMessage::DeleteBlock { id: *id, vnodes: ids },
            |msg| match msg {
                RpcMessage::Acks(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Chain entry `hash` of `key` from each vnode.
    pub async fn get_tx(&self, vnodes: &[Vnode], key: &[u8], hash: &TxHash) -> Vec<VnodeResponse<Tx>> {
        self.batch(
            vnodes,
            |store| async move { store.get_tx(key, hash).await },
            |ids| RpcMessage::GetTx {
                key: key.to_vec(),
                hash: *hash,
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::Txs(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Chain tip of `key` on each vnode.
    pub async fn last_tx(&self, vnodes: &[Vnode], key: &[u8]) -> Vec<VnodeResponse<Tx>> {
        self.batch(
            vnodes,
            |store| async move { store.last_tx(key).await },
            |ids| RpcMessage::LastTx {
                key: key.to_vec(),
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::Txs(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Merkle root of `key`'s chain on each vnode.
    pub async fn merkle_root_tx(&self, vnodes: &[Vnode], key: &[u8]) -> Vec<VnodeResponse<TxHash>> {
        self.batch(
            vnodes,
            |store| async move { store.merkle_root_tx(key).await },
            |ids| RpcMessage::MerkleRootTx {
                key: key.to_vec(),
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::Hashes(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Append `tx` on each vnode. An entry with a bad signature is
    /// rejected for every vnode without being sent.
    pub async fn append_tx(&self, vnodes: &[Vnode], tx: &Tx) -> Vec<VnodeResponse<()>> {
        if let Err(e) = self.check_signature(tx) {
            return vnodes
                .iter()
                .map(|vn| VnodeResponse {
                    vnode: vn.id,
                    result: Err(e.clone()),
                })
                .collect();
        }
        self.batch(
            vnodes,
            |store| async move { store.append_tx(tx.clone()).await },
            |ids| RpcMessage::AppendTx {
                tx: tx.clone(),
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::Acks(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Store `inode` directly on each vnode, bypassing the leader path.
    pub async fn store_inode(&self, vnodes: &[Vnode], inode: &Inode) -> Vec<VnodeResponse<()>> {
        self.batch(
            vnodes,
            |store| async move { store.set_inode(inode.clone()).await },
            |ids| RpcMessage::StoreInode {
                inode: inode.clone(),
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::Acks(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    /// Remove `key`'s inode directly from each vnode.
    pub async fn remove_inode(&self, vnodes: &[Vnode], key: &[u8]) -> Vec<VnodeResponse<()>> {
        self.batch(
            vnodes,
            |store| async move { store.delete_inode(key).await.map(|_| ()) },
            |ids| RpcMessage::RemoveInode {
                key: key.to_vec(),
                vnodes: ids,
            },
            |msg| match msg {
                RpcMessage::Acks(r) => Some(r),
                _ => None,
            },
        )
        .await
    }

    // -------------------------------------------------------------------
    // Leader-routed calls
    // -------------------------------------------------------------------

    /// Ask `host` to run the leader-side write for `inode`.
    pub async fn set_inode(
        &self,
        host: &str,
        inode: Inode,
        options: RequestOptions,
    ) -> Result<Vnode, NetError> {
        match self
            .client
            .call(host, RpcMessage::SetInode { inode, options })
            .await?
        {
            RpcMessage::Leader(vn) => Ok(vn),
            other => Err(NetError::Protocol(format!(
                "expected Leader, got {}",
                other.name()
            ))),
        }
    }

    /// Ask `host` to run the leader-side delete for `inode`.
    pub async fn delete_inode(
        &self,
        host: &str,
        inode: Inode,
        options: RequestOptions,
    ) -> Result<Vnode, NetError> {
        match self
            .client
            .call(host, RpcMessage::DeleteInode { inode, options })
            .await?
        {
            RpcMessage::Leader(vn) => Ok(vn),
            other => Err(NetError::Protocol(format!(
                "expected Leader, got {}",
                other.name()
            ))),
        }
    }

    /// Resolve `key` on `host`. The host map is rebuilt locally from the
    /// flat list. `None` when the remote ring is empty.
    pub async fn lookup_leader(&self, host: &str, key: &[u8]) -> Result<Option<LeaderInfo>, NetError> {
        match self
            .client
            .call(host, RpcMessage::LookupLeader { key: key.to_vec() })
            .await?
        {
            RpcMessage::VnodeList(list) => Ok(LeaderInfo::from_preference_list(list)),
            other => Err(NetError::Protocol(format!(
                "expected VnodeList, got {}",
                other.name()
            ))),
        }
    }

    // -------------------------------------------------------------------
    // Transaction catch-up
    // -------------------------------------------------------------------

    /// Pull `key`'s entries after `seek` from `remote` and append them to
    /// the local vnode `local`, in order.
    ///
    /// Append failures do not stop the stream; the last one is reported in
    /// the outcome. Transport failures, and cancellation, end the call.
    pub async fn replicate_transactions(
        &self,
        key: &[u8],
        seek: Option<TxHash>,
        remote: &Vnode,
        local: &Vnode,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, NetError> {
        let dst = self.local(&local.id).ok_or(NetError::UnknownVnode(local.id))?;

        let outcome = match self.local(&remote.id) {
            Some(src) => {
                let mut outcome = StreamOutcome::default();
                for item in src.transactions(key, seek).await.map_err(RemoteError::from)? {
                    if cancel.is_cancelled() {
                        return Err(NetError::Cancelled);
                    }
                    let tx = item.map_err(RemoteError::from)?;
                    outcome.record(append_signed(self.verifier.as_ref(), dst.as_ref(), tx).await);
                }
                outcome
            }
            None => {
                let mut stream = self.client.open(&remote.host).await?;
                let result = tokio::select! {
                    r = pull_transactions(
                        &mut stream,
                        key,
                        seek,
                        remote.id,
                        dst.as_ref(),
                        self.verifier.as_ref(),
                    ) => r,
                    _ = cancel.cancelled() => Err(NetError::Cancelled),
                };
                self.client.settle(&mut stream, &result).await;
                result?
            }
        };

        info!(
            action = "replicate",
            entity = "transactions",
            key = %String::from_utf8_lossy(key),
            count = outcome.applied,
            src = %remote,
            dst = %local,
            "transaction catch-up finished"
        );
        Ok(outcome)
    }

    // -------------------------------------------------------------------
    // Key transfer
    // -------------------------------------------------------------------

    /// Offer every key held by the local vnode `src` to `dst`, with its
    /// Merkle root. `dst` queues replication for keys whose root differs.
    pub async fn transfer_keys(
        &self,
        src: &Vnode,
        dst: &Vnode,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, NetError> {
        let store = self.local(&src.id).ok_or(NetError::UnknownVnode(src.id))?;
        self.transfer(src, dst, inode_keys(store), cancel).await
    }

    /// Like [`transfer_keys`](Self::transfer_keys), for a chosen set of keys.
    pub async fn transfer_key_set(
        &self,
        src: &Vnode,
        dst: &Vnode,
        keys: Vec<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, NetError> {
        let (tx, rx) = mpsc::channel(keys.len().max(1));
        for key in keys {
            // Capacity covers every key.
            let _ = tx.try_send(Ok(key));
        }
        drop(tx);
        self.transfer(src, dst, rx, cancel).await
    }

    async fn transfer(
        &self,
        src: &Vnode,
        dst: &Vnode,
        mut keys: mpsc::Receiver<Result<Vec<u8>, StoreError>>,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, NetError> {
        let store = self.local(&src.id).ok_or(NetError::UnknownVnode(src.id))?;

        let outcome = if self.is_local(dst) {
            let mut outcome = StreamOutcome::default();
            loop {
                let next = tokio::select! {
                    k = keys.recv() => k,
                    _ = cancel.cancelled() => return Err(NetError::Cancelled),
                };
                let Some(key) = next else { break };
                let key = key.map_err(RemoteError::from)?;
                let Some(root) = key_root(store.as_ref(), &key).await? else {
                    continue;
                };
                outcome.items += 1;
                match self.accept_key_root(src, dst, key, root).await {
                    Ok(_) => outcome.applied += 1,
                    Err(e) => outcome.last_error = Some(e),
                }
            }
            outcome
        } else {
            let mut stream = self.client.open(&dst.host).await?;
            let result = tokio::select! {
                r = push_key_roots(&mut stream, store.as_ref(), src, dst, &mut keys) => r,
                _ = cancel.cancelled() => Err(NetError::Cancelled),
            };
            self.client.settle(&mut stream, &result).await;
            result?
        };

        info!(
            action = "transfer",
            entity = "keys",
            count = outcome.items,
            src = %src,
            dst = %dst,
            "key transfer finished"
        );
        Ok(outcome)
    }

    /// Compare an offered key root with the local vnode `dst` and queue a
    /// replication request when they differ. Returns whether one was queued.
    pub(crate) async fn accept_key_root(
        &self,
        src: &Vnode,
        dst: &Vnode,
        key: Vec<u8>,
        root: TxHash,
    ) -> Result<bool, RemoteError> {
        let store = self
            .local(&dst.id)
            .ok_or_else(|| RemoteError::unknown_vnode(dst.id))?;
        let local_root = match store.merkle_root_tx(&key).await {
            Ok(r) => Some(r),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if local_root == Some(root) {
            return Ok(false);
        }

        let sink = self.sink().ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::Internal, "no replication queue registered")
        })?;
        let req = ReplRequest {
            src: src.clone(),
            dst: dst.clone(),
            key,
        };
        if !sink.enqueue(req) {
            return Err(RemoteError::new(
                RemoteErrorKind::Unavailable,
                "replication queue full",
            ));
        }
        Ok(true)
    }

    // -------------------------------------------------------------------
    // Block replication
    // -------------------------------------------------------------------

    /// Stream every block of the local vnode `src` to `dst`, which stores
    /// each one. Per-block failures are reported as the last error.
    pub async fn replicate_blocks(
        &self,
        src: &Vnode,
        dst: &Vnode,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, NetError> {
        let store = self.local(&src.id).ok_or(NetError::UnknownVnode(src.id))?;
        let mut blocks = block_items(store);

        let outcome = match self.local(&dst.id) {
            Some(dst_store) => {
                let mut outcome = StreamOutcome::default();
                loop {
                    let next = tokio::select! {
                        b = blocks.recv() => b,
                        _ = cancel.cancelled() => return Err(NetError::Cancelled),
                    };
                    let Some(item) = next else { break };
                    let data = item.map_err(RemoteError::from)?;
                    outcome.record(dst_store.set_block(data).await);
                }
                outcome
            }
            None => {
                let mut stream = self.client.open(&dst.host).await?;
                let result = tokio::select! {
                    r = push_blocks(&mut stream, dst.id, &mut blocks) => r,
                    _ = cancel.cancelled() => Err(NetError::Cancelled),
                };
                self.client.settle(&mut stream, &result).await;
                result?
            }
        };

        info!(
            action = "replicate",
            entity = "blocks",
            count = outcome.items,
            src = %src,
            dst = %dst,
            "block replication finished"
        );
        Ok(outcome)
    }
}

fn check_signature(verifier: &dyn Verifier, tx: &Tx) -> Result<(), RemoteError> {
    tx.verify_signature(verifier).map_err(|e| {
        warn!(key = %String::from_utf8_lossy(&tx.key), height = tx.height, %e, "rejecting transaction");
        RemoteError::new(RemoteErrorKind::Invalid, format!("bad transaction signature: {e}"))
    })
}

/// Append `tx` to `store` once its signature checks out.
async fn append_signed(
    verifier: &dyn Verifier,
    store: &dyn LocalStore,
    tx: Tx,
) -> Result<(), RemoteError> {
    check_signature(verifier, &tx)?;
    store.append_tx(tx).await.map_err(RemoteError::from)
}

/// Merkle root of `key` on `store`; `None` for keys without a chain.
async fn key_root(store: &dyn LocalStore, key: &[u8]) -> Result<Option<TxHash>, NetError> {
    match store.merkle_root_tx(key).await {
        Ok(root) => Ok(Some(root)),
        Err(e) if e.is_not_found() => {
            debug!(key = %String::from_utf8_lossy(key), "skipping key without chain");
            Ok(None)
        }
        Err(e) => Err(RemoteError::from(e).into()),
    }
}

/// Keys of every inode on `store`, read on a blocking thread.
fn inode_keys(store: Arc<dyn LocalStore>) -> mpsc::Receiver<Result<Vec<u8>, StoreError>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::task::spawn_blocking(move || {
        let result = store.iter_inodes(&mut |inode| {
            tx.blocking_send(Ok(inode.id))
                .map_err(|_| StoreError::Storage("key transfer aborted".into()))
        });
        if let Err(e) = result {
            let _ = tx.blocking_send(Err(e));
        }
    });
    rx
}

/// Every block on `store`, read on a blocking thread.
fn block_items(store: Arc<dyn LocalStore>) -> mpsc::Receiver<Result<Bytes, StoreError>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::task::spawn_blocking(move || {
        let result = store.iter_blocks(&mut |_, data| {
            tx.blocking_send(Ok(data))
                .map_err(|_| StoreError::Storage("block replication aborted".into()))
        });
        if let Err(e) = result {
            let _ = tx.blocking_send(Err(e));
        }
    });
    rx
}

async fn pull_transactions(
    stream: &mut RpcStream,
    key: &[u8],
    seek: Option<TxHash>,
    vnode: VnodeId,
    dst: &dyn LocalStore,
    verifier: &dyn Verifier,
) -> Result<StreamOutcome, NetError> {
    stream
        .send(&RpcMessage::Transactions {
            key: key.to_vec(),
            seek,
            vnode,
        })
        .await?;
    stream.finish().await?;

    let mut outcome = StreamOutcome::default();
    loop {
        match stream.recv().await? {
            RpcMessage::TxItem(tx) => outcome.record(append_signed(verifier, dst, tx).await),
            RpcMessage::StreamEnd => return Ok(outcome),
            RpcMessage::Error(e) => return Err(NetError::Remote(e)),
            other => {
                return Err(NetError::Protocol(format!(
                    "expected TxItem, got {}",
                    other.name()
                )));
            }
        }
    }
}

async fn push_key_roots(
    stream: &mut RpcStream,
    store: &dyn LocalStore,
    src: &Vnode,
    dst: &Vnode,
    keys: &mut mpsc::Receiver<Result<Vec<u8>, StoreError>>,
) -> Result<StreamOutcome, NetError> {
    stream
        .send(&RpcMessage::TransferKeys {
            src: src.clone(),
            dst: dst.clone(),
        })
        .await?;

    let mut sent = 0u64;
    while let Some(key) = keys.recv().await {
        let key = key.map_err(RemoteError::from)?;
        let Some(root) = key_root(store, &key).await? else {
            continue;
        };
        stream.send(&RpcMessage::KeyRoot { key, root }).await?;
        sent += 1;
    }
    stream.send(&RpcMessage::StreamEnd).await?;
    stream.finish().await?;

    finish_upload(stream, sent).await
}

async fn push_blocks(
    stream: &mut RpcStream,
    dst: VnodeId,
    blocks: &mut mpsc::Receiver<Result<Bytes, StoreError>>,
) -> Result<StreamOutcome, NetError> {
    stream.send(&RpcMessage::ReplicateBlocks { dst }).await?;

    let mut sent = 0u64;
    while let Some(item) = blocks.recv().await {
        let data = item.map_err(RemoteError::from)?;
        stream.send(&RpcMessage::BlockItem(data.to_vec())).await?;
        sent += 1;
    }
    stream.send(&RpcMessage::StreamEnd).await?;
    stream.finish().await?;

    finish_upload(stream, sent).await
}

async fn finish_upload(stream: &mut RpcStream, sent: u64) -> Result<StreamOutcome, NetError> {
    match stream.recv().await? {
        RpcMessage::StreamAck {
            applied,
            last_error,
        } => Ok(StreamOutcome {
            items: sent,
            applied,
            last_error,
        }),
        RpcMessage::Error(e) => Err(NetError::Remote(e)),
        other => Err(NetError::Protocol(format!(
            "expected StreamAck, got {}",
            other.name()
        ))),
    }
}
