//! Serving side of the RPC protocol.

use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use skein_store::{LocalStore, StoreError, VnodeStore};
use skein_types::{Inode, RequestOptions, TxHash, Vnode, VnodeId};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{NetError, RemoteError, RemoteErrorKind};
use crate::framing::{read_frame, write_frame};
use crate::link::{BoxReader, BoxWriter};
use crate::message::{RpcMessage, VnodeResponse};
use crate::transport::NetTransport;

/// Leader-side operations a host runs on behalf of its peers.
#[async_trait]
pub trait LeaderService: Send + Sync {
    /// Write `inode` as leader of its key.
    async fn set_inode(&self, inode: Inode, options: RequestOptions) -> Result<Vnode, RemoteError>;

    /// Delete the key of `inode` as its leader.
    async fn delete_inode(
        &self,
        inode: Inode,
        options: RequestOptions,
    ) -> Result<Vnode, RemoteError>;

    /// Flat preference list for `key`, leader first.
    fn lookup_leader(&self, key: &[u8]) -> Vec<Vnode>;
}

/// Answers incoming streams against the vnodes registered on a
/// [`NetTransport`].
pub struct RpcServer {
    transport: Arc<NetTransport>,
    leader: RwLock<Option<Arc<dyn LeaderService>>>,
}

impl RpcServer {
    pub fn new(transport: Arc<NetTransport>) -> Self {
        Self {
            transport,
            leader: RwLock::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<NetTransport> {
        &self.transport
    }

    /// Install the service answering leader-routed requests.
    pub fn set_leader_service(&self, service: Arc<dyn LeaderService>) {
        *self.leader.write().expect("lock poisoned") = Some(service);
    }

    fn leader_service(&self) -> Result<Arc<dyn LeaderService>, RemoteError> {
        self.leader
            .read()
            .expect("lock poisoned")
            .clone()
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::Unavailable, "no leader service"))
    }

    /// Serve one stream: read a request, answer it, close the send side.
    pub async fn serve_stream(
        &self,
        mut reader: BoxReader,
        mut writer: BoxWriter,
    ) -> Result<(), NetError> {
        let Some(request) = read_frame(&mut reader).await? else {
            return Ok(());
        };
        debug!(rpc = request.name(), "handling request");

        match request {
            RpcMessage::Transactions { key, seek, vnode } => {
                self.stream_transactions(&mut writer, &key, seek, vnode)
                    .await?;
            }
            RpcMessage::TransferKeys { src, dst } => {
                let ack = self.receive_key_roots(&mut reader, &src, &dst).await?;
                write_frame(&mut writer, &ack).await?;
            }
            RpcMessage::ReplicateBlocks { dst } => {
                let ack = self.receive_blocks(&mut reader, dst).await?;
                write_frame(&mut writer, &ack).await?;
            }
            other => {
                let response = self.handle(other).await;
                write_frame(&mut writer, &response).await?;
            }
        }

        writer.shutdown().await?;
        Ok(())
    }

    async fn each<T, F, Fut>(&self, ids: &[VnodeId], op: F) -> Vec<VnodeResponse<T>>
    where
        F: Fn(Arc<dyn LocalStore>) -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let result = match self.transport.local(id) {
                Some(store) => op(store).await.map_err(RemoteError::from),
                None => Err(RemoteError::unknown_vnode(*id)),
            };
            out.push(VnodeResponse { vnode: *id, result });
        }
        out
    }

    async fn handle(&self, request: RpcMessage) -> RpcMessage {
        match request {
            RpcMessage::Stat { key, vnodes } => {
                let key = &key;
                RpcMessage::Inodes(
                    self.each(&vnodes, |s| async move { s.get_inode(key).await })
                        .await,
                )
            }
            RpcMessage::GetBlock { id, vnodes } => {
                let id = &id;
                let blocks = self
                    .each(&vnodes, |s| async move { s.get_block(id).await })
                    .await;
                RpcMessage::Blocks(
                    blocks
                        .into_iter()
                        .map(|r| VnodeResponse {
                            vnode: r.vnode,
                            result: r.result.map(|b| b.to_vec()),
                        })
                        .collect(),
                )
            }
            RpcMessage::SetBlock { data, vnodes } => {
                let data = &Bytes::from(data);
                RpcMessage::BlockIds(
                    self.each(&vnodes, |s| async move { s.set_block(data.clone()).await })
                        .await,
                )
            }
            RpcMessage::DeleteBlock { id, vnodes } => {
                let id = &id;
                RpcMessage::Acks(
                    self.each(&vnodes, |s| async move { s.delete_block(id).await })
                        .await,
                )
            }
            RpcMessage::GetTx { key, hash, vnodes } => {
                let (key, hash) = (&key, &hash);
                RpcMessage::Txs(
                    self.each(&vnodes, |s| async move { s.get_tx(key, hash).await })
                        .await,
                )
            }
            RpcMessage::LastTx { key, vnodes } => {
                let key = &key;
                RpcMessage::Txs(
                    self.each(&vnodes, |s| async move { s.last_tx(key).await })
                        .await,
                )
            }
            RpcMessage::MerkleRootTx { key, vnodes } => {
                let key = &key;
                RpcMessage::Hashes(
                    self.each(&vnodes, |s| async move { s.merkle_root_tx(key).await })
                        .await,
                )
            }
            RpcMessage::AppendTx { tx, vnodes } => {
                if let Err(e) = self.transport.check_signature(&tx) {
                    return RpcMessage::Acks(
                        vnodes
                            .iter()
                            .map(|id| VnodeResponse {
                                vnode: *id,
                                result: Err(e.clone()),
                            })
                            .collect(),
                    );
                }
                let tx = &tx;
                RpcMessage::Acks(
                    self.each(&vnodes, |s| async move { s.append_tx(tx.clone()).await })
                        .await,
                )
            }
            RpcMessage::StoreInode { inode, vnodes } => {
                let inode = &inode;
                RpcMessage::Acks(
                    self.each(&vnodes, |s| async move { s.set_inode(inode.clone()).await })
                        .await,
                )
            }
            RpcMessage::RemoveInode { key, vnodes } => {
                let key = &key;
                RpcMessage::Acks(
                    self.each(&vnodes, |s| async move {
                        s.delete_inode(key).await.map(|_| ())
                    })
                    .await,
                )
            }
            RpcMessage::SetInode { inode, options } => {
                match self.leader_service() {
                    Ok(svc) => match svc.set_inode(inode, options).await {
                        Ok(vn) => RpcMessage::Leader(vn),
                        Err(e) => RpcMessage::Error(e),
                    },
                    Err(e) => RpcMessage::Error(e),
                }
            }
            RpcMessage::DeleteInode { inode, options } => {
                match self.leader_service() {
                    Ok(svc) => match svc.delete_inode(inode, options).await {
                        Ok(vn) => RpcMessage::Leader(vn),
                        Err(e) => RpcMessage::Error(e),
                    },
                    Err(e) => RpcMessage::Error(e),
                }
            }
            RpcMessage::LookupLeader { key } => match self.leader_service() {
                Ok(svc) => RpcMessage::VnodeList(svc.lookup_leader(&key)),
                Err(e) => RpcMessage::Error(e),
            },
            other => {
                warn!(rpc = other.name(), "unexpected request");
                RpcMessage::Error(RemoteError::new(
                    RemoteErrorKind::Invalid,
                    format!("{} is not a request", other.name()),
                ))
            }
        }
    }

    async fn stream_transactions(
        &self,
        writer: &mut BoxWriter,
        key: &[u8],
        seek: Option<TxHash>,
        vnode: VnodeId,
    ) -> Result<(), NetError> {
        let Some(store) = self.transport.local(&vnode) else {
            return write_frame(writer, &RpcMessage::Error(RemoteError::unknown_vnode(vnode))).await;
        };
        let iter = match store.transactions(key, seek).await {
            Ok(iter) => iter,
            Err(e) => return write_frame(writer, &RpcMessage::Error(e.into())).await,
        };

        let mut sent = 0u64;
        for item in iter {
            match item {
                Ok(tx) => {
                    write_frame(writer, &RpcMessage::TxItem(tx)).await?;
                    sent += 1;
                }
                Err(e) => return write_frame(writer, &RpcMessage::Error(e.into())).await,
            }
        }
        debug!(key = %String::from_utf8_lossy(key), count = sent, "streamed transactions");
        write_frame(writer, &RpcMessage::StreamEnd).await
    }

    async fn receive_key_roots(
        &self,
        reader: &mut BoxReader,
        src: &Vnode,
        dst: &Vnode,
    ) -> Result<RpcMessage, NetError> {
        let mut items = 0u64;
        let mut applied = 0u64;
        let mut last_error = None;

        loop {
            match read_frame(reader).await? {
                Some(RpcMessage::KeyRoot { key, root }) => {
                    items += 1;
                    match self.transport.accept_key_root(src, dst, key, root).await {
                        Ok(_) => applied += 1,
                        Err(e) => last_error = Some(e),
                    }
                }
                Some(RpcMessage::StreamEnd) | None => break,
                Some(other) => {
                    return Ok(RpcMessage::Error(RemoteError::new(
                        RemoteErrorKind::Invalid,
                        format!("expected KeyRoot, got {}", other.name()),
                    )));
                }
            }
        }

        info!(
            action = "receive",
            entity = "keys",
            count = items,
            applied,
            src = %src,
            dst = %dst,
            "key transfer received"
        );
        Ok(RpcMessage::StreamAck {
            applied,
            last_error,
        })
    }

    async fn receive_blocks(
        &self,
        reader: &mut BoxReader,
        dst: VnodeId,
    ) -> Result<RpcMessage, NetError> {
        let store = self.transport.local(&dst);
        let mut items = 0u64;
        let mut applied = 0u64;
        let mut last_error = None;

        loop {
            match read_frame(reader).await? {
                Some(RpcMessage::BlockItem(data)) => {
                    items += 1;
                    let result = match &store {
                        Some(s) => s.set_block(Bytes::from(data)).await.map_err(RemoteError::from),
                        None => Err(RemoteError::unknown_vnode(dst)),
                    };
                    match result {
                        Ok(_) => applied += 1,
                        Err(e) => last_error = Some(e),
                    }
                }
                Some(RpcMessage::StreamEnd) | None => break,
                Some(other) => {
                    return Ok(RpcMessage::Error(RemoteError::new(
                        RemoteErrorKind::Invalid,
                        format!("expected BlockItem, got {}", other.name()),
                    )));
                }
            }
        }

        info!(
            action = "receive",
            entity = "blocks",
            count = items,
            applied,
            dst = %dst.short(),
            "block replication received"
        );
        Ok(RpcMessage::StreamAck {
            applied,
            last_error,
        })
    }
}
