//! [`VnodeStore`] handle for a vnode on another host.

use async_trait::async_trait;
use bytes::Bytes;
use skein_store::{StoreError, TxIter, VnodeStore};
use skein_txlog::Tx;
use skein_types::{BlockId, Inode, TxHash, Vnode};

use crate::client::{RpcClient, RpcStream};
use crate::error::NetError;
use crate::message::{RpcMessage, VnodeResponse};

/// Forwards every store call to the host owning `vnode`.
///
/// Each call is a single-vnode batch; a connection failure surfaces as
/// [`StoreError::Unavailable`].
pub struct RemoteVnode {
    client: RpcClient,
    vnode: Vnode,
}

impl RemoteVnode {
    pub fn new(client: RpcClient, vnode: Vnode) -> Self {
        Self { client, vnode }
    }

    pub fn vnode(&self) -> &Vnode {
        &self.vnode
    }

    async fn single<T: Send>(
        &self,
        request: RpcMessage,
        unpack: fn(RpcMessage) -> Option<Vec<VnodeResponse<T>>>,
    ) -> Result<T, StoreError> {
        let response = self.client.call(&self.vnode.host, request).await?;
        let name = response.name();
        let mut list = unpack(response)
            .ok_or_else(|| StoreError::Storage(format!("unexpected response {name}")))?;
        match list.pop() {
            Some(r) if r.vnode == self.vnode.id => Ok(r.result?),
            _ => Err(StoreError::Storage("response does not match request".into())),
        }
    }

    fn ids(&self) -> Vec<skein_types::VnodeId> {
        vec![self.vnode.id]
    }
}

async fn collect_transactions(
    stream: &mut RpcStream,
    request: &RpcMessage,
) -> Result<Vec<Tx>, NetError> {
    stream.send(request).await?;
    stream.finish().await?;
    let mut txs = Vec::new();
    loop {
        match stream.recv().await? {
            RpcMessage::TxItem(tx) => txs.push(tx),
            RpcMessage::StreamEnd => return Ok(txs),
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

#[async_trait]
impl VnodeStore for RemoteVnode {
    async fn get_inode(&self, key: &[u8]) -> Result<Inode, StoreError> {
        let request = RpcMessage::Stat {
            key: key.to_vec(),
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Inodes(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn set_inode(&self, inode: Inode) -> Result<(), StoreError> {
        let request = RpcMessage::StoreInode {
            inode,
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Acks(r) => Some(r),
            _ => None,
        })
        .await
    }

    /// Removes the inode remotely. The removed inode is not sent back, so
    /// it is fetched first.
    async fn delete_inode(&self, key: &[u8]) -> Result<Inode, StoreError> {
        let inode = self.get_inode(key).await?;
        let request = RpcMessage::RemoveInode {
            key: key.to_vec(),
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Acks(r) => Some(r),
            _ => None,
        })
        .await?;
        Ok(inode)
    }

    async fn get_block(&self, id: &BlockId) -> Result<Bytes, StoreError> {
        let request = RpcMessage::GetBlock {
            id: *id,
            vnodes: self.ids(),
        };
        let data = self
            .single(request, |m| match m {
                RpcMessage::Blocks(r) => Some(r),
                _ => None,
            })
            .await?;
        Ok(Bytes::from(data))
    }

    async fn set_block(&self, data: Bytes) -> Result<BlockId, StoreError> {
        let request = RpcMessage::SetBlock {
            data: data.to_vec(),
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::BlockIds(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn delete_block(&self, id: &BlockId) -> Result<(), StoreError> {
        let request = RpcMessage::DeleteBlock {
            id: *id,
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Acks(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn append_tx(&self, tx: Tx) -> Result<(), StoreError> {
        let request = RpcMessage::AppendTx {
            tx,
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Acks(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn last_tx(&self, key: &[u8]) -> Result<Tx, StoreError> {
        let request = RpcMessage::LastTx {
            key: key.to_vec(),
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Txs(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn get_tx(&self, key: &[u8], hash: &TxHash) -> Result<Tx, StoreError> {
        let request = RpcMessage::GetTx {
            key: key.to_vec(),
            hash: *hash,
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Txs(r) => Some(r),
            _ => None,
        })
        .await
    }

    /// Buffers the whole remaining chain before returning.
    async fn transactions(&self, key: &[u8], seek: Option<TxHash>) -> Result<TxIter, StoreError> {
        let request = RpcMessage::Transactions {
            key: key.to_vec(),
            seek,
            vnode: self.vnode.id,
        };
        let mut stream = self.client.open(&self.vnode.host).await?;
        let result = collect_transactions(&mut stream, &request).await;
        self.client.settle(&mut stream, &result).await;
        let txs = result?;
        Ok(Box::new(txs.into_iter().map(Ok)))
    }

    async fn merkle_root_tx(&self, key: &[u8]) -> Result<TxHash, StoreError> {
        let request = RpcMessage::MerkleRootTx {
            key: key.to_vec(),
            vnodes: self.ids(),
        };
        self.single(request, |m| match m {
            RpcMessage::Hashes(r) => Some(r),
            _ => None,
        })
        .await
    }
}
