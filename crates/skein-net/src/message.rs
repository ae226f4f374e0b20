//! Wire protocol messages.
//!
//! Every RPC runs on its own bidirectional stream. The caller writes a
//! request frame, optionally followed by stream items and [`RpcMessage::StreamEnd`];
//! the server answers with a response frame, or with items then `StreamEnd`
//! for server-streamed calls.

use serde::{Deserialize, Serialize};
use skein_txlog::Tx;
use skein_types::{BlockId, Inode, RequestOptions, TxHash, Vnode, VnodeId};

use crate::error::RemoteError;

/// The result of one vnode's part of a batched call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnodeResponse<T> {
    /// Vnode the result belongs to.
    pub vnode: VnodeId,
    /// Its independent outcome.
    pub result: Result<T, RemoteError>,
}

/// All messages exchanged between hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcMessage {
    // --- Batched vnode requests (one entry per vnode in the response) ---
    /// Fetch a key's inode.
    Stat { key: Vec<u8>, vnodes: Vec<VnodeId> },
    /// Fetch a block.
    GetBlock { id: BlockId, vnodes: Vec<VnodeId> },
    /// Store a block.
    SetBlock { data: Vec<u8>, vnodes: Vec<VnodeId> },
    /// Delete a block.
    DeleteBlock { id: BlockId, vnodes: Vec<VnodeId> },
    /// Fetch one chain entry.
    GetTx {
        key: Vec<u8>,
        hash: TxHash,
        vnodes: Vec<VnodeId>,
    },
    /// Fetch a chain tip.
    LastTx { key: Vec<u8>, vnodes: Vec<VnodeId> },
    /// Merkle root of a chain.
    MerkleRootTx { key: Vec<u8>, vnodes: Vec<VnodeId> },
    /// Append a chain entry.
    AppendTx { tx: Tx, vnodes: Vec<VnodeId> },
    /// Store an inode on specific vnodes, bypassing the leader path.
    StoreInode { inode: Inode, vnodes: Vec<VnodeId> },
    /// Remove an inode from specific vnodes, bypassing the leader path.
    RemoveInode { key: Vec<u8>, vnodes: Vec<VnodeId> },

    // --- Leader-routed requests ---
    /// Run the leader-side write for an inode on the receiving host.
    SetInode {
        inode: Inode,
        options: RequestOptions,
    },
    /// Run the leader-side delete for an inode on the receiving host.
    DeleteInode {
        inode: Inode,
        options: RequestOptions,
    },
    /// Resolve a key's preference list on the receiving host.
    LookupLeader { key: Vec<u8> },

    // --- Streaming requests ---
    /// Stream chain entries after `seek` from `vnode`.
    Transactions {
        key: Vec<u8>,
        seek: Option<TxHash>,
        vnode: VnodeId,
    },
    /// Header of a key transfer; followed by [`RpcMessage::KeyRoot`] items.
    TransferKeys { src: Vnode, dst: Vnode },
    /// Header of a block upload; followed by [`RpcMessage::BlockItem`]s.
    ReplicateBlocks { dst: VnodeId },

    // --- Responses ---
    /// Per-vnode inodes.
    Inodes(Vec<VnodeResponse<Inode>>),
    /// Per-vnode block data.
    Blocks(Vec<VnodeResponse<Vec<u8>>>),
    /// Per-vnode block ids.
    BlockIds(Vec<VnodeResponse<BlockId>>),
    /// Per-vnode chain entries.
    Txs(Vec<VnodeResponse<Tx>>),
    /// Per-vnode hashes.
    Hashes(Vec<VnodeResponse<TxHash>>),
    /// Per-vnode acknowledgements.
    Acks(Vec<VnodeResponse<()>>),
    /// Leader that executed a routed write.
    Leader(Vnode),
    /// Flat preference list, leader first.
    VnodeList(Vec<Vnode>),
    /// End of an upload: the number of items applied and the last
    /// per-item error, if any.
    StreamAck {
        applied: u64,
        last_error: Option<RemoteError>,
    },
    /// The request as a whole failed.
    Error(RemoteError),

    // --- Stream items ---
    /// One chain entry.
    TxItem(Tx),
    /// One key and the Merkle root of its chain on the source.
    KeyRoot { key: Vec<u8>, root: TxHash },
    /// One raw block.
    BlockItem(Vec<u8>),
    /// No more items.
    StreamEnd,
}

impl RpcMessage {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stat { .. } => "Stat",
            Self::GetBlock { .. } => "GetBlock",
            Self::SetBlock { .. } => "SetBlock",
            Self::DeleteBlock { .. } => "DeleteBlock",
            Self::GetTx { .. } => "GetTx",
            Self::LastTx { .. } => "LastTx",
            Self::MerkleRootTx { .. } => "MerkleRootTx",
            Self::AppendTx { .. } => "AppendTx",
            Self::StoreInode { .. } => "StoreInode",
            Self::RemoveInode { .. } => "RemoveInode",
            Self::SetInode { .. } => "SetInode",
            Self::DeleteInode { .. } => "DeleteInode",
            Self::LookupLeader { .. } => "LookupLeader",
            Self::Transactions { .. } => "Transactions",
            Self::TransferKeys { .. } => "TransferKeys",
            Self::ReplicateBlocks { .. } => "ReplicateBlocks",
            Self::Inodes(_) => "Inodes",
            Self::Blocks(_) => "Blocks",
            Self::BlockIds(_) => "BlockIds",
            Self::Txs(_) => "Txs",
            Self::Hashes(_) => "Hashes",
            Self::Acks(_) => "Acks",
            Self::Leader(_) => "Leader",
            Self::VnodeList(_) => "VnodeList",
            Self::StreamAck { .. } => "StreamAck",
            Self::Error(_) => "Error",
            Self::TxItem(_) => "TxItem",
            Self::KeyRoot { .. } => "KeyRoot",
            Self::BlockItem(_) => "BlockItem",
            Self::StreamEnd => "StreamEnd",
        }
    }
}
