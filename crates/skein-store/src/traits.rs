//! Core traits for vnode storage.

use bytes::Bytes;
use skein_txlog::Tx;
use skein_types::{BlockId, Inode, TxHash};

use crate::error::StoreError;

/// Ordered, finite, non-restartable sequence of chain entries.
pub type TxIter = Box<dyn Iterator<Item = Result<Tx, StoreError>> + Send>;

/// The storage surface of one ring position.
///
/// Implemented by in-process stores and by RPC-forwarding remote handles, so
/// callers address a vnode the same way wherever it lives. All operations
/// are safe to retry after a transient I/O failure.
#[async_trait::async_trait]
pub trait VnodeStore: Send + Sync {
    /// Fetch the inode for `key`.
    async fn get_inode(&self, key: &[u8]) -> Result<Inode, StoreError>;

    /// Store `inode`, replacing any previous inode for the same key.
    async fn set_inode(&self, inode: Inode) -> Result<(), StoreError>;

    /// Remove and return the inode for `key`.
    async fn delete_inode(&self, key: &[u8]) -> Result<Inode, StoreError>;

    /// Fetch a block by content hash.
    async fn get_block(&self, id: &BlockId) -> Result<Bytes, StoreError>;

    /// Store a block, returning its content hash.
    async fn set_block(&self, data: Bytes) -> Result<BlockId, StoreError>;

    /// Remove a block.
    async fn delete_block(&self, id: &BlockId) -> Result<(), StoreError>;

    /// Append `tx` to its key's chain.
    ///
    /// Fails with [`StoreError::ChainMismatch`] unless `tx` extends the
    /// current tip; the chain is left unmodified in that case.
    async fn append_tx(&self, tx: Tx) -> Result<(), StoreError>;

    /// The tip of `key`'s chain.
    async fn last_tx(&self, key: &[u8]) -> Result<Tx, StoreError>;

    /// A specific entry of `key`'s chain.
    async fn get_tx(&self, key: &[u8], hash: &TxHash) -> Result<Tx, StoreError>;

    /// Entries strictly after `seek`, or from genesis when `seek` is `None`
    /// or the zero hash. Fails with `NotFound` if `seek` is not in the chain.
    async fn transactions(&self, key: &[u8], seek: Option<TxHash>) -> Result<TxIter, StoreError>;

    /// Merkle root over the ordered entry hashes of `key`'s chain.
    async fn merkle_root_tx(&self, key: &[u8]) -> Result<TxHash, StoreError>;
}

/// A store living in this process.
///
/// Adds ordered bulk traversals used by replication. A visitor error aborts
/// the traversal and is returned as-is.
pub trait LocalStore: VnodeStore {
    /// Visit every inode in key order.
    fn iter_inodes(
        &self,
        visit: &mut dyn FnMut(Inode) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    /// Visit every block in id order.
    fn iter_blocks(
        &self,
        visit: &mut dyn FnMut(BlockId, Bytes) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}
