//! In-memory vnode storage backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use bytes::Bytes;
use skein_txlog::{Tx, check_append, merkle_root};
use skein_types::{BlockId, Inode, TxHash};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{LocalStore, TxIter, VnodeStore};

/// One key's chain: entries in height order plus a hash index.
#[derive(Default)]
struct Chain {
    entries: Vec<Tx>,
    index: HashMap<TxHash, usize>,
}

impl Chain {
    /// Position after `seek`, or 0 for genesis.
    fn start_after(&self, seek: Option<TxHash>) -> Option<usize> {
        match seek {
            None => Some(0),
            Some(h) if h.is_zero() => Some(0),
            Some(h) => self.index.get(&h).map(|i| i + 1),
        }
    }
}

/// In-memory vnode store backed by `RwLock` maps.
///
/// Useful for testing and for nodes configured to run in memory-only mode.
#[derive(Default)]
pub struct MemoryStore {
    inodes: RwLock<BTreeMap<Vec<u8>, Inode>>,
    blocks: RwLock<BTreeMap<BlockId, Bytes>>,
    chains: RwLock<HashMap<Vec<u8>, Chain>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chain entries held for `key`.
    pub fn chain_len(&self, key: &[u8]) -> usize {
        self.chains
            .read()
            .expect("lock poisoned")
            .get(key)
            .map_or(0, |c| c.entries.len())
    }
}

#[async_trait::async_trait]
impl VnodeStore for MemoryStore {
    async fn get_inode(&self, key: &[u8]) -> Result<Inode, StoreError> {
        self.inodes
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::no_inode(key))
    }

    async fn set_inode(&self, inode: Inode) -> Result<(), StoreError> {
        debug!(key = %String::from_utf8_lossy(&inode.id), size = inode.size, "storing inode in memory");
        self.inodes
            .write()
            .expect("lock poisoned")
            .insert(inode.id.clone(), inode);
        Ok(())
    }

    async fn delete_inode(&self, key: &[u8]) -> Result<Inode, StoreError> {
        self.inodes
            .write()
            .expect("lock poisoned")
            .remove(key)
            .ok_or_else(|| StoreError::no_inode(key))
    }

    async fn get_block(&self, id: &BlockId) -> Result<Bytes, StoreError> {
        self.blocks
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("block {id}")))
    }

    async fn set_block(&self, data: Bytes) -> Result<BlockId, StoreError> {
        let id = BlockId::from_data(&data);
        debug!(%id, size = data.len(), "storing block in memory");
        self.blocks.write().expect("lock poisoned").insert(id, data);
        Ok(id)
    }

    async fn delete_block(&self, id: &BlockId) -> Result<(), StoreError> {
        self.blocks
            .write()
            .expect("lock poisoned")
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("block {id}")))
    }

    async fn append_tx(&self, tx: Tx) -> Result<(), StoreError> {
        let mut chains = self.chains.write().expect("lock poisoned");
        let chain = chains.entry(tx.key.clone()).or_default();
        if let Err(e) = check_append(chain.entries.last(), &tx) {
            if chain.entries.is_empty() {
                chains.remove(&tx.key);
            }
            return Err(StoreError::chain_mismatch(&tx.key, e));
        }
        debug!(key = %String::from_utf8_lossy(&tx.key), height = tx.height, "appending tx in memory");
        chain.index.insert(tx.hash(), chain.entries.len());
        chain.entries.push(tx);
        Ok(())
    }

    async fn last_tx(&self, key: &[u8]) -> Result<Tx, StoreError> {
        self.chains
            .read()
            .expect("lock poisoned")
            .get(key)
            .and_then(|c| c.entries.last().cloned())
            .ok_or_else(|| StoreError::no_chain(key))
    }

    async fn get_tx(&self, key: &[u8], hash: &TxHash) -> Result<Tx, StoreError> {
        let chains = self.chains.read().expect("lock poisoned");
        chains
            .get(key)
            .and_then(|c| c.index.get(hash).map(|&i| c.entries[i].clone()))
            .ok_or_else(|| StoreError::NotFound(format!("tx {hash}")))
    }

    async fn transactions(&self, key: &[u8], seek: Option<TxHash>) -> Result<TxIter, StoreError> {
        let chains = self.chains.read().expect("lock poisoned");
        let Some(chain) = chains.get(key) else {
            return match seek {
                Some(h) if !h.is_zero() => Err(StoreError::no_chain(key)),
                _ => Ok(Box::new(std::iter::empty())),
            };
        };
        let start = chain
            .start_after(seek)
            .ok_or_else(|| StoreError::NotFound(format!("seek tx {}", seek.unwrap_or(TxHash::ZERO))))?;
        let entries: Vec<Tx> = chain.entries[start..].to_vec();
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    async fn merkle_root_tx(&self, key: &[u8]) -> Result<TxHash, StoreError> {
        let chains = self.chains.read().expect("lock poisoned");
        let chain = chains.get(key).ok_or_else(|| StoreError::no_chain(key))?;
        let hashes: Vec<TxHash> = chain.entries.iter().map(Tx::hash).collect();
        Ok(merkle_root(&hashes))
    }
}

impl LocalStore for MemoryStore {
    fn iter_inodes(
        &self,
        visit: &mut dyn FnMut(Inode) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let snapshot: Vec<Inode> = self
            .inodes
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        snapshot.into_iter().try_for_each(|inode| visit(inode))
    }

    fn iter_blocks(
        &self,
        visit: &mut dyn FnMut(BlockId, Bytes) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let snapshot: Vec<(BlockId, Bytes)> = self
            .blocks
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(id, data)| (*id, data.clone()))
            .collect();
        snapshot.into_iter().try_for_each(|(id, data)| visit(id, data))
    }
}
