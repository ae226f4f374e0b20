//! Persistent vnode storage backed by Fjall.
//!
//! Keyspace layout:
//!
//! | keyspace | key | value |
//! |---|---|---|
//! | `inodes` | key | postcard `Inode` |
//! | `blocks` | block id | raw bytes |
//! | `txs` | `len(key) ‖ key ‖ height` | postcard `Tx` |
//! | `tx_index` | `len(key) ‖ key ‖ tx hash` | height |
//! | `tips` | key | height |
//!
//! Keys are length-prefixed in the chain keyspaces so that one key is never
//! a prefix of another key's range. Heights are big-endian so prefix scans
//! come back in chain order.

use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use skein_txlog::{Tx, check_append, merkle_root};
use skein_types::{BlockId, Inode, TxHash};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::traits::{LocalStore, TxIter, VnodeStore};

type Result<T> = std::result::Result<T, StoreError>;

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Fjall-backed vnode store.
pub struct FjallStore {
    db: Database,
    inodes: Keyspace,
    blocks: Keyspace,
    txs: Keyspace,
    tx_index: Keyspace,
    tips: Keyspace,
    /// Serializes appends so the tip check and the insert are atomic.
    append_lock: Mutex<()>,
}

impl FjallStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::builder(path).open().map_err(storage_err)?;
        info!(path = %path.display(), "opened fjall vnode store");
        Self::init(db)
    }

    /// Open a store that is removed when dropped.
    pub fn open_temporary(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path.as_ref())
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        let keyspace = |name: &str| {
            db.keyspace(name, KeyspaceCreateOptions::default)
                .map_err(storage_err)
        };
        Ok(Self {
            inodes: keyspace("inodes")?,
            blocks: keyspace("blocks")?,
            txs: keyspace("txs")?,
            tx_index: keyspace("tx_index")?,
            tips: keyspace("tips")?,
            append_lock: Mutex::new(()),
            db,
        })
    }

    fn tip_height(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.tips.get(key).map_err(storage_err)? {
            Some(v) => Ok(Some(decode_height(&v)?)),
            None => Ok(None),
        }
    }

    fn tx_at(&self, key: &[u8], height: u64) -> Result<Option<Tx>> {
        match self.txs.get(tx_key(key, height)).map_err(storage_err)? {
            Some(v) => Ok(Some(postcard::from_bytes(&v)?)),
            None => Ok(None),
        }
    }

    fn tip(&self, key: &[u8]) -> Result<Option<Tx>> {
        match self.tip_height(key)? {
            Some(h) => self.tx_at(key, h),
            None => Ok(None),
        }
    }

    fn chain(&self, key: &[u8]) -> Result<Vec<Tx>> {
        let mut out = Vec::new();
        for guard in self.txs.prefix(key_prefix(key)) {
            let v = guard.value().map_err(storage_err)?;
            out.push(postcard::from_bytes(&v)?);
        }
        Ok(out)
    }
}

fn key_prefix(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + key.len());
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key);
    out
}

fn tx_key(key: &[u8], height: u64) -> Vec<u8> {
    let mut out = key_prefix(key);
    out.extend_from_slice(&height.to_be_bytes());
    out
}

fn index_key(key: &[u8], hash: &TxHash) -> Vec<u8> {
    let mut out = key_prefix(key);
    out.extend_from_slice(hash.as_bytes());
    out
}

fn decode_height(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad height length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

#[async_trait::async_trait]
impl VnodeStore for FjallStore {
    async fn get_inode(&self, key: &[u8]) -> Result<Inode> {
        match self.inodes.get(key).map_err(storage_err)? {
            Some(v) => Ok(postcard::from_bytes(&v)?),
            None => Err(StoreError::no_inode(key)),
        }
    }

    async fn set_inode(&self, inode: Inode) -> Result<()> {
        let bytes = postcard::to_allocvec(&inode)?;
        debug!(key = %String::from_utf8_lossy(&inode.id), size = inode.size, "storing inode");
        self.inodes
            .insert(inode.id.as_slice(), bytes)
            .map_err(storage_err)
    }

    async fn delete_inode(&self, key: &[u8]) -> Result<Inode> {
        let inode = self.get_inode(key).await?;
        self.inodes.remove(key).map_err(storage_err)?;
        Ok(inode)
    }

    async fn get_block(&self, id: &BlockId) -> Result<Bytes> {
        match self.blocks.get(id.as_bytes()).map_err(storage_err)? {
            Some(v) => Ok(Bytes::copy_from_slice(&v)),
            None => Err(StoreError::NotFound(format!("block {id}"))),
        }
    }

    async fn set_block(&self, data: Bytes) -> Result<BlockId> {
        let id = BlockId::from_data(&data);
        debug!(%id, size = data.len(), "storing block");
        self.blocks
            .insert(id.as_bytes().as_slice(), data.as_ref())
            .map_err(storage_err)?;
        Ok(id)
    }

    async fn delete_block(&self, id: &BlockId) -> Result<()> {
        if self.blocks.get(id.as_bytes()).map_err(storage_err)?.is_none() {
            return Err(StoreError::NotFound(format!("block {id}")));
        }
        self.blocks.remove(id.as_bytes()).map_err(storage_err)
    }

    async fn append_tx(&self, tx: Tx) -> Result<()> {
        let _guard = self.append_lock.lock().expect("lock poisoned");
        let tip = self.tip(&tx.key)?;
        check_append(tip.as_ref(), &tx).map_err(|e| StoreError::chain_mismatch(&tx.key, e))?;

        let bytes = postcard::to_allocvec(&tx)?;
        let height = tx.height.to_be_bytes().to_vec();
        // Entry, index and tip land together or not at all.
        let mut batch = self.db.batch();
        batch.insert(&self.txs, tx_key(&tx.key, tx.height), bytes);
        batch.insert(&self.tx_index, index_key(&tx.key, &tx.hash()), height.clone());
        batch.insert(&self.tips, tx.key.as_slice(), height);
        batch.commit().map_err(storage_err)?;
        debug!(key = %String::from_utf8_lossy(&tx.key), height = tx.height, "appended tx");
        Ok(())
    }

    async fn last_tx(&self, key: &[u8]) -> Result<Tx> {
        self.tip(key)?.ok_or_else(|| StoreError::no_chain(key))
    }

    async fn get_tx(&self, key: &[u8], hash: &TxHash) -> Result<Tx> {
        let height = match self.tx_index.get(index_key(key, hash)).map_err(storage_err)? {
            Some(v) => decode_height(&v)?,
            None => return Err(StoreError::NotFound(format!("tx {hash}"))),
        };
        self.tx_at(key, height)?
            .ok_or_else(|| StoreError::NotFound(format!("tx {hash}")))
    }

    async fn transactions(&self, key: &[u8], seek: Option<TxHash>) -> Result<TxIter> {
        let start = match seek {
            Some(h) if !h.is_zero() => self.get_tx(key, &h).await?.height,
            _ => 0,
        };
        let Some(tip) = self.tip_height(key)? else {
            return Ok(Box::new(std::iter::empty()));
        };

        let mut entries = Vec::new();
        for height in start + 1..=tip {
            match self.tx_at(key, height)? {
                Some(tx) => entries.push(tx),
                None => return Err(StoreError::Storage(format!("chain gap at height {height}"))),
            }
        }
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    async fn merkle_root_tx(&self, key: &[u8]) -> Result<TxHash> {
        let Some(tip) = self.tip_height(key)? else {
            return Err(StoreError::no_chain(key));
        };
        let hashes: Vec<TxHash> = self
            .chain(key)?
            .into_iter()
            .filter(|tx| tx.height <= tip)
            .map(|tx| tx.hash())
            .collect();
        Ok(merkle_root(&hashes))
    }
}

impl LocalStore for FjallStore {
    fn iter_inodes(&self, visit: &mut dyn FnMut(Inode) -> Result<()>) -> Result<()> {
        for guard in self.inodes.iter() {
            let v = guard.value().map_err(storage_err)?;
            visit(postcard::from_bytes(&v)?)?;
        }
        Ok(())
    }

    fn iter_blocks(&self, visit: &mut dyn FnMut(BlockId, Bytes) -> Result<()>) -> Result<()> {
        for guard in self.blocks.iter() {
            let (k, v) = guard.into_inner().map_err(storage_err)?;
            let id: [u8; 32] = k
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Serialization(format!("bad block id length {}", k.len())))?;
            visit(BlockId::from(id), Bytes::copy_from_slice(&v))?;
        }
        Ok(())
    }
}
