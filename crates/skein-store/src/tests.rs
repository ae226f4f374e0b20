//! Behaviour shared by every backend, run against both.

use bytes::Bytes;
use skein_txlog::{Ed25519Signer, Tx};
use skein_types::{BlockId, Inode, TxHash};

use crate::error::StoreError;
use crate::fjall_store::FjallStore;
use crate::memory_store::MemoryStore;
use crate::traits::{LocalStore, VnodeStore};

fn signed_chain(key: &str, len: usize) -> Vec<Tx> {
    let signer = Ed25519Signer::from_bytes(&[9; 32]);
    let mut chain: Vec<Tx> = Vec::new();
    for i in 0..len {
        let mut tx = match chain.last() {
            None => Tx::new(key, TxHash::ZERO, format!("v{i}")),
            Some(prev) => Tx::extend(prev, format!("v{i}")),
        };
        tx.sign(&signer).unwrap();
        chain.push(tx);
    }
    chain
}

async fn append_all(store: &dyn LocalStore, chain: &[Tx]) {
    for tx in chain {
        store.append_tx(tx.clone()).await.unwrap();
    }
}

async fn check_inode_crud(store: &dyn LocalStore) {
    assert!(store.get_inode(b"k").await.unwrap_err().is_not_found());

    let inode = Inode::from_data("k", b"hello");
    store.set_inode(inode.clone()).await.unwrap();
    assert_eq!(store.get_inode(b"k").await.unwrap(), inode);

    let replaced = Inode::inline("k", b"bye");
    store.set_inode(replaced.clone()).await.unwrap();
    assert_eq!(store.get_inode(b"k").await.unwrap(), replaced);

    assert_eq!(store.delete_inode(b"k").await.unwrap(), replaced);
    assert!(store.get_inode(b"k").await.unwrap_err().is_not_found());
    assert!(store.delete_inode(b"k").await.unwrap_err().is_not_found());
}

async fn check_block_crud(store: &dyn LocalStore) {
    let id = store.set_block(Bytes::from_static(b"hello")).await.unwrap();
    assert_eq!(id, BlockId::from_data(b"hello"));
    assert_eq!(store.get_block(&id).await.unwrap(), Bytes::from_static(b"hello"));

    // Same content, same id.
    assert_eq!(store.set_block(Bytes::from_static(b"hello")).await.unwrap(), id);

    store.delete_block(&id).await.unwrap();
    assert!(store.get_block(&id).await.unwrap_err().is_not_found());
    assert!(store.delete_block(&id).await.unwrap_err().is_not_found());
}

async fn check_chain_append(store: &dyn LocalStore) {
    let chain = signed_chain("k", 4);
    append_all(store, &chain).await;

    assert_eq!(store.last_tx(b"k").await.unwrap(), chain[3]);
    assert_eq!(store.get_tx(b"k", &chain[1].hash()).await.unwrap(), chain[1]);
    assert!(store
        .get_tx(b"k", &TxHash::from_data(b"nope"))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store.last_tx(b"missing").await.unwrap_err().is_not_found());
}

async fn check_mismatch_leaves_chain_unmodified(store: &dyn LocalStore) {
    let chain = signed_chain("k", 3);
    append_all(store, &chain[..2]).await;
    let root = store.merkle_root_tx(b"k").await.unwrap();

    // Skips an entry.
    let mut skip = Tx::extend(&chain[2], "gap");
    skip.height = 4;
    let err = store.append_tx(skip).await.unwrap_err();
    assert!(matches!(err, StoreError::ChainMismatch { .. }), "{err}");

    // Re-appends an existing entry.
    let err = store.append_tx(chain[1].clone()).await.unwrap_err();
    assert!(matches!(err, StoreError::ChainMismatch { .. }), "{err}");

    // Second genesis.
    let err = store
        .append_tx(Tx::new("k", TxHash::ZERO, "fork"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ChainMismatch { .. }), "{err}");

    assert_eq!(store.last_tx(b"k").await.unwrap(), chain[1]);
    assert_eq!(store.merkle_root_tx(b"k").await.unwrap(), root);
}

async fn check_transactions_seek(store: &dyn LocalStore) {
    let chain = signed_chain("k", 5);
    append_all(store, &chain).await;

    let all: Vec<Tx> = store
        .transactions(b"k", None)
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(all, chain);

    let from_zero: Vec<Tx> = store
        .transactions(b"k", Some(TxHash::ZERO))
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(from_zero, chain);

    let after_second: Vec<Tx> = store
        .transactions(b"k", Some(chain[1].hash()))
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(after_second, chain[2..].to_vec());

    let after_tip = store
        .transactions(b"k", Some(chain[4].hash()))
        .await
        .unwrap()
        .count();
    assert_eq!(after_tip, 0);

    let unknown = store
        .transactions(b"k", Some(TxHash::from_data(b"nope")))
        .await;
    assert!(matches!(unknown, Err(e) if e.is_not_found()));

    let empty = store.transactions(b"missing", None).await.unwrap().count();
    assert_eq!(empty, 0);
}

async fn check_merkle_root_tracks_chain(a: &dyn LocalStore, b: &dyn LocalStore) {
    let chain = signed_chain("k", 3);
    append_all(a, &chain).await;
    append_all(b, &chain[..2]).await;

    assert!(a.merkle_root_tx(b"missing").await.unwrap_err().is_not_found());
    assert_ne!(
        a.merkle_root_tx(b"k").await.unwrap(),
        b.merkle_root_tx(b"k").await.unwrap()
    );
    b.append_tx(chain[2].clone()).await.unwrap();
    assert_eq!(
        a.merkle_root_tx(b"k").await.unwrap(),
        b.merkle_root_tx(b"k").await.unwrap()
    );
}

async fn check_iteration_order(store: &dyn LocalStore) {
    for key in ["c", "a", "b"] {
        store
            .set_inode(Inode::from_data(key, key.as_bytes()))
            .await
            .unwrap();
        store
            .set_block(Bytes::copy_from_slice(key.as_bytes()))
            .await
            .unwrap();
    }

    let mut keys = Vec::new();
    store
        .iter_inodes(&mut |inode| {
            keys.push(inode.id);
            Ok(())
        })
        .unwrap();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    let mut ids = Vec::new();
    store
        .iter_blocks(&mut |id, data| {
            assert_eq!(id, BlockId::from_data(&data));
            ids.push(id);
            Ok(())
        })
        .unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

async fn check_visitor_error_aborts(store: &dyn LocalStore) {
    for key in ["a", "b", "c"] {
        store
            .set_inode(Inode::from_data(key, key.as_bytes()))
            .await
            .unwrap();
    }
    let mut seen = 0;
    let err = store
        .iter_inodes(&mut |_| {
            seen += 1;
            Err(StoreError::Storage("stop".into()))
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Storage(m) if m == "stop"));
    assert_eq!(seen, 1);
}

macro_rules! backend_tests {
    ($modname:ident, $make:expr) => {
        mod $modname {
            use super::*;

            #[tokio::test]
            async fn test_inode_crud() {
                let (_dir, store) = $make;
                check_inode_crud(&store).await;
            }

            #[tokio::test]
            async fn test_block_crud() {
                let (_dir, store) = $make;
                check_block_crud(&store).await;
            }

            #[tokio::test]
            async fn test_chain_append() {
                let (_dir, store) = $make;
                check_chain_append(&store).await;
            }

            #[tokio::test]
            async fn test_mismatch_leaves_chain_unmodified() {
                let (_dir, store) = $make;
                check_mismatch_leaves_chain_unmodified(&store).await;
            }

            #[tokio::test]
            async fn test_transactions_seek() {
                let (_dir, store) = $make;
                check_transactions_seek(&store).await;
            }

            #[tokio::test]
            async fn test_merkle_root_tracks_chain() {
                let (_dir_a, a) = $make;
                let (_dir_b, b) = $make;
                check_merkle_root_tracks_chain(&a, &b).await;
            }

            #[tokio::test]
            async fn test_iteration_order() {
                let (_dir, store) = $make;
                check_iteration_order(&store).await;
            }

            #[tokio::test]
            async fn test_visitor_error_aborts() {
                let (_dir, store) = $make;
                check_visitor_error_aborts(&store).await;
            }
        }
    };
}

backend_tests!(memory, ((), MemoryStore::new()));

backend_tests!(fjall, {
    let dir = tempfile::tempdir().unwrap();
    let store = FjallStore::open(dir.path()).unwrap();
    (dir, store)
});

#[tokio::test]
async fn test_concurrent_appends_keep_chain_linear() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let chain = signed_chain("k", 2);
    store.append_tx(chain[0].clone()).await.unwrap();

    // Two competing extensions of the same tip: exactly one wins.
    let signer = Ed25519Signer::from_bytes(&[3; 32]);
    let mut other = Tx::extend(&chain[0], "other");
    other.sign(&signer).unwrap();

    let (a, b) = tokio::join!(
        {
            let store = store.clone();
            let tx = chain[1].clone();
            async move { store.append_tx(tx).await }
        },
        {
            let store = store.clone();
            async move { store.append_tx(other).await }
        }
    );
    assert!(a.is_ok() ^ b.is_ok());
    assert_eq!(store.chain_len(b"k"), 2);
}
