//! Integration test: client writes, reads and deletes across hosts.

use bytes::Bytes;
use skein_engine::EngineError;
use skein_integration_tests::{IntegrationCluster, test_data_seeded};
use skein_store::VnodeStore;
use skein_types::{Consistency, RequestOptions};

/// Set then get through a three-vnode preference list returns the data and
/// names the leader.
#[tokio::test]
async fn test_set_then_get_reports_leader() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let list = cluster.lookup(b"user:1");
    assert_eq!(list.len(), 3);

    let store = &cluster.host(0).store;
    let meta = store
        .set(b"user:1", Bytes::from_static(b"hello"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(meta.vnode, list[0]);

    let (data, meta) = store.get(b"user:1", RequestOptions::default()).await.unwrap();
    assert_eq!(data, Bytes::from_static(b"hello"));
    assert_eq!(meta.vnode, list[0]);
}

/// Delete then get fails with NotFound, from every host.
#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    cluster
        .host(1)
        .store
        .set(b"user:1", Bytes::from_static(b"hello"), RequestOptions::default())
        .await
        .unwrap();
    cluster
        .host(2)
        .store
        .delete(b"user:1", RequestOptions::default())
        .await
        .unwrap();
    cluster.wait_idle().await;

    for i in 0..cluster.len() {
        for consistency in [Consistency::Leader, Consistency::Lazy] {
            let err = cluster
                .host(i)
                .store
                .get(b"user:1", RequestOptions::with_consistency(consistency))
                .await
                .unwrap_err();
            assert!(
                matches!(err, EngineError::NotFound { .. }),
                "host {i} {consistency:?}: {err}"
            );
        }
    }
}

/// Large values are split into blocks that reach every replica.
#[tokio::test]
async fn test_block_backed_values_reach_all_replicas() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let data = test_data_seeded(200_000, 42);

    cluster
        .host(0)
        .store
        .set(
            b"large",
            Bytes::from(data.clone()),
            RequestOptions::with_consistency(Consistency::All),
        )
        .await
        .unwrap();

    for vn in cluster.lookup(b"large") {
        let store = cluster.vnode_store(&vn);
        let inode = store.get_inode(b"large").await.unwrap();
        assert!(!inode.inline);
        assert_eq!(inode.size, data.len() as u64);
        for id in inode.block_ids() {
            store.get_block(&id).await.unwrap();
        }
    }

    for i in 0..cluster.len() {
        let (got, _) = cluster
            .host(i)
            .store
            .get(b"large", RequestOptions::with_consistency(Consistency::Lazy))
            .await
            .unwrap();
        assert_eq!(got, data, "host {i}");
    }
}

/// Overwrites from different hosts all extend one chain on the leader.
#[tokio::test]
async fn test_overwrites_extend_one_chain() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    for i in 0..6u32 {
        let value = test_data_seeded(64, i);
        cluster
            .host(i as usize % cluster.len())
            .store
            .set(b"counter", Bytes::from(value), RequestOptions::default())
            .await
            .unwrap();
    }
    cluster.wait_idle().await;

    let list = cluster.lookup(b"counter");
    let leader = cluster.vnode_store(&list[0]);
    assert_eq!(leader.chain_len(b"counter"), 6);
    let tip = leader.last_tx(b"counter").await.unwrap();
    assert_eq!(tip.height, 6);

    let root = cluster.root(&list[0], b"counter").await.unwrap();
    for vn in &list[1..] {
        assert_eq!(cluster.root(vn, b"counter").await, Some(root), "{vn}");
    }

    let (got, _) = cluster
        .host(2)
        .store
        .get(b"counter", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(got, test_data_seeded(64, 5));
}
