//! Integration test: a replica that missed writes catches up from the
//! leader, and repeated catch-up changes nothing.

use bytes::Bytes;
use skein_integration_tests::{IntegrationCluster, test_data_seeded};
use skein_store::VnodeStore;
use skein_types::{ReplRequest, RequestOptions, Vnode};

/// Key led by host 0 plus one of its replicas on another host.
fn key_and_remote_replica(cluster: &IntegrationCluster) -> (Vec<u8>, Vnode, Vnode) {
    let key = cluster.key_led_by(0, "catch");
    let list = cluster.lookup(&key);
    let replica = list
        .iter()
        .find(|vn| vn.host != list[0].host)
        .cloned()
        .expect("replica on another host");
    (key, list[0].clone(), replica)
}

#[tokio::test]
async fn test_replica_pulls_missed_writes() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let (key, leader, replica) = key_and_remote_replica(&cluster);
    let replica_host = cluster.index_of(&replica.host);
    let writer = &cluster.host(0).store;

    writer
        .set(&key, Bytes::from_static(b"v0"), RequestOptions::default())
        .await
        .unwrap();
    cluster.wait_idle().await;
    assert_eq!(cluster.vnode_store(&replica).chain_len(&key), 1);

    cluster.kill_host(replica_host);
    for i in 1..4u32 {
        writer
            .set(
                &key,
                Bytes::from(test_data_seeded(2048, i)),
                RequestOptions::default(),
            )
            .await
            .unwrap();
    }
    cluster.wait_idle().await;
    assert!(cluster.host(0).engine.stats().failed > 0);
    assert_eq!(cluster.vnode_store(&replica).chain_len(&key), 1);

    cluster.revive_host(replica_host);
    let req = ReplRequest {
        src: leader.clone(),
        dst: replica.clone(),
        key: key.clone(),
    };
    let applied = cluster
        .host(replica_host)
        .engine
        .replicate(&req)
        .await
        .unwrap();
    assert_eq!(applied, 3);

    let root = cluster.root(&leader, &key).await.unwrap();
    assert_eq!(cluster.root(&replica, &key).await, Some(root));
    let store = cluster.vnode_store(&replica);
    let inode = store.get_inode(&key).await.unwrap();
    assert_eq!(inode.size, 2048);
    for id in inode.block_ids() {
        store.get_block(&id).await.unwrap();
    }
}

#[tokio::test]
async fn test_repeated_catch_up_is_a_no_op() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let (key, leader, replica) = key_and_remote_replica(&cluster);

    for i in 0..3u32 {
        cluster
            .host(0)
            .store
            .set(
                &key,
                Bytes::from(test_data_seeded(512, i)),
                RequestOptions::default(),
            )
            .await
            .unwrap();
    }
    cluster.wait_idle().await;
    let root = cluster.root(&replica, &key).await.unwrap();
    assert_eq!(cluster.root(&leader, &key).await, Some(root));

    let req = ReplRequest {
        src: leader.clone(),
        dst: replica.clone(),
        key: key.clone(),
    };
    let replica_host = cluster.index_of(&replica.host);
    for _ in 0..2 {
        // Pull from the replica's side, then push from the leader's.
        let pulled = cluster
            .host(replica_host)
            .engine
            .replicate(&req)
            .await
            .unwrap();
        let pushed = cluster.host(0).engine.replicate(&req).await.unwrap();
        assert_eq!((pulled, pushed), (0, 0));
    }

    assert_eq!(cluster.root(&replica, &key).await, Some(root));
    assert_eq!(cluster.vnode_store(&replica).chain_len(&key), 3);
}

/// Replicas that were reachable all along agree with the leader once the
/// queues drain.
#[tokio::test]
async fn test_async_replicas_converge() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let mut keys = Vec::new();
    for i in 0..24u32 {
        let key = format!("conv-{i}").into_bytes();
        cluster
            .host(i as usize % 3)
            .store
            .set(
                &key,
                Bytes::from(test_data_seeded(100 + i as usize * 50, i)),
                RequestOptions::default(),
            )
            .await
            .unwrap();
        keys.push(key);
    }
    cluster.wait_idle().await;

    for key in &keys {
        let list = cluster.lookup(key);
        let expected = cluster.root(&list[0], key).await.unwrap();
        for vn in &list[1..] {
            assert_eq!(cluster.root(vn, key).await, Some(expected), "{vn}");
        }
    }
    for i in 0..cluster.len() {
        assert_eq!(cluster.host(i).engine.stats().failed, 0);
    }
}
