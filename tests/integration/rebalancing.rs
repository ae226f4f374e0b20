//! Integration test: a vnode joining the ring is brought up to date.

use std::collections::BTreeMap;

use bytes::Bytes;
use skein_integration_tests::{IntegrationCluster, test_data_seeded};
use skein_ring::{Handoff, Ring, RingOracle};
use skein_types::{Consistency, RequestOptions, VnodeId};

/// Write `count` keys from host 0, replicated to every replica.
async fn populate(cluster: &IntegrationCluster, prefix: &str, count: u32) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    for i in 0..count {
        let key = format!("{prefix}-{i}").into_bytes();
        let size = if i % 3 == 0 { 4096 } else { 12 };
        cluster
            .host(0)
            .store
            .set(
                &key,
                Bytes::from(test_data_seeded(size, i)),
                RequestOptions::with_consistency(Consistency::All),
            )
            .await
            .unwrap();
        keys.push(key);
    }
    keys
}

/// A new vnode that becomes the third replica of some keys is bootstrapped
/// from their leader: block replication plus key transfer leaves it with
/// the same Merkle root as the source for every transferred key.
#[tokio::test]
async fn test_bootstrap_new_third_replica() {
    let mut cluster = IntegrationCluster::new(2, 4, 3);
    let keys = populate(&cluster, "boot", 60).await;

    let old = cluster.ring();
    let joined = cluster.add_host(1);
    let new = cluster.ring();
    let dst = cluster.host(joined).vnodes()[0].clone();

    let handoffs: Vec<Handoff> = Ring::handoffs(&old, &new, &keys);
    assert!(!handoffs.is_empty(), "new vnode owns no keys");
    assert!(handoffs.iter().all(|h| h.dst == dst));

    let mut sources: BTreeMap<VnodeId, _> = BTreeMap::new();
    for h in &handoffs {
        sources.entry(h.src.id).or_insert_with(|| h.src.clone());
    }

    for src in sources.values() {
        let owner = cluster.index_of(&src.host);
        let report = cluster
            .host(owner)
            .engine
            .bootstrap(src, &dst)
            .await
            .unwrap();
        assert_eq!(report.keys.items, cluster.keys_on(src).len() as u64);
        assert!(report.keys.last_error.is_none());
        assert!(report.blocks.last_error.is_none());
    }
    cluster.wait_idle().await;

    for src in sources.values() {
        for key in cluster.keys_on(src) {
            let expected = cluster.root(src, &key).await;
            assert!(expected.is_some());
            assert_eq!(
                cluster.root(&dst, &key).await,
                expected,
                "{} on {dst}",
                String::from_utf8_lossy(&key)
            );
        }
    }

    // The joined host serves the handed-off keys as their replica.
    for h in &handoffs {
        let (data, meta) = cluster
            .host(joined)
            .store
            .get(&h.key, RequestOptions::with_consistency(Consistency::Lazy))
            .await
            .unwrap();
        assert_eq!(meta.vnode, dst);
        let (expected, _) = cluster
            .host(0)
            .store
            .get(&h.key, RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(data, expected);
    }
}

/// Rebalancing after a host joins fills every new preference list member,
/// and the new leaders answer reads.
#[tokio::test]
async fn test_rebalance_after_host_joins() {
    let mut cluster = IntegrationCluster::new(2, 4, 2);
    let keys = populate(&cluster, "move", 40).await;

    let old = cluster.ring();
    cluster.add_host(4);
    let new = cluster.ring();

    let mut accepted = 0;
    for i in 0..2 {
        accepted += cluster.host(i).engine.rebalance(&old, &new).await.unwrap();
    }
    assert_eq!(accepted, Ring::handoffs(&old, &new, &keys).len() as u64);
    cluster.wait_idle().await;

    for key in &keys {
        let source = old.lookup(key)[0].clone();
        let expected = cluster.root(&source, key).await.unwrap();
        for vn in new.lookup(key) {
            assert_eq!(cluster.root(&vn, key).await, Some(expected), "{vn}");
        }
    }

    for (i, key) in keys.iter().enumerate() {
        let (data, meta) = cluster
            .host(2)
            .store
            .get(key, RequestOptions::default())
            .await
            .unwrap();
        let size = if i % 3 == 0 { 4096 } else { 12 };
        assert_eq!(data, test_data_seeded(size, i as u32));
        assert_eq!(meta.vnode, new.lookup(key)[0]);
    }
}
