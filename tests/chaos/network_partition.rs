//! Chaos test: one host is cut off while writes continue, then rejoins and
//! is reconciled by a rebalance from a ring that excludes it.

use bytes::Bytes;
use skein_integration_tests::{IntegrationCluster, test_data_seeded};
use skein_ring::RingOracle;
use skein_store::VnodeStore;
use skein_types::RequestOptions;

#[tokio::test]
async fn test_partitioned_host_is_reconciled_after_heal() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let isolated = cluster.host(2).name.clone();
    cluster.kill_host(2);

    let mut written = Vec::new();
    let mut rejected = Vec::new();
    for i in 0..30u32 {
        let key = format!("part-{i}").into_bytes();
        let result = cluster
            .host(i as usize % 2)
            .store
            .set(
                &key,
                Bytes::from(test_data_seeded(64 + i as usize * 40, i)),
                RequestOptions::default(),
            )
            .await;
        let leader = cluster.lookup(&key)[0].clone();
        match result {
            Ok(meta) => {
                assert_ne!(meta.vnode.host, isolated);
                written.push(key);
            }
            Err(e) => {
                assert!(e.is_unavailable(), "{e}");
                assert_eq!(leader.host, isolated);
                rejected.push(key);
            }
        }
    }
    cluster.wait_idle().await;
    assert!(!rejected.is_empty(), "no key led by the isolated host");

    let missed: Vec<_> = written
        .iter()
        .filter(|k| cluster.lookup(k).iter().any(|vn| vn.host == isolated))
        .collect();
    assert!(!missed.is_empty(), "isolated host replicates no written key");
    let failed: u64 = (0..2).map(|i| cluster.host(i).engine.stats().failed).sum();
    assert!(failed >= missed.len() as u64);

    cluster.revive_host(2);

    let current = cluster.ring();
    let mut without = current.clone();
    without.remove_host(&isolated);
    for i in 0..2 {
        cluster
            .host(i)
            .engine
            .rebalance(&without, &current)
            .await
            .unwrap();
    }
    cluster.wait_idle().await;

    for key in &written {
        let list = current.lookup(key);
        let expected = cluster.root(&list[0], key).await.unwrap();
        for vn in &list[1..] {
            assert_eq!(
                cluster.root(vn, key).await,
                Some(expected),
                "{} on {vn}",
                String::from_utf8_lossy(key)
            );
        }
    }

    // Keys rejected during the partition can be written now.
    for key in &rejected {
        let meta = cluster
            .host(0)
            .store
            .set(key, Bytes::from_static(b"healed"), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(meta.vnode.host, isolated);
    }
}

/// Links severed repeatedly mid-workload never corrupt a chain.
#[tokio::test]
async fn test_flapping_links_keep_chains_consistent() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let key = cluster.key_led_by(1, "flap");

    let mut last = None;
    for round in 0..10u32 {
        if round % 3 == 0 {
            cluster.sever_host(1);
        }
        let value = test_data_seeded(300, round);
        match cluster
            .host(0)
            .store
            .set(&key, Bytes::from(value.clone()), RequestOptions::default())
            .await
        {
            Ok(_) => last = Some(value),
            Err(e) => assert!(e.is_unavailable(), "{e}"),
        }
    }
    cluster.wait_idle().await;

    let last = last.expect("at least one write landed");
    let (data, _) = cluster
        .host(2)
        .store
        .get(&key, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(data, last);

    let list = cluster.lookup(&key);
    let leader = cluster.vnode_store(&list[0]);
    let tip = leader.last_tx(&key).await.unwrap();
    assert_eq!(tip.height, leader.chain_len(&key) as u64);
}
