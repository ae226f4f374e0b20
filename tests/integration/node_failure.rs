//! Integration test: connection failures and pool eviction.

use bytes::Bytes;
use skein_integration_tests::IntegrationCluster;
use skein_types::{Consistency, RequestOptions};

/// A failed call evicts the pooled connection; the next call to the host
/// dials afresh and succeeds.
#[tokio::test]
async fn test_failed_connection_is_evicted_and_redialed() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let key = cluster.key_led_by(1, "evict");
    let leader_host = cluster.host(1).name.clone();
    let client = cluster.host(0);

    client
        .store
        .set(&key, Bytes::from_static(b"first"), RequestOptions::default())
        .await
        .unwrap();
    assert!(client.pool.contains(&leader_host).await);
    let dials = client.pool.dial_count();

    cluster.kill_host(1);
    let err = client
        .store
        .get(&key, RequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_unavailable(), "{err}");
    assert!(!client.pool.contains(&leader_host).await);

    cluster.revive_host(1);
    let (data, meta) = client
        .store
        .get(&key, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(data, Bytes::from_static(b"first"));
    assert_eq!(meta.vnode.host, leader_host);
    assert!(client.pool.contains(&leader_host).await);
    assert!(client.pool.dial_count() > dials);
}

/// A link dropped between calls is replaced transparently.
#[tokio::test]
async fn test_severed_link_is_replaced_on_next_call() {
    let cluster = IntegrationCluster::new(2, 4, 2);
    let key = cluster.key_led_by(1, "sever");
    let client = cluster.host(0);

    client
        .store
        .set(&key, Bytes::from_static(b"v1"), RequestOptions::default())
        .await
        .unwrap();
    let dials = client.pool.dial_count();

    cluster.sever_host(1);
    client
        .store
        .set(&key, Bytes::from_static(b"v2"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(client.pool.dial_count(), dials + 1);

    let (data, _) = client.store.get(&key, RequestOptions::default()).await.unwrap();
    assert_eq!(data, Bytes::from_static(b"v2"));
}

/// With the leader host down, fallback reads are served by a replica while
/// writes fail.
#[tokio::test]
async fn test_reads_fall_back_while_leader_is_down() {
    let cluster = IntegrationCluster::new(3, 4, 3);
    let key = cluster.key_led_by(2, "fallback");
    let client = cluster.host(0);

    client
        .store
        .set(
            &key,
            Bytes::from_static(b"kept"),
            RequestOptions::with_consistency(Consistency::All),
        )
        .await
        .unwrap();

    cluster.kill_host(2);

    let options = RequestOptions {
        consistency: Consistency::Leader,
        read_fallback: true,
    };
    let (data, meta) = client.store.get(&key, options).await.unwrap();
    assert_eq!(data, Bytes::from_static(b"kept"));
    assert_ne!(meta.vnode.host, cluster.host(2).name);

    let (data, _) = client
        .store
        .get(&key, RequestOptions::with_consistency(Consistency::Lazy))
        .await
        .unwrap();
    assert_eq!(data, Bytes::from_static(b"kept"));

    let err = client
        .store
        .delete(&key, RequestOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_unavailable(), "{err}");
}
