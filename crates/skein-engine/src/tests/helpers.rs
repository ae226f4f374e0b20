//! Shared test utilities for skein-engine tests.

use std::sync::Arc;

use skein_net::{ConnPool, MemoryNetwork, NetTransport, RpcServer};
use skein_ring::{Ring, RingOracle, SharedRing};
use skein_store::{MemoryStore, VnodeStore};
use skein_txlog::Ed25519Signer;
use skein_types::{TxHash, Vnode};

use crate::consistent::{ConsistentStore, ConsistentStoreConfig};
use crate::replication::{ReplicationConfig, ReplicationEngine};

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// One simulated host.
pub struct TestNode {
    pub host: String,
    pub transport: Arc<NetTransport>,
    pub store: Arc<ConsistentStore>,
    pub engine: Arc<ReplicationEngine>,
    pub vnodes: Vec<(Vnode, Arc<MemoryStore>)>,
}

/// Hosts wired together over a [`MemoryNetwork`] and sharing one ring.
pub struct TestCluster {
    pub net: MemoryNetwork,
    pub ring: Arc<SharedRing>,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// `hosts` hosts named `h0..`, each owning `vnodes_per_host` vnodes.
    pub fn new(hosts: usize, vnodes_per_host: u16, replicas: usize) -> Self {
        let mut ring = Ring::new(vnodes_per_host, replicas);
        for i in 0..hosts {
            ring.add_host(&format!("h{i}"));
        }
        let mut cluster = Self {
            net: MemoryNetwork::new(),
            ring: Arc::new(SharedRing::new(ring)),
            nodes: Vec::new(),
        };
        for i in 0..hosts {
            cluster.start_node(&format!("h{i}"));
        }
        cluster
    }

    /// Start a host serving the vnodes the ring currently assigns it.
    pub fn start_node(&mut self, host: &str) -> &TestNode {
        let pool = Arc::new(ConnPool::new(Arc::new(self.net.dialer())));
        let transport = Arc::new(NetTransport::new(host, pool));

        let mut vnodes = Vec::new();
        for vn in self.ring.snapshot().vnodes_for(host) {
            let local = Arc::new(MemoryStore::new());
            transport.register(vn.id, local.clone());
            vnodes.push((vn, local));
        }

        let engine = ReplicationEngine::start(ReplicationConfig::default(), transport.clone());
        let ring: Arc<dyn RingOracle> = self.ring.clone();
        let store = Arc::new(ConsistentStore::new(
            ConsistentStoreConfig::default(),
            ring,
            transport.clone(),
            Arc::new(Ed25519Signer::from_bytes(&[7; 32])),
            engine.clone(),
        ));

        let server = Arc::new(RpcServer::new(transport.clone()));
        server.set_leader_service(store.clone());
        self.net.register(host, server);

        self.nodes.push(TestNode {
            host: host.to_string(),
            transport,
            store,
            engine,
            vnodes,
        });
        self.nodes.last().expect("just pushed")
    }

    pub fn node(&self, host: &str) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.host == host)
            .expect("unknown host")
    }

    /// Local store backing `vnode`.
    pub fn vnode_store(&self, vnode: &Vnode) -> Arc<MemoryStore> {
        self.nodes
            .iter()
            .flat_map(|n| n.vnodes.iter())
            .find(|(vn, _)| vn.id == vnode.id)
            .map(|(_, s)| s.clone())
            .expect("unknown vnode")
    }

    /// Wait until no host has replication work left.
    pub async fn wait_idle(&self) {
        // A finished catch-up can queue more work elsewhere; settle twice.
        for _ in 0..2 {
            for node in &self.nodes {
                node.engine.wait_idle().await;
            }
        }
    }

    /// Merkle root of `key` on `vnode`, `None` without a chain.
    pub async fn root(&self, vnode: &Vnode, key: &[u8]) -> Option<TxHash> {
        self.vnode_store(vnode).merkle_root_tx(key).await.ok()
    }

    /// A key whose leader is not on `host` and whose preference list spans
    /// at least two hosts.
    pub fn key_led_elsewhere(&self, host: &str) -> Vec<u8> {
        (0..1000)
            .map(|i| format!("key-{i}").into_bytes())
            .find(|k| {
                let list = self.ring.lookup(k);
                list[0].host != host && list.iter().any(|vn| vn.host != list[0].host)
            })
            .expect("no suitable key")
    }
}
