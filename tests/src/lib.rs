//! Shared test harness for skein integration tests.
//!
//! Provides [`IntegrationCluster`]: N hosts, each with its own transport,
//! vnode stores, replication engine and coordinator, wired together over an
//! in-process [`MemoryNetwork`]. Every remote call goes through the real
//! framing, RPC server and connection pool; only the socket is simulated.

use std::sync::Arc;

use skein_engine::{
    ConsistentStore, ConsistentStoreConfig, ReplicationConfig, ReplicationEngine,
};
use skein_net::{ConnPool, MemoryNetwork, NetTransport, RpcServer};
use skein_ring::{Ring, RingOracle, SharedRing};
use skein_store::{LocalStore, MemoryStore, VnodeStore};
use skein_txlog::Ed25519Signer;
use skein_types::{TxHash, Vnode};

/// Generate deterministic test data from a seed.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// One simulated host.
pub struct Host {
    pub name: String,
    pub pool: Arc<ConnPool>,
    pub transport: Arc<NetTransport>,
    pub engine: Arc<ReplicationEngine>,
    pub store: Arc<ConsistentStore>,
    vnodes: Vec<(Vnode, Arc<MemoryStore>)>,
}

impl Host {
    /// Vnodes served by this host.
    pub fn vnodes(&self) -> Vec<Vnode> {
        self.vnodes.iter().map(|(vn, _)| vn.clone()).collect()
    }
}

/// A simulated cluster sharing one ring.
pub struct IntegrationCluster {
    net: MemoryNetwork,
    ring: Arc<SharedRing>,
    hosts: Vec<Host>,
}

impl IntegrationCluster {
    /// `n` hosts named `host-0..`, `vnodes` ring positions each, preference
    /// lists of `replicas` vnodes.
    pub fn new(n: usize, vnodes: u16, replicas: usize) -> Self {
        let mut ring = Ring::new(vnodes, replicas);
        for i in 0..n {
            ring.add_host(&host_name(i));
        }
        let mut cluster = Self {
            net: MemoryNetwork::new(),
            ring: Arc::new(SharedRing::new(ring)),
            hosts: Vec::with_capacity(n),
        };
        for i in 0..n {
            cluster.start_host(&host_name(i));
        }
        cluster
    }

    fn start_host(&mut self, name: &str) -> usize {
        let pool = Arc::new(ConnPool::new(Arc::new(self.net.dialer())));
        let transport = Arc::new(NetTransport::new(name, pool.clone()));

        let mut vnodes = Vec::new();
        for vn in self.ring.snapshot().vnodes_for(name) {
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
            Arc::new(Ed25519Signer::from_bytes(&[self.hosts.len() as u8 + 1; 32])),
            engine.clone(),
        ));

        let server = Arc::new(RpcServer::new(transport.clone()));
        server.set_leader_service(store.clone());
        self.net.register(name, server);

        self.hosts.push(Host {
            name: name.to_string(),
            pool,
            transport,
            engine,
            store,
            vnodes,
        });
        self.hosts.len() - 1
    }

    /// Host `i`.
    pub fn host(&self, i: usize) -> &Host {
        &self.hosts[i]
    }

    /// Index of the host named `name`.
    pub fn index_of(&self, name: &str) -> usize {
        self.hosts
            .iter()
            .position(|h| h.name == name)
            .expect("unknown host")
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Current preference list of `key`.
    pub fn lookup(&self, key: &[u8]) -> Vec<Vnode> {
        self.ring.lookup(key)
    }

    /// Snapshot of the current ring.
    pub fn ring(&self) -> Ring {
        self.ring.snapshot()
    }

    /// Add a host with `vnodes` ring positions and start it. Returns its
    /// index. Existing data is not moved.
    pub fn add_host(&mut self, vnodes: u16) -> usize {
        let name = host_name(self.hosts.len());
        self.ring.update(|r| r.add_host_with_vnodes(&name, vnodes));
        self.start_host(&name)
    }

    /// Store backing `vnode`, wherever it lives.
    pub fn vnode_store(&self, vnode: &Vnode) -> Arc<MemoryStore> {
        self.hosts
            .iter()
            .flat_map(|h| h.vnodes.iter())
            .find(|(vn, _)| vn.id == vnode.id)
            .map(|(_, s)| s.clone())
            .expect("unknown vnode")
    }

    /// Merkle root of `key` on `vnode`; `None` without a chain.
    pub async fn root(&self, vnode: &Vnode, key: &[u8]) -> Option<TxHash> {
        self.vnode_store(vnode).merkle_root_tx(key).await.ok()
    }

    /// Keys with a live inode on `vnode`.
    pub fn keys_on(&self, vnode: &Vnode) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        self.vnode_store(vnode)
            .iter_inodes(&mut |inode| {
                keys.push(inode.id);
                Ok(())
            })
            .expect("memory store scan");
        keys
    }

    /// Make host `i` unreachable and drop every connection to it.
    pub fn kill_host(&self, i: usize) {
        let name = &self.hosts[i].name;
        self.net.set_reachable(name, false);
        self.net.sever(name);
    }

    /// Make host `i` reachable again.
    pub fn revive_host(&self, i: usize) {
        self.net.set_reachable(&self.hosts[i].name, true);
    }

    /// Drop live connections to host `i` without making it unreachable.
    pub fn sever_host(&self, i: usize) {
        self.net.sever(&self.hosts[i].name);
    }

    /// Wait until no host has queued replication work.
    pub async fn wait_idle(&self) {
        for _ in 0..2 {
            for host in &self.hosts {
                host.engine.wait_idle().await;
            }
        }
    }

    /// A key whose leader is on host `leader` and whose preference list
    /// also has a vnode on another host.
    pub fn key_led_by(&self, leader: usize, prefix: &str) -> Vec<u8> {
        let name = &self.hosts[leader].name;
        (0..10_000)
            .map(|i| format!("{prefix}-{i}").into_bytes())
            .find(|k| {
                let list = self.ring.lookup(k);
                &list[0].host == name && list.iter().any(|vn| &vn.host != name)
            })
            .expect("no key led by host")
    }
}

fn host_name(i: usize) -> String {
    format!("host-{i}")
}
