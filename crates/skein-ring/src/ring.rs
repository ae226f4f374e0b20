//! Consistent hashing ring implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use sha2::{Digest, Sha256};
use skein_types::{Vnode, VnodeId};
use tracing::debug;

/// Resolves a key to its ordered preference list.
///
/// `list[0]` is the leader; the rest are replicas in preference order.
pub trait RingOracle: Send + Sync {
    /// Preference list for `key`. Empty when the ring has no members.
    fn lookup(&self, key: &[u8]) -> Vec<Vnode>;
}

/// A key whose preference list gained a vnode between two ring states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    /// The key.
    pub key: Vec<u8>,
    /// Leader of the key in the old ring, which holds the data.
    pub src: Vnode,
    /// Vnode that newly appears in the key's preference list.
    pub dst: Vnode,
}

/// Consistent hashing ring of vnodes.
#[derive(Debug, Clone)]
pub struct Ring {
    /// Ring position -> vnode.
    vnodes: BTreeMap<u64, Vnode>,
    /// Host -> number of vnodes it owns.
    hosts: HashMap<String, u16>,
    /// Default vnode count for a new host.
    vnodes_per_host: u16,
    /// Length of each preference list.
    replicas: usize,
}

impl Ring {
    /// Create an empty ring.
    pub fn new(vnodes_per_host: u16, replicas: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            hosts: HashMap::new(),
            vnodes_per_host,
            replicas,
        }
    }

    /// Add a host with the default vnode count.
    pub fn add_host(&mut self, host: &str) {
        self.add_host_with_vnodes(host, self.vnodes_per_host);
    }

    /// Add a host owning `count` vnodes. Re-adding replaces the previous
    /// placement.
    pub fn add_host_with_vnodes(&mut self, host: &str, count: u16) {
        self.remove_host(host);
        for i in 0..count {
            let id = vnode_id(host, i);
            self.vnodes.insert(position(id.as_bytes()), Vnode::new(id, host));
        }
        self.hosts.insert(host.to_string(), count);
        debug!(host, vnodes = count, "added host to ring");
    }

    /// Remove a host and all its vnodes.
    pub fn remove_host(&mut self, host: &str) {
        if let Some(count) = self.hosts.remove(host) {
            for i in 0..count {
                self.vnodes.remove(&position(vnode_id(host, i).as_bytes()));
            }
            debug!(host, "removed host from ring");
        }
    }

    /// The vnodes owned by `host`, in index order.
    pub fn vnodes_for(&self, host: &str) -> Vec<Vnode> {
        let count = self.hosts.get(host).copied().unwrap_or(0);
        (0..count).map(|i| Vnode::new(vnode_id(host, i), host)).collect()
    }

    /// Preference list length.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Number of hosts on the ring.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Number of vnodes on the ring.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// Keys whose preference list gains a vnode going from `old` to `new`.
    ///
    /// Each result names the old leader as the data source. Keys with no
    /// members in the old ring are skipped.
    pub fn handoffs(old: &Ring, new: &Ring, keys: &[Vec<u8>]) -> Vec<Handoff> {
        let mut out = Vec::new();
        for key in keys {
            let before = old.lookup(key);
            let Some(src) = before.first() else {
                continue;
            };
            for vn in new.lookup(key) {
                if !before.contains(&vn) {
                    out.push(Handoff {
                        key: key.clone(),
                        src: src.clone(),
                        dst: vn,
                    });
                }
            }
        }
        out
    }
}

impl RingOracle for Ring {
    fn lookup(&self, key: &[u8]) -> Vec<Vnode> {
        let want = self.replicas.min(self.vnodes.len());
        let pos = key_position(key);
        self.vnodes
            .range(pos..)
            .chain(self.vnodes.range(..pos))
            .take(want)
            .map(|(_, vn)| vn.clone())
            .collect()
    }
}

/// A [`Ring`] that can be swapped while in use.
#[derive(Debug)]
pub struct SharedRing {
    inner: RwLock<Ring>,
}

impl SharedRing {
    /// Wrap a ring.
    pub fn new(ring: Ring) -> Self {
        Self {
            inner: RwLock::new(ring),
        }
    }

    /// Copy of the current ring.
    pub fn snapshot(&self) -> Ring {
        self.inner.read().expect("lock poisoned").clone()
    }

    /// Mutate the ring in place.
    pub fn update(&self, f: impl FnOnce(&mut Ring)) {
        f(&mut self.inner.write().expect("lock poisoned"));
    }
}

impl RingOracle for SharedRing {
    fn lookup(&self, key: &[u8]) -> Vec<Vnode> {
        self.inner.read().expect("lock poisoned").lookup(key)
    }
}

/// A vnode's identifier: `blake3(host ++ index)`.
fn vnode_id(host: &str, index: u16) -> VnodeId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(host.as_bytes());
    hasher.update(&index.to_le_bytes());
    VnodeId::from(*hasher.finalize().as_bytes())
}

/// Ring position of a 32-byte identifier: its first 8 bytes.
fn position(bytes: &[u8; 32]) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(head)
}

fn key_position(key: &[u8]) -> u64 {
    position(&Sha256::digest(key).into())
}
