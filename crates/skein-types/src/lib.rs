//! Shared types and identifiers for skein.
//!
//! This crate defines the core types used across the workspace:
//! identifiers ([`BlockId`], [`TxHash`], [`VnodeId`]), ring positions
//! ([`Vnode`], [`LeaderInfo`]), key metadata ([`Inode`]), and the per-request
//! knobs ([`RequestOptions`], [`Consistency`]) and replication work items
//! ([`ReplRequest`]) that flow between the coordinator and the replication engine.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; 32]);

            /// Create an ID by hashing arbitrary data with SHA-256.
            pub fn from_data(data: &[u8]) -> Self {
                Self(Sha256::digest(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Whether every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            /// First 8 hex characters, for log lines and response headers.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }

            /// Parse a 64-character hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Content-addressed identifier for a data block: `sha256(block_data)`.
    BlockId
);

define_id!(
    /// Hash of a transaction log entry. [`TxHash::ZERO`] marks chain genesis.
    TxHash
);

define_id!(
    /// Position of a vnode on the ring.
    VnodeId
);

// ---------------------------------------------------------------------------
// Ring positions
// ---------------------------------------------------------------------------

/// One ring position: an opaque identifier plus the address of the host that
/// serves it. A host may own several vnodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vnode {
    /// Ring position.
    pub id: VnodeId,
    /// Network address of the owning host (`<endpoint_id>[@<ip:port>]`).
    pub host: String,
}

impl Vnode {
    /// Create a vnode record.
    pub fn new(id: VnodeId, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
        }
    }

    /// Short identifier used in logs and the `Vnode` response header.
    pub fn short_id(&self) -> String {
        self.id.short()
    }
}

impl fmt::Display for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.id.short())
    }
}

/// Group vnodes by host, keeping preference order within each host.
///
/// Used to batch per-host RPCs: one request carries every vnode a host owns.
pub fn vnodes_by_host(vnodes: &[Vnode]) -> BTreeMap<String, Vec<Vnode>> {
    let mut map: BTreeMap<String, Vec<Vnode>> = BTreeMap::new();
    for vn in vnodes {
        map.entry(vn.host.clone()).or_default().push(vn.clone());
    }
    map
}

/// Result of resolving a key against the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderInfo {
    /// `list[0]` of the preference list; receives all writes.
    pub leader: Vnode,
    /// `list[1..]`, in preference order.
    pub replicas: Vec<Vnode>,
    /// `replicas` grouped by host.
    pub hosts: BTreeMap<String, Vec<Vnode>>,
}

impl LeaderInfo {
    /// Split an ordered preference list into leader and replicas.
    ///
    /// Returns `None` for an empty list.
    pub fn from_preference_list(mut list: Vec<Vnode>) -> Option<Self> {
        if list.is_empty() {
            return None;
        }
        let replicas = list.split_off(1);
        let leader = list.pop()?;
        let hosts = vnodes_by_host(&replicas);
        Some(Self {
            leader,
            replicas,
            hosts,
        })
    }

    /// The full preference list, leader first.
    pub fn preference_list(&self) -> Vec<Vnode> {
        let mut list = Vec::with_capacity(self.replicas.len() + 1);
        list.push(self.leader.clone());
        list.extend(self.replicas.iter().cloned());
        list
    }
}

// ---------------------------------------------------------------------------
// Inode
// ---------------------------------------------------------------------------

/// Metadata describing how a key's current data is composed from blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    /// The key.
    pub id: Vec<u8>,
    /// Total logical size of the referenced data in bytes.
    pub size: u64,
    /// When set, `blocks` holds the literal data rather than block hashes.
    pub inline: bool,
    /// Block hashes (32 bytes each), or the data chunks themselves when inline.
    pub blocks: Vec<Vec<u8>>,
}

impl Inode {
    /// Empty inode for a key.
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            size: 0,
            inline: false,
            blocks: Vec::new(),
        }
    }

    /// Inode referencing `data` as a single content-addressed block.
    pub fn from_data(key: impl Into<Vec<u8>>, data: &[u8]) -> Self {
        Self {
            id: key.into(),
            size: data.len() as u64,
            inline: false,
            blocks: vec![BlockId::from_data(data).as_bytes().to_vec()],
        }
    }

    /// Inode carrying `data` inline.
    pub fn inline(key: impl Into<Vec<u8>>, data: &[u8]) -> Self {
        Self {
            id: key.into(),
            size: data.len() as u64,
            inline: true,
            blocks: vec![data.to_vec()],
        }
    }

    /// Block references as typed ids. Empty for inline inodes; entries that
    /// are not 32 bytes long are skipped.
    pub fn block_ids(&self) -> Vec<BlockId> {
        if self.inline {
            return Vec::new();
        }
        self.blocks
            .iter()
            .filter_map(|b| <[u8; 32]>::try_from(b.as_slice()).ok())
            .map(BlockId::from)
            .collect()
    }

    /// Concatenated inline data, or `None` for block-backed inodes.
    pub fn inline_data(&self) -> Option<Vec<u8>> {
        self.inline.then(|| self.blocks.concat())
    }
}

// ---------------------------------------------------------------------------
// Request options and response metadata
// ---------------------------------------------------------------------------

/// Consistency level requested for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    /// Reads and writes go to the leader; replication is asynchronous.
    #[default]
    Leader,
    /// Reads may be served by any replica, preferring local ones.
    Lazy,
    /// Writes replicate synchronously to every replica before returning.
    All,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Requested consistency level.
    pub consistency: Consistency,
    /// Let reads fall back to replicas when the leader cannot be reached.
    pub read_fallback: bool,
}

impl RequestOptions {
    /// Options with the given consistency level.
    pub fn with_consistency(consistency: Consistency) -> Self {
        Self {
            consistency,
            ..Self::default()
        }
    }
}

/// Metadata returned alongside every client-facing result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Vnode that served the call.
    pub vnode: Vnode,
    /// Wall time spent in the call.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// A per-key replication work item: bring `dst` up to date with `src`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplRequest {
    /// Source of truth.
    pub src: Vnode,
    /// Vnode to catch up.
    pub dst: Vnode,
    /// Key to synchronize.
    pub key: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
