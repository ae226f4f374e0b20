//! Coordination and replication for skein.
//!
//! The [`ConsistentStore`] turns client operations on keys into leader
//! writes and replica reads over a [`NetTransport`](skein_net::NetTransport).
//! The [`ReplicationEngine`] reconciles replicas in the background and
//! bootstraps vnodes that join a key range.

pub mod consistent;
pub mod error;
pub mod op;
pub mod replication;

pub use consistent::{ConsistentStore, ConsistentStoreConfig};
pub use error::EngineError;
pub use op::TxOp;
pub use replication::{BootstrapReport, ReplicationConfig, ReplicationEngine, ReplicationStats};

#[cfg(test)]
mod tests;
