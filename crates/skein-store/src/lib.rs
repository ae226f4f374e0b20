//! Vnode storage trait and backend implementations.
//!
//! This crate defines the [`VnodeStore`] trait, the storage surface of a
//! single ring position, and [`LocalStore`], which adds the bulk traversals
//! only an in-process store can offer. Two backends are provided:
//!
//! - [`MemoryStore`]: in-memory storage backed by `RwLock` maps.
//! - [`FjallStore`]: persistent storage in a Fjall LSM database.

mod error;
mod fjall_store;
mod memory_store;
mod traits;

#[cfg(test)]
mod tests;

pub use error::StoreError;
pub use fjall_store::FjallStore;
pub use memory_store::MemoryStore;
pub use traits::{LocalStore, TxIter, VnodeStore};
