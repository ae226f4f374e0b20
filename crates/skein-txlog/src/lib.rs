//! Append-only, hash-chained, signed transaction log.
//!
//! Every mutation of a key is recorded as a [`Tx`] whose `prev_hash` points at
//! the hash of the previous entry for the same key. The first entry of a chain
//! (genesis) carries [`TxHash::ZERO`](skein_types::TxHash::ZERO) as its
//! previous hash and height 1.
//!
//! Entries are signed by their author over [`Tx::hash`]. Chain contiguity is
//! checked with [`check_append`] by whichever store accepts the entry, and a
//! whole chain can be summarised with [`merkle_root`] for cheap replica
//! comparison.

mod chain;
mod error;
mod signer;
mod tx;

#[cfg(test)]
mod tests;

pub use chain::{check_append, merkle_root};
pub use error::{ChainError, TxError};
pub use signer::{Ed25519Signer, Ed25519Verifier, Signer, Verifier};
pub use tx::Tx;
