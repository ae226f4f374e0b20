//! Key-to-vnode resolution.
//!
//! The storage layer only needs one capability from the ring: given a key,
//! return its ordered preference list of vnodes ([`RingOracle`]). This crate
//! defines that capability and a consistent hash [`Ring`] implementing it.
//!
//! Each host owns several virtual nodes placed at `blake3(host ++ index)`.
//! A key lands at the first 8 bytes of `sha256(key)` and its preference list
//! is the next `replicas` vnodes clockwise. Adjacent vnodes may belong to the
//! same host.

mod ring;

pub use ring::{Handoff, Ring, RingOracle, SharedRing};
