//! Tests for the transaction log crate.


use crate::signer::Ed25519Signer;
use crate::tx::Tx;

/// Deterministic signer from a seed byte.
fn test_signer(seed: u8) -> Ed25519Signer {
    Ed25519Signer::from_bytes(&[seed; 32])
}

/// Build a signed chain of `len` entries for `key`.
fn signed_chain(key: &str, len: usize, signer: &Ed25519Signer) -> Vec<Tx> {
    let mut chain: Vec<Tx> = Vec::with_capacity(len);
    for i in 0..len {
        let data = format!("v{i}");
        let mut tx = match chain.last() {
            None => Tx::new(key, skein_types::TxHash::ZERO, data),
            Some(prev) => Tx::extend(prev, data),
        };
        tx.sign(signer).unwrap();
        chain.push(tx);
    }
    chain
}
