//! Chain validation and summarisation.

use sha2::{Digest, Sha256};
use skein_types::TxHash;

use crate::error::ChainError;
use crate::tx::Tx;

/// Check that `tx` may be appended to a chain whose current tip is `tip`.
///
/// On an empty chain only a genesis entry (zero prev hash, height 1) is
/// accepted. Otherwise `tx` must point at the tip's hash and sit exactly one
/// height above it.
pub fn check_append(tip: Option<&Tx>, tx: &Tx) -> Result<(), ChainError> {
    let (expected_prev, expected_height) = match tip {
        None => (TxHash::ZERO, 1),
        Some(tip) => {
            if tip.key != tx.key {
                return Err(ChainError::Key);
            }
            (tip.hash(), tip.height + 1)
        }
    };

    if tx.prev_hash != expected_prev {
        return Err(ChainError::PrevHash {
            expected: expected_prev,
            actual: tx.prev_hash,
        });
    }
    if tx.height != expected_height {
        return Err(ChainError::Height {
            expected: expected_height,
            actual: tx.height,
        });
    }
    Ok(())
}

/// Root of a binary SHA-256 Merkle tree over `hashes`, in order.
///
/// An odd node at any level is paired with itself. A single leaf is its own
/// root. An empty chain has root [`TxHash::ZERO`].
pub fn merkle_root(hashes: &[TxHash]) -> TxHash {
    if hashes.is_empty() {
        return TxHash::ZERO;
    }

    let mut level: Vec<[u8; 32]> = hashes.iter().map(|h| *h.as_bytes()).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }
    TxHash::from(level[0])
}
