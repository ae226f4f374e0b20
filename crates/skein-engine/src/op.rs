//! Payload carried by every transaction the coordinator writes.

use serde::{Deserialize, Serialize};
use skein_types::Inode;

use crate::error::EngineError;

/// The mutation a transaction records. A replica rebuilds its inode for a
/// key from the operation at its chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOp {
    /// The key now maps to this inode.
    Set(Inode),
    /// The key was deleted.
    Delete,
}

impl TxOp {
    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, EngineError> {
        Ok(postcard::from_bytes(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            TxOp::decode(&[0xff, 0xff, 0xff]),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn test_set_carries_inode() {
        let op = TxOp::Set(Inode::from_data("k", b"hello"));
        let decoded = TxOp::decode(&op.encode().unwrap()).unwrap();
        assert_eq!(decoded, op);
    }
}
