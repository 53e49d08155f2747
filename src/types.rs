//! Core data model: hashes, outpoints, transactions, blocks

use serde::{Deserialize, Serialize};
use std::fmt;

/// 256-bit hash, stored in internal (non-reversed) byte order.
///
/// Display reverses the bytes to match the conventional block-explorer
/// orientation; storage and wire formats always use the raw layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// All-zero hash marks "no such object" (genesis parent, coinbase prev).
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(data: &[u8]) -> Option<Hash> {
        if data.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(data);
        Some(Hash(bytes))
    }

    /// Parse the display (byte-reversed) hex form.
    pub fn from_hex(s: &str) -> Option<Hash> {
        let raw = hex::decode(s).ok()?;
        if raw.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, b) in raw.iter().rev().enumerate() {
            bytes[i] = *b;
        }
        Some(Hash(bytes))
    }

    /// Display (byte-reversed) hex form.
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

/// Reference to a specific transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u32,
}

/// Output index of the coinbase input sentinel.
pub const COINBASE_OUTPUT_INDEX: u32 = 0xFFFF_FFFF;

impl OutPoint {
    pub fn new(tx_hash: Hash, index: u32) -> Self {
        OutPoint { tx_hash, index }
    }

    /// The `(zero hash, 0xFFFFFFFF)` sentinel used by coinbase inputs.
    pub fn coinbase() -> Self {
        OutPoint {
            tx_hash: Hash::ZERO,
            index: COINBASE_OUTPUT_INDEX,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_hash.is_zero() && self.index == COINBASE_OUTPUT_INDEX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

/// Transaction input: the outpoint being spent plus the unlocking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev: OutPoint,
    pub sig_script: Vec<u8>,
    pub sequence: u32,
}

/// Sequence values at or above this do NOT signal replaceability (BIP 125).
pub const SEQUENCE_FINAL_THRESHOLD: u32 = 0xFFFF_FFFE;

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        self.prev.is_coinbase()
    }

    /// BIP 125: any input with sequence below 0xFFFFFFFE opts into RBF.
    pub fn signals_rbf(&self) -> bool {
        self.sequence < SEQUENCE_FINAL_THRESHOLD
    }
}

/// Transaction output: value in satoshis plus the locking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: i64,
    pub pub_key_script: Vec<u8>,
}

/// A value transfer. Never mutated after construction; the canonical
/// serialization fixes the txid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// True iff the single input carries the coinbase sentinel.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// True iff any input signals BIP 125 replaceability.
    pub fn signals_rbf(&self) -> bool {
        self.inputs.iter().any(|i| i.signals_rbf())
    }

    pub fn total_output_value(&self) -> i64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// 80-byte block header. The block hash is double-SHA-256 of its
/// canonical serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Header plus ordered transactions; tx[0] is the coinbase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Current best chain pointer, updated atomically with block application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub best_hash: Hash,
    pub best_height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::new([1u8; 32]).is_zero());
    }

    #[test]
    fn test_hash_hex_round_trip() {
        let h = Hash::new([0xAB; 32]);
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_hash_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        let h = Hash::new(bytes);
        // Internal byte 0 appears last in the display form.
        assert!(h.to_hex().ends_with("01"));
        assert!(h.to_hex().starts_with("00"));
    }

    #[test]
    fn test_coinbase_outpoint() {
        let op = OutPoint::coinbase();
        assert!(op.is_coinbase());

        let normal = OutPoint::new(Hash::new([1u8; 32]), 0);
        assert!(!normal.is_coinbase());

        // Zero hash with a regular index is not the sentinel.
        let half = OutPoint::new(Hash::ZERO, 0);
        assert!(!half.is_coinbase());
    }

    #[test]
    fn test_rbf_signaling() {
        let mut input = TxInput {
            prev: OutPoint::new(Hash::new([1u8; 32]), 0),
            sig_script: vec![],
            sequence: 0xFFFF_FFFF,
        };
        assert!(!input.signals_rbf());

        input.sequence = 0xFFFF_FFFE;
        assert!(!input.signals_rbf());

        input.sequence = 0xFFFF_FFFD;
        assert!(input.signals_rbf());
    }

    #[test]
    fn test_is_coinbase_tx() {
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::coinbase(),
                sig_script: vec![0x01, 0x00],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 50_0000_0000,
                pub_key_script: vec![],
            }],
            lock_time: 0,
        };
        assert!(coinbase.is_coinbase());

        let spend = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(Hash::new([2u8; 32]), 1),
                sig_script: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 1000,
                pub_key_script: vec![],
            }],
            lock_time: 0,
        };
        assert!(!spend.is_coinbase());
    }
}
