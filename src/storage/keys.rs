//! Key layout for the sled keyspace
//!
//! Single-byte prefixes tag each table:
//!   `b` + block hash            -> canonical block bytes
//!   `h` + 8-byte BE height      -> block hash at that height
//!   `t` + txid                  -> block hash || 4-byte BE tx index
//!   `c` + ascii key             -> chain-tip metadata
//!   `u` + outpoint              -> canonical UTXO bytes
//!   `bu` + block hash           -> undo record (spent UTXOs)

use crate::types::{Hash, OutPoint};

pub const PREFIX_BLOCK: u8 = b'b';
pub const PREFIX_HEIGHT: u8 = b'h';
pub const PREFIX_TX: u8 = b't';
pub const PREFIX_CHAIN_STATE: u8 = b'c';
pub const PREFIX_UTXO: u8 = b'u';
pub const PREFIX_UNDO: &[u8; 2] = b"bu";

pub const KEY_BEST_BLOCK: &str = "bestblock";
pub const KEY_BEST_HEIGHT: &str = "bestheight";

pub fn block_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_BLOCK);
    key.extend_from_slice(hash.as_bytes());
    key
}

pub fn height_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(PREFIX_HEIGHT);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

pub fn tx_key(txid: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_TX);
    key.extend_from_slice(txid.as_bytes());
    key
}

pub fn chain_state_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(PREFIX_CHAIN_STATE);
    key.extend_from_slice(name.as_bytes());
    key
}

/// `u` + 36-byte outpoint: tx hash followed by the little-endian index.
pub fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(PREFIX_UTXO);
    key.extend_from_slice(outpoint.tx_hash.as_bytes());
    key.extend_from_slice(&outpoint.index.to_le_bytes());
    key
}

pub fn undo_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(34);
    key.extend_from_slice(PREFIX_UNDO);
    key.extend_from_slice(hash.as_bytes());
    key
}
