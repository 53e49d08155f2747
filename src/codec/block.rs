//! Canonical block and header serialization
//!
//! The header is exactly 80 bytes: version | prev | merkle_root |
//! timestamp | bits | nonce. The block hash is double-SHA-256 over those
//! 80 bytes. A full block is the header, a varint transaction count, and
//! the canonical transactions in order.

use super::{tx, Reader, Writer};
use crate::crypto::hashing::double_sha256;
use crate::error::{NodeError, Result};
use crate::types::{Block, BlockHeader, Hash};

/// Serialized size of a block header.
pub const HEADER_SIZE: usize = 80;

/// Maximum total serialized block size (1 MB).
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

pub fn encode_header(header: &BlockHeader) -> [u8; HEADER_SIZE] {
    let mut w = Writer::with_capacity(HEADER_SIZE);
    write_header(&mut w, header);
    let bytes = w.into_bytes();
    let mut out = [0u8; HEADER_SIZE];
    out.copy_from_slice(&bytes);
    out
}

fn write_header(w: &mut Writer, header: &BlockHeader) {
    w.write_i32(header.version);
    w.write_hash(&header.prev);
    w.write_hash(&header.merkle_root);
    w.write_u32(header.timestamp);
    w.write_u32(header.bits);
    w.write_u32(header.nonce);
}

pub fn decode_header(data: &[u8]) -> Result<BlockHeader> {
    let mut r = Reader::new(data);
    let header = read_header(&mut r)?;
    if !r.is_empty() {
        return Err(NodeError::Decode("trailing bytes after header".into()));
    }
    Ok(header)
}

fn read_header(r: &mut Reader<'_>) -> Result<BlockHeader> {
    Ok(BlockHeader {
        version: r.read_i32()?,
        prev: r.read_hash()?,
        merkle_root: r.read_hash()?,
        timestamp: r.read_u32()?,
        bits: r.read_u32()?,
        nonce: r.read_u32()?,
    })
}

/// Block hash: double-SHA-256 of the 80-byte header.
pub fn block_hash(header: &BlockHeader) -> Hash {
    double_sha256(&encode_header(header))
}

pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut w = Writer::with_capacity(block_size(block));
    write_header(&mut w, &block.header);
    w.write_varint(block.transactions.len() as u64);
    for transaction in &block.transactions {
        tx::write_tx(&mut w, transaction);
    }
    w.into_bytes()
}

pub fn decode_block(data: &[u8]) -> Result<Block> {
    if data.len() > MAX_BLOCK_SIZE {
        return Err(NodeError::Decode(format!(
            "block exceeds {} bytes: {}",
            MAX_BLOCK_SIZE,
            data.len()
        )));
    }
    let mut r = Reader::new(data);
    let header = read_header(&mut r)?;

    let tx_count = r.read_varint()?;
    if tx_count == 0 {
        return Err(NodeError::Decode("block has no transactions".into()));
    }
    if tx_count > MAX_BLOCK_SIZE as u64 {
        return Err(NodeError::Decode(format!("tx count too large: {}", tx_count)));
    }

    let mut transactions = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        transactions.push(tx::read_tx(&mut r)?);
    }
    if !r.is_empty() {
        return Err(NodeError::Decode(format!(
            "trailing bytes after block: {}",
            r.remaining()
        )));
    }

    Ok(Block {
        header,
        transactions,
    })
}

/// Canonical serialized size of a block.
pub fn block_size(block: &Block) -> usize {
    let mut size = HEADER_SIZE;
    let n = block.transactions.len() as u64;
    size += if n < 0xFD {
        1
    } else if n <= 0xFFFF {
        3
    } else {
        5
    };
    for transaction in &block.transactions {
        size += tx::tx_size(transaction);
    }
    size
}
