//! Canonical transaction serialization
//!
//! Layout: version | varint(inputs) | inputs | varint(outputs) | outputs |
//! lock_time. The txid is double-SHA-256 over exactly these bytes.

use super::{Reader, Writer};
use crate::crypto::hashing::double_sha256;
use crate::error::{NodeError, Result};
use crate::types::{Hash, OutPoint, Transaction, TxInput, TxOutput};

/// Maximum canonical size of a single transaction (100 KiB).
pub const MAX_TX_SIZE: usize = 100_000;

pub fn encode_tx(tx: &Transaction) -> Vec<u8> {
    let mut w = Writer::with_capacity(tx_size(tx));
    write_tx(&mut w, tx);
    w.into_bytes()
}

pub(crate) fn write_tx(w: &mut Writer, tx: &Transaction) {
    w.write_i32(tx.version);

    w.write_varint(tx.inputs.len() as u64);
    for input in &tx.inputs {
        w.write_hash(&input.prev.tx_hash);
        w.write_u32(input.prev.index);
        w.write_var_bytes(&input.sig_script);
        w.write_u32(input.sequence);
    }

    w.write_varint(tx.outputs.len() as u64);
    for output in &tx.outputs {
        w.write_i64(output.value);
        w.write_var_bytes(&output.pub_key_script);
    }

    w.write_u32(tx.lock_time);
}

pub fn decode_tx(data: &[u8]) -> Result<Transaction> {
    if data.len() > MAX_TX_SIZE {
        return Err(NodeError::Decode(format!(
            "transaction exceeds {} bytes: {}",
            MAX_TX_SIZE,
            data.len()
        )));
    }
    let mut r = Reader::new(data);
    let tx = read_tx(&mut r)?;
    if !r.is_empty() {
        return Err(NodeError::Decode(format!(
            "trailing bytes after transaction: {}",
            r.remaining()
        )));
    }
    Ok(tx)
}

pub(crate) fn read_tx(r: &mut Reader<'_>) -> Result<Transaction> {
    let version = r.read_i32()?;

    let input_count = r.read_varint()?;
    if input_count > MAX_TX_SIZE as u64 {
        return Err(NodeError::Decode(format!("input count too large: {}", input_count)));
    }
    let mut inputs = Vec::with_capacity(input_count as usize);
    for _ in 0..input_count {
        let tx_hash = r.read_hash()?;
        let index = r.read_u32()?;
        let sig_script = r.read_var_bytes()?;
        let sequence = r.read_u32()?;
        inputs.push(TxInput {
            prev: OutPoint::new(tx_hash, index),
            sig_script,
            sequence,
        });
    }

    let output_count = r.read_varint()?;
    if output_count > MAX_TX_SIZE as u64 {
        return Err(NodeError::Decode(format!(
            "output count too large: {}",
            output_count
        )));
    }
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        let value = r.read_i64()?;
        let pub_key_script = r.read_var_bytes()?;
        outputs.push(TxOutput {
            value,
            pub_key_script,
        });
    }

    let lock_time = r.read_u32()?;

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

/// Transaction id: double-SHA-256 of the canonical serialization.
pub fn tx_hash(tx: &Transaction) -> Hash {
    double_sha256(&encode_tx(tx))
}

/// Canonical serialized size without allocating the encoding.
pub fn tx_size(tx: &Transaction) -> usize {
    let mut size = 4; // version
    size += varint_len(tx.inputs.len() as u64);
    for input in &tx.inputs {
        size += 32 + 4; // outpoint
        size += varint_len(input.sig_script.len() as u64) + input.sig_script.len();
        size += 4; // sequence
    }
    size += varint_len(tx.outputs.len() as u64);
    for output in &tx.outputs {
        size += 8;
        size += varint_len(output.pub_key_script.len() as u64) + output.pub_key_script.len();
    }
    size + 4 // lock_time
}

fn varint_len(v: u64) -> usize {
    if v < 0xFD {
        1
    } else if v <= 0xFFFF {
        3
    } else if v <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(Hash::new([7u8; 32]), 3),
                sig_script: vec![0x51, 0x52],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![
                TxOutput {
                    value: 25_0000_0000,
                    pub_key_script: vec![0x76, 0xA9],
                },
                TxOutput {
                    value: 546,
                    pub_key_script: vec![],
                },
            ],
            lock_time: 17,
        }
    }

    #[test]
    fn test_tx_round_trip() {
        let tx = sample_tx();
        let encoded = encode_tx(&tx);
        let decoded = decode_tx(&encoded).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_tx_size_matches_encoding() {
        let tx = sample_tx();
        assert_eq!(tx_size(&tx), encode_tx(&tx).len());
    }

    #[test]
    fn test_txid_changes_with_any_field() {
        let tx = sample_tx();
        let base = tx_hash(&tx);

        let mut changed = tx.clone();
        changed.lock_time = 18;
        assert_ne!(base, tx_hash(&changed));

        let mut changed = tx.clone();
        changed.outputs[0].value += 1;
        assert_ne!(base, tx_hash(&changed));

        let mut changed = tx;
        changed.inputs[0].sequence = 0;
        assert_ne!(base, tx_hash(&changed));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = encode_tx(&sample_tx());
        encoded.push(0x00);
        assert!(decode_tx(&encoded).is_err());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let encoded = encode_tx(&sample_tx());
        assert!(decode_tx(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let data = vec![0u8; MAX_TX_SIZE + 1];
        assert!(decode_tx(&data).is_err());
    }

    #[test]
    fn test_coinbase_round_trip() {
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::coinbase(),
                sig_script: vec![0x01, 0x64],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 50_0000_0000,
                pub_key_script: vec![0xAC],
            }],
            lock_time: 0,
        };
        let decoded = decode_tx(&encode_tx(&tx)).unwrap();
        assert!(decoded.is_coinbase());
        assert_eq!(tx, decoded);
    }
}
