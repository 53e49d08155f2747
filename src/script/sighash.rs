//! Signature hash computation
//!
//! Produces the digest an input signature commits to: a modified copy of
//! the transaction serialized canonically with the 4-byte hash type
//! appended, then double-SHA-256.

use crate::codec::tx::encode_tx;
use crate::crypto::hashing::double_sha256;
use crate::error::{NodeError, Result};
use crate::types::{Hash, Transaction};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Compute the signature hash for `input_index` of `tx` under `hash_type`.
/// `subscript` is the previous output's locking script with
/// OP_CODESEPARATOR stripped.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    subscript: &[u8],
    hash_type: u32,
) -> Result<Hash> {
    if input_index >= tx.inputs.len() {
        return Err(NodeError::Script(format!(
            "input index {} out of range ({} inputs)",
            input_index,
            tx.inputs.len()
        )));
    }

    let mut tx_copy = tx.clone();

    // Blank every unlocking script, then install the subscript on the
    // input being signed.
    for input in tx_copy.inputs.iter_mut() {
        input.sig_script.clear();
    }
    tx_copy.inputs[input_index].sig_script = subscript.to_vec();

    match hash_type & 0x1F {
        SIGHASH_ALL => {}
        SIGHASH_NONE => {
            tx_copy.outputs.clear();
            for (i, input) in tx_copy.inputs.iter_mut().enumerate() {
                if i != input_index {
                    input.sequence = 0;
                }
            }
        }
        SIGHASH_SINGLE => {
            if input_index >= tx_copy.outputs.len() {
                return Err(NodeError::Script(
                    "SIGHASH_SINGLE input index exceeds output count".into(),
                ));
            }
            tx_copy.outputs = vec![tx_copy.outputs[input_index].clone()];
            // The committed output keeps its position in Bitcoin's layout;
            // this simplified model keeps only the single output.
            for (i, input) in tx_copy.inputs.iter_mut().enumerate() {
                if i != input_index {
                    input.sequence = 0;
                }
            }
        }
        other => {
            return Err(NodeError::Script(format!("unsupported sighash type: {:#04x}", other)));
        }
    }

    if hash_type & SIGHASH_ANYONECANPAY != 0 {
        tx_copy.inputs = vec![tx_copy.inputs[input_index].clone()];
    }

    let mut serialized = encode_tx(&tx_copy);
    serialized.extend_from_slice(&hash_type.to_le_bytes());

    Ok(double_sha256(&serialized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TxInput, TxOutput};

    fn two_in_two_out() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![
                TxInput {
                    prev: OutPoint::new(Hash::new([1u8; 32]), 0),
                    sig_script: vec![0xAA],
                    sequence: 0xFFFF_FFFF,
                },
                TxInput {
                    prev: OutPoint::new(Hash::new([2u8; 32]), 1),
                    sig_script: vec![0xBB],
                    sequence: 0xFFFF_FFFF,
                },
            ],
            outputs: vec![
                TxOutput {
                    value: 100,
                    pub_key_script: vec![0x51],
                },
                TxOutput {
                    value: 200,
                    pub_key_script: vec![0x52],
                },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn test_all_is_deterministic_and_input_sensitive() {
        let tx = two_in_two_out();
        let subscript = vec![0x76, 0xA9];

        let h0 = signature_hash(&tx, 0, &subscript, SIGHASH_ALL).unwrap();
        assert_eq!(h0, signature_hash(&tx, 0, &subscript, SIGHASH_ALL).unwrap());

        let h1 = signature_hash(&tx, 1, &subscript, SIGHASH_ALL).unwrap();
        assert_ne!(h0, h1);
    }

    #[test]
    fn test_all_ignores_other_sig_scripts() {
        let tx = two_in_two_out();
        let mut tx2 = tx.clone();
        tx2.inputs[1].sig_script = vec![0xCC, 0xDD];

        let subscript = vec![0x76];
        assert_eq!(
            signature_hash(&tx, 0, &subscript, SIGHASH_ALL).unwrap(),
            signature_hash(&tx2, 0, &subscript, SIGHASH_ALL).unwrap()
        );
    }

    #[test]
    fn test_none_ignores_outputs() {
        let tx = two_in_two_out();
        let mut tx2 = tx.clone();
        tx2.outputs[0].value = 999;

        let subscript = vec![0x76];
        assert_eq!(
            signature_hash(&tx, 0, &subscript, SIGHASH_NONE).unwrap(),
            signature_hash(&tx2, 0, &subscript, SIGHASH_NONE).unwrap()
        );
        // ALL does commit to outputs.
        assert_ne!(
            signature_hash(&tx, 0, &subscript, SIGHASH_ALL).unwrap(),
            signature_hash(&tx2, 0, &subscript, SIGHASH_ALL).unwrap()
        );
    }

    #[test]
    fn test_single_requires_matching_output() {
        let mut tx = two_in_two_out();
        tx.outputs.truncate(1);
        // Input 1 has no output at index 1.
        assert!(signature_hash(&tx, 1, &[0x76], SIGHASH_SINGLE).is_err());
        assert!(signature_hash(&tx, 0, &[0x76], SIGHASH_SINGLE).is_ok());
    }

    #[test]
    fn test_anyonecanpay_ignores_other_inputs() {
        let tx = two_in_two_out();
        let mut tx2 = tx.clone();
        tx2.inputs[1].prev = OutPoint::new(Hash::new([9u8; 32]), 7);

        let flags = SIGHASH_ALL | SIGHASH_ANYONECANPAY;
        assert_eq!(
            signature_hash(&tx, 0, &[0x76], flags).unwrap(),
            signature_hash(&tx2, 0, &[0x76], flags).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_index_and_type() {
        let tx = two_in_two_out();
        assert!(signature_hash(&tx, 2, &[0x76], SIGHASH_ALL).is_err());
        assert!(signature_hash(&tx, 0, &[0x76], 0x1F).is_err());
    }
}
