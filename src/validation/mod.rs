//! Transaction validation: structural rules and coinbase checks

pub mod block;
pub mod chain;

use crate::codec::tx::{tx_size, MAX_TX_SIZE};
use crate::consensus::{check_money_range, MAX_MONEY};
use crate::error::{NodeError, Result};
use crate::types::Transaction;
use std::collections::HashSet;

/// Structural checks independent of the UTXO set.
pub fn validate_transaction(tx: &Transaction) -> Result<()> {
    if tx.inputs.is_empty() {
        return Err(NodeError::Structural("transaction has no inputs".into()));
    }
    if tx.outputs.is_empty() {
        return Err(NodeError::Structural("transaction has no outputs".into()));
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prev) {
            return Err(NodeError::Structural(format!(
                "duplicate input: {}",
                input.prev
            )));
        }
    }

    let mut total: i64 = 0;
    for (i, output) in tx.outputs.iter().enumerate() {
        check_money_range(output.value)
            .map_err(|e| NodeError::Structural(format!("output {}: {}", i, e)))?;
        total = total
            .checked_add(output.value)
            .ok_or_else(|| NodeError::Structural("total output value overflow".into()))?;
        if total > MAX_MONEY {
            return Err(NodeError::Structural(format!(
                "total output value exceeds maximum: {}",
                total
            )));
        }
    }

    let size = tx_size(tx);
    if size > MAX_TX_SIZE {
        return Err(NodeError::Structural(format!(
            "transaction too large: {} bytes",
            size
        )));
    }

    Ok(())
}

/// Minimal little-endian height encoding with script-number sign rules,
/// as BIP34 requires in the coinbase script. Height 0 is a single zero
/// byte so the push stays non-empty.
pub fn encode_bip34_height(height: u64) -> Vec<u8> {
    if height == 0 {
        return vec![0];
    }

    let mut bytes = Vec::new();
    let mut remaining = height;
    while remaining > 0 {
        bytes.push((remaining & 0xFF) as u8);
        remaining >>= 8;
    }
    // A set high bit would read as negative; pad with a zero byte.
    if bytes.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        bytes.push(0);
    }
    bytes
}

/// Coinbase-specific checks: the sentinel input, a 2..100-byte script,
/// and (at or past BIP34 activation) the height encoded as the first push.
pub fn validate_coinbase(tx: &Transaction, height: u64, bip34_height: u64) -> Result<()> {
    if !tx.is_coinbase() {
        return Err(NodeError::Structural("not a coinbase transaction".into()));
    }

    let script = &tx.inputs[0].sig_script;
    if script.len() < 2 || script.len() > 100 {
        return Err(NodeError::Structural(format!(
            "coinbase script length invalid: {}",
            script.len()
        )));
    }

    if tx.outputs.is_empty() {
        return Err(NodeError::Structural("coinbase has no outputs".into()));
    }

    if height >= bip34_height {
        let expected = encode_bip34_height(height);
        let push_len = script[0] as usize;
        if push_len != expected.len()
            || script.len() < 1 + push_len
            || script[1..1 + push_len] != expected[..]
        {
            return Err(NodeError::Structural(format!(
                "coinbase does not encode height {}",
                height
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash, OutPoint, TxInput, TxOutput};

    fn valid_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(Hash::new([1u8; 32]), 0),
                sig_script: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 1000,
                pub_key_script: vec![],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_valid_transaction_passes() {
        assert!(validate_transaction(&valid_tx()).is_ok());
    }

    #[test]
    fn test_empty_inputs_or_outputs_rejected() {
        let mut tx = valid_tx();
        tx.inputs.clear();
        assert!(validate_transaction(&tx).is_err());

        let mut tx = valid_tx();
        tx.outputs.clear();
        assert!(validate_transaction(&tx).is_err());
    }

    #[test]
    fn test_duplicate_inputs_rejected() {
        let mut tx = valid_tx();
        tx.inputs.push(tx.inputs[0].clone());
        assert!(validate_transaction(&tx).is_err());
    }

    #[test]
    fn test_value_bounds() {
        let mut tx = valid_tx();
        tx.outputs[0].value = -1;
        assert!(validate_transaction(&tx).is_err());

        let mut tx = valid_tx();
        tx.outputs[0].value = MAX_MONEY + 1;
        assert!(validate_transaction(&tx).is_err());

        // Two outputs summing past the cap.
        let mut tx = valid_tx();
        tx.outputs = vec![
            TxOutput {
                value: MAX_MONEY,
                pub_key_script: vec![],
            },
            TxOutput {
                value: 1,
                pub_key_script: vec![],
            },
        ];
        assert!(validate_transaction(&tx).is_err());
    }

    #[test]
    fn test_oversized_transaction_rejected() {
        let mut tx = valid_tx();
        tx.outputs[0].pub_key_script = vec![0u8; MAX_TX_SIZE];
        assert!(validate_transaction(&tx).is_err());
    }

    #[test]
    fn test_bip34_height_encoding() {
        assert_eq!(encode_bip34_height(0), vec![0]);
        assert_eq!(encode_bip34_height(1), vec![1]);
        assert_eq!(encode_bip34_height(0x7F), vec![0x7F]);
        // 0x80 would read negative; padded.
        assert_eq!(encode_bip34_height(0x80), vec![0x80, 0x00]);
        assert_eq!(encode_bip34_height(0x100), vec![0x00, 0x01]);
        assert_eq!(encode_bip34_height(210_000), vec![0x50, 0x34, 0x03]);
    }

    fn coinbase_at(height: u64) -> Transaction {
        let encoded = encode_bip34_height(height);
        let mut script = vec![encoded.len() as u8];
        script.extend_from_slice(&encoded);
        script.extend_from_slice(&7u64.to_le_bytes());
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::coinbase(),
                sig_script: script,
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 50_0000_0000,
                pub_key_script: vec![],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_validate_coinbase() {
        assert!(validate_coinbase(&coinbase_at(5), 5, 0).is_ok());
        // Wrong height in the script.
        assert!(validate_coinbase(&coinbase_at(5), 6, 0).is_err());
        // Before activation the height is not enforced.
        assert!(validate_coinbase(&coinbase_at(5), 6, 1000).is_ok());
    }

    #[test]
    fn test_validate_coinbase_script_bounds() {
        let mut tx = coinbase_at(1);
        tx.inputs[0].sig_script = vec![0x01];
        assert!(validate_coinbase(&tx, 1, 1000).is_err());

        let mut tx = coinbase_at(1);
        tx.inputs[0].sig_script = vec![0u8; 101];
        assert!(validate_coinbase(&tx, 1, 1000).is_err());

        let spend = valid_tx();
        assert!(validate_coinbase(&spend, 1, 0).is_err());
    }
}
