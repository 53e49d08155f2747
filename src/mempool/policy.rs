//! Mempool acceptance policy
//!
//! Standardness rules layered above consensus: these reject transactions
//! from the pool but never invalidate a block.

use super::fee::{fee_rate, transaction_size};
use super::Mempool;
use crate::error::{NodeError, Result};
use crate::script::OP_RETURN;
use crate::types::Transaction;

#[derive(Debug, Clone)]
pub struct Policy {
    pub min_fee_rate: i64,
    pub max_tx_size: i64,
    pub max_ancestor_count: usize,
    pub max_ancestor_size: i64,
    pub max_descendant_count: usize,
    pub max_descendant_size: i64,
    pub require_standard: bool,
    pub max_sig_ops: usize,
    pub dust_threshold: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            min_fee_rate: 1,
            max_tx_size: 100_000,
            max_ancestor_count: 25,
            max_ancestor_size: 101_000,
            max_descendant_count: 25,
            max_descendant_size: 101_000,
            require_standard: true,
            max_sig_ops: 4_000,
            dust_threshold: 546,
        }
    }
}

impl Policy {
    /// All standalone policy checks for one transaction and its fee.
    pub fn validate(&self, tx: &Transaction, fee: i64) -> Result<()> {
        let size = transaction_size(tx);
        if size > self.max_tx_size {
            return Err(NodeError::Policy(format!(
                "transaction too large: {} > {}",
                size, self.max_tx_size
            )));
        }

        let rate = fee_rate(fee, size);
        if rate < self.min_fee_rate {
            return Err(NodeError::Policy(format!(
                "fee rate too low: {} < {}",
                rate, self.min_fee_rate
            )));
        }

        self.check_dust(tx)?;
        if self.require_standard {
            self.check_standard(tx)?;
        }
        self.check_sig_ops(tx)?;

        Ok(())
    }

    /// Outputs below the dust threshold, except provably unspendable
    /// OP_RETURN outputs.
    fn check_dust(&self, tx: &Transaction) -> Result<()> {
        for (i, output) in tx.outputs.iter().enumerate() {
            let is_null_data = output.pub_key_script.first() == Some(&OP_RETURN);
            if !is_null_data && output.value < self.dust_threshold {
                return Err(NodeError::Policy(format!(
                    "output {} is dust: {} < {}",
                    i, output.value, self.dust_threshold
                )));
            }
        }
        Ok(())
    }

    /// Version 1 or 2, and at most one OP_RETURN output of at most 83 bytes.
    fn check_standard(&self, tx: &Transaction) -> Result<()> {
        if tx.version < 1 || tx.version > 2 {
            return Err(NodeError::Policy(format!("non-standard version: {}", tx.version)));
        }

        let mut null_data_count = 0;
        for output in &tx.outputs {
            if output.pub_key_script.first() == Some(&OP_RETURN) {
                null_data_count += 1;
                if null_data_count > 1 {
                    return Err(NodeError::Policy("multiple OP_RETURN outputs".into()));
                }
                if output.pub_key_script.len() > 83 {
                    return Err(NodeError::Policy(format!(
                        "OP_RETURN output too large: {} bytes",
                        output.pub_key_script.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Conservative estimate: two signature operations per input.
    fn check_sig_ops(&self, tx: &Transaction) -> Result<()> {
        let sig_ops = tx.inputs.len() * 2;
        if sig_ops > self.max_sig_ops {
            return Err(NodeError::Policy(format!(
                "too many signature operations: {} > {}",
                sig_ops, self.max_sig_ops
            )));
        }
        Ok(())
    }

    /// Would admitting `tx` exceed the in-pool ancestor limits?
    pub fn check_ancestor_limits(&self, mempool: &Mempool, tx: &Transaction) -> Result<()> {
        let mut count = 0usize;
        let mut size = 0i64;

        for input in &tx.inputs {
            if input.is_coinbase() {
                continue;
            }
            if let Some(parent) = mempool.get(&input.prev.tx_hash) {
                count += 1 + parent.parents.len();
                size += parent.ancestor_size;
            }
        }

        if count > self.max_ancestor_count {
            return Err(NodeError::Policy(format!(
                "too many ancestors: {} > {}",
                count, self.max_ancestor_count
            )));
        }
        if size > self.max_ancestor_size {
            return Err(NodeError::Policy(format!(
                "ancestor size too large: {} > {}",
                size, self.max_ancestor_size
            )));
        }
        Ok(())
    }

    /// Would admitting `tx` push any of its in-pool parents over the
    /// descendant limits?
    pub fn check_descendant_limits(&self, mempool: &Mempool, tx: &Transaction) -> Result<()> {
        let tx_size = transaction_size(tx);

        for input in &tx.inputs {
            if let Some(parent) = mempool.get(&input.prev.tx_hash) {
                let descendants = mempool.descendants_of(&parent.tx_hash);
                let count = descendants.len() + 1;
                let mut size = tx_size;
                for descendant in &descendants {
                    if let Some(entry) = mempool.get(descendant) {
                        size += entry.size;
                    }
                }

                if count > self.max_descendant_count {
                    return Err(NodeError::Policy(format!(
                        "too many descendants: {} > {}",
                        count, self.max_descendant_count
                    )));
                }
                if size > self.max_descendant_size {
                    return Err(NodeError::Policy(format!(
                        "descendant size too large: {} > {}",
                        size, self.max_descendant_size
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash, OutPoint, TxInput, TxOutput};

    fn standard_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(Hash::new([1u8; 32]), 0),
                sig_script: vec![0u8; 10],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 10_000,
                pub_key_script: vec![0u8; 25],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_standard_tx_passes() {
        let policy = Policy::default();
        assert!(policy.validate(&standard_tx(), 10_000).is_ok());
    }

    #[test]
    fn test_dust_rejected() {
        let policy = Policy::default();
        let mut tx = standard_tx();
        tx.outputs[0].value = 545;
        assert!(policy.validate(&tx, 10_000).is_err());

        tx.outputs[0].value = 546;
        assert!(policy.validate(&tx, 10_000).is_ok());
    }

    #[test]
    fn test_op_return_exempt_from_dust_but_limited() {
        let policy = Policy::default();
        let mut tx = standard_tx();
        tx.outputs.push(TxOutput {
            value: 0,
            pub_key_script: vec![crate::script::OP_RETURN, 0x04, 1, 2, 3, 4],
        });
        assert!(policy.validate(&tx, 10_000).is_ok());

        // Second OP_RETURN output.
        tx.outputs.push(TxOutput {
            value: 0,
            pub_key_script: vec![crate::script::OP_RETURN],
        });
        assert!(policy.validate(&tx, 10_000).is_err());
    }

    #[test]
    fn test_oversized_op_return_rejected() {
        let policy = Policy::default();
        let mut tx = standard_tx();
        let mut script = vec![crate::script::OP_RETURN];
        script.extend_from_slice(&[0u8; 83]);
        tx.outputs.push(TxOutput {
            value: 0,
            pub_key_script: script,
        });
        assert!(policy.validate(&tx, 10_000).is_err());
    }

    #[test]
    fn test_nonstandard_version_rejected() {
        let policy = Policy::default();
        let mut tx = standard_tx();
        tx.version = 3;
        assert!(policy.validate(&tx, 10_000).is_err());
        tx.version = 0;
        assert!(policy.validate(&tx, 10_000).is_err());
    }

    #[test]
    fn test_sig_op_cap() {
        let policy = Policy::default();
        let mut tx = standard_tx();
        let base_input = tx.inputs[0].clone();
        for i in 0..2001u32 {
            let mut input = base_input.clone();
            input.prev = OutPoint::new(Hash::new([2u8; 32]), i);
            tx.inputs.push(input);
        }
        assert!(policy.check_sig_ops(&tx).is_err());
    }

    #[test]
    fn test_ancestor_limits_against_pool() {
        use crate::mempool::{Mempool, MempoolConfig};

        let policy = Policy {
            max_ancestor_count: 1,
            ..Policy::default()
        };
        let mut mempool = Mempool::new(MempoolConfig::default());

        let parent = standard_tx();
        let parent_id = mempool.add(parent, 10_000, 0).unwrap();

        let child = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(parent_id, 0),
                sig_script: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 1000,
                pub_key_script: vec![],
            }],
            lock_time: 0,
        };
        // One ancestor is allowed.
        assert!(policy.check_ancestor_limits(&mempool, &child).is_ok());

        let child_id = mempool.add(child, 5_000, 0).unwrap();
        let grandchild = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(child_id, 0),
                sig_script: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 600,
                pub_key_script: vec![],
            }],
            lock_time: 0,
        };
        // Parent + grandparent exceeds the limit of 1.
        assert!(policy.check_ancestor_limits(&mempool, &grandchild).is_err());
    }
}
