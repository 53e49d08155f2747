//! The UTXO set: authoritative mapping from outpoint to unspent output

pub mod store;

use crate::error::{NodeError, Result};
use crate::types::{Hash, OutPoint, Transaction, TxOutput};
use std::collections::HashMap;

/// One unspent output with the metadata the validator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub tx_hash: Hash,
    pub output_index: u32,
    pub output: TxOutput,
    pub creation_height: u64,
    pub is_coinbase: bool,
}

impl Utxo {
    pub fn new(
        tx_hash: Hash,
        output_index: u32,
        output: TxOutput,
        creation_height: u64,
        is_coinbase: bool,
    ) -> Self {
        Utxo {
            tx_hash,
            output_index,
            output,
            creation_height,
            is_coinbase,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.output_index)
    }

    pub fn value(&self) -> i64 {
        self.output.value
    }

    /// Coinbase outputs need 100 confirmations before they may be spent.
    pub fn is_mature_at(&self, spend_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        spend_height >= self.creation_height + crate::consensus::COINBASE_MATURITY
    }
}

/// Aggregate numbers over the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoStatistics {
    pub count: usize,
    pub total_value: i64,
    pub coinbase_count: usize,
    pub coinbase_value: i64,
    pub average_value: i64,
}

/// In-memory UTXO set. Not internally synchronized; the node wraps it in
/// a reader-writer lock and validation takes the write side.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    pub fn new() -> Self {
        UtxoSet {
            utxos: HashMap::new(),
        }
    }

    pub fn add(&mut self, utxo: Utxo) -> Result<()> {
        let outpoint = utxo.outpoint();
        if self.utxos.contains_key(&outpoint) {
            return Err(NodeError::UtxoNotFound(format!(
                "UTXO already exists: {}",
                outpoint
            )));
        }
        self.utxos.insert(outpoint, utxo);
        Ok(())
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Result<Utxo> {
        self.utxos
            .remove(outpoint)
            .ok_or_else(|| NodeError::UtxoNotFound(outpoint.to_string()))
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    pub fn exists(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn total_value(&self) -> i64 {
        self.utxos.values().map(|u| u.value()).sum()
    }

    /// All UTXOs whose locking script equals `script` (wallet balance scan).
    pub fn find_by_script(&self, script: &[u8]) -> Vec<&Utxo> {
        self.utxos
            .values()
            .filter(|u| u.output.pub_key_script == script)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.utxos.iter()
    }

    pub fn clear(&mut self) {
        self.utxos.clear();
    }

    /// Apply a transaction: consume its inputs (skipped for coinbase),
    /// then create one UTXO per output. All-or-nothing: a missing input
    /// leaves the set untouched.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        txid: Hash,
        height: u64,
        is_coinbase: bool,
    ) -> Result<Vec<Utxo>> {
        let mut spent = Vec::new();

        if !is_coinbase {
            // Verify everything is present before mutating.
            for input in &tx.inputs {
                if !self.utxos.contains_key(&input.prev) {
                    return Err(NodeError::UtxoNotFound(format!(
                        "spending non-existent UTXO: {}",
                        input.prev
                    )));
                }
            }
            for input in &tx.inputs {
                spent.push(self.remove(&input.prev)?);
            }
        }

        for (i, output) in tx.outputs.iter().enumerate() {
            let utxo = Utxo::new(txid, i as u32, output.clone(), height, is_coinbase);
            self.utxos.insert(utxo.outpoint(), utxo);
        }

        Ok(spent)
    }

    /// Remove the outputs a transaction created. Restoring consumed
    /// inputs is the caller's job, from saved undo data.
    pub fn revert_transaction(&mut self, tx: &Transaction, txid: Hash) {
        for i in 0..tx.outputs.len() {
            self.utxos.remove(&OutPoint::new(txid, i as u32));
        }
    }

    pub fn statistics(&self) -> UtxoStatistics {
        let mut stats = UtxoStatistics::default();
        for utxo in self.utxos.values() {
            stats.count += 1;
            stats.total_value += utxo.value();
            if utxo.is_coinbase {
                stats.coinbase_count += 1;
                stats.coinbase_value += utxo.value();
            }
        }
        if stats.count > 0 {
            stats.average_value = stats.total_value / stats.count as i64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxInput;

    fn utxo(txid_byte: u8, index: u32, value: i64) -> Utxo {
        Utxo::new(
            Hash::new([txid_byte; 32]),
            index,
            TxOutput {
                value,
                pub_key_script: vec![txid_byte],
            },
            0,
            false,
        )
    }

    #[test]
    fn test_add_get_remove() {
        let mut set = UtxoSet::new();
        let u = utxo(1, 0, 1000);
        let op = u.outpoint();

        set.add(u.clone()).unwrap();
        assert!(set.exists(&op));
        assert_eq!(set.get(&op).unwrap().value(), 1000);
        assert!(set.add(u).is_err());

        let removed = set.remove(&op).unwrap();
        assert_eq!(removed.value(), 1000);
        assert!(set.remove(&op).is_err());
    }

    #[test]
    fn test_total_value_and_statistics() {
        let mut set = UtxoSet::new();
        set.add(utxo(1, 0, 1000)).unwrap();
        set.add(utxo(2, 0, 2000)).unwrap();

        let mut coinbase = utxo(3, 0, 5000);
        coinbase.is_coinbase = true;
        set.add(coinbase).unwrap();

        assert_eq!(set.total_value(), 8000);

        let stats = set.statistics();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.total_value, 8000);
        assert_eq!(stats.coinbase_count, 1);
        assert_eq!(stats.coinbase_value, 5000);
        assert_eq!(stats.average_value, 2666);
    }

    #[test]
    fn test_find_by_script() {
        let mut set = UtxoSet::new();
        set.add(utxo(1, 0, 1000)).unwrap();
        set.add(utxo(1, 1, 2000)).unwrap();
        set.add(utxo(2, 0, 3000)).unwrap();

        let found = set.find_by_script(&[1]);
        assert_eq!(found.len(), 2);
        assert_eq!(found.iter().map(|u| u.value()).sum::<i64>(), 3000);
    }

    #[test]
    fn test_apply_transaction_atomic_on_missing_input() {
        let mut set = UtxoSet::new();
        set.add(utxo(1, 0, 1000)).unwrap();

        // Spends one existing and one missing outpoint.
        let tx = Transaction {
            version: 1,
            inputs: vec![
                TxInput {
                    prev: OutPoint::new(Hash::new([1u8; 32]), 0),
                    sig_script: vec![],
                    sequence: 0xFFFF_FFFF,
                },
                TxInput {
                    prev: OutPoint::new(Hash::new([9u8; 32]), 0),
                    sig_script: vec![],
                    sequence: 0xFFFF_FFFF,
                },
            ],
            outputs: vec![TxOutput {
                value: 500,
                pub_key_script: vec![],
            }],
            lock_time: 0,
        };

        let err = set.apply_transaction(&tx, Hash::new([5u8; 32]), 1, false);
        assert!(err.is_err());
        // Existing UTXO untouched, no outputs created.
        assert_eq!(set.len(), 1);
        assert!(set.exists(&OutPoint::new(Hash::new([1u8; 32]), 0)));
    }

    #[test]
    fn test_apply_then_revert_restores_with_undo() {
        let mut set = UtxoSet::new();
        set.add(utxo(1, 0, 1000)).unwrap();
        let before = set.clone();

        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(Hash::new([1u8; 32]), 0),
                sig_script: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 900,
                pub_key_script: vec![7],
            }],
            lock_time: 0,
        };
        let txid = Hash::new([5u8; 32]);

        let spent = set.apply_transaction(&tx, txid, 1, false).unwrap();
        assert_eq!(spent.len(), 1);
        assert!(set.exists(&OutPoint::new(txid, 0)));
        assert!(!set.exists(&OutPoint::new(Hash::new([1u8; 32]), 0)));

        set.revert_transaction(&tx, txid);
        for utxo in spent {
            set.add(utxo).unwrap();
        }
        assert_eq!(set.len(), before.len());
        assert!(set.exists(&OutPoint::new(Hash::new([1u8; 32]), 0)));
    }

    #[test]
    fn test_coinbase_apply_skips_inputs() {
        let mut set = UtxoSet::new();
        let tx = Transaction {
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

        let spent = set
            .apply_transaction(&tx, Hash::new([5u8; 32]), 0, true)
            .unwrap();
        assert!(spent.is_empty());
        assert_eq!(set.len(), 1);
        assert!(set.get(&OutPoint::new(Hash::new([5u8; 32]), 0)).unwrap().is_coinbase);
    }

    #[test]
    fn test_coinbase_maturity() {
        let mut u = utxo(1, 0, 1000);
        u.is_coinbase = true;
        u.creation_height = 10;

        assert!(!u.is_mature_at(10));
        assert!(!u.is_mature_at(109));
        assert!(u.is_mature_at(110));

        let regular = utxo(2, 0, 1000);
        assert!(regular.is_mature_at(0));
    }
}
