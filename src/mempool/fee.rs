//! Fee computation and estimation

use super::Mempool;
use crate::codec::tx::tx_size;
use crate::error::{NodeError, Result};
use crate::types::Transaction;

/// Canonical serialized size, the denominator of every fee rate.
pub fn transaction_size(tx: &Transaction) -> i64 {
    tx_size(tx) as i64
}

/// Fee = inputs - outputs; the caller supplies each input's value.
pub fn transaction_fee(tx: &Transaction, input_values: &[i64]) -> Result<i64> {
    if input_values.len() != tx.inputs.len() {
        return Err(NodeError::Structural(format!(
            "input value count mismatch: {} values for {} inputs",
            input_values.len(),
            tx.inputs.len()
        )));
    }

    let total_in: i64 = input_values.iter().sum();
    let total_out = tx.total_output_value();
    let fee = total_in - total_out;
    if fee < 0 {
        return Err(NodeError::Structural(format!(
            "negative fee: inputs={}, outputs={}",
            total_in, total_out
        )));
    }
    Ok(fee)
}

/// Satoshis per byte, floored.
pub fn fee_rate(fee: i64, size: i64) -> i64 {
    if size == 0 {
        return 0;
    }
    fee / size
}

/// Summary numbers over the pool's fee rates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeStatistics {
    pub tx_count: usize,
    pub min_fee_rate: i64,
    pub max_fee_rate: i64,
    pub median_fee_rate: i64,
    pub average_fee_rate: i64,
    pub p25_fee_rate: i64,
    pub p75_fee_rate: i64,
    pub p90_fee_rate: i64,
    pub total_fees: i64,
    pub total_size: i64,
}

/// Percentile-bucket estimator over current mempool fee rates.
pub struct FeeEstimator;

impl FeeEstimator {
    /// Fee needed for a `tx_size`-byte transaction to confirm within
    /// `target_blocks`: next block pays the 90th-percentile rate, three
    /// blocks the 75th, six the median, anything longer the 25th. Floored
    /// at the pool's minimum rate.
    pub fn estimate_fee(mempool: &Mempool, target_blocks: u32, tx_size: i64) -> i64 {
        let min_fee = mempool.min_fee_rate() * tx_size;

        let mut rates: Vec<i64> = mempool.entries().map(|e| e.fee_rate).collect();
        if rates.is_empty() {
            return min_fee;
        }
        // Descending: index 0 is the best-paying transaction.
        rates.sort_unstable_by(|a, b| b.cmp(a));

        let percentile: usize = match target_blocks {
            0 | 1 => 10,
            2 | 3 => 25,
            4..=6 => 50,
            _ => 75,
        };

        let index = (rates.len() * percentile / 100).min(rates.len() - 1);
        let rate = rates[index].max(mempool.min_fee_rate());
        (rate * tx_size).max(min_fee)
    }

    pub fn statistics(mempool: &Mempool) -> FeeStatistics {
        let mut stats = FeeStatistics {
            tx_count: mempool.len(),
            ..Default::default()
        };
        if stats.tx_count == 0 {
            return stats;
        }

        let mut rates = Vec::with_capacity(stats.tx_count);
        for entry in mempool.entries() {
            rates.push(entry.fee_rate);
            stats.total_fees += entry.fee;
            stats.total_size += entry.size;
        }
        rates.sort_unstable();

        stats.min_fee_rate = rates[0];
        stats.max_fee_rate = rates[rates.len() - 1];
        stats.median_fee_rate = rates[rates.len() / 2];
        stats.p25_fee_rate = rates[rates.len() / 4];
        stats.p75_fee_rate = rates[rates.len() * 3 / 4];
        stats.p90_fee_rate = rates[(rates.len() * 9 / 10).min(rates.len() - 1)];
        if stats.total_size > 0 {
            stats.average_fee_rate = stats.total_fees / stats.total_size;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash, OutPoint, TxInput, TxOutput};

    fn simple_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::new(Hash::new([1u8; 32]), 0),
                sig_script: vec![0u8; 10],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: 900,
                pub_key_script: vec![0u8; 25],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_transaction_fee() {
        let tx = simple_tx();
        assert_eq!(transaction_fee(&tx, &[1000]).unwrap(), 100);
        assert!(transaction_fee(&tx, &[800]).is_err());
        assert!(transaction_fee(&tx, &[500, 500]).is_err());
    }

    #[test]
    fn test_fee_rate_floor() {
        assert_eq!(fee_rate(1000, 250), 4);
        assert_eq!(fee_rate(999, 250), 3);
        assert_eq!(fee_rate(100, 0), 0);
    }

    #[test]
    fn test_size_matches_codec() {
        let tx = simple_tx();
        assert_eq!(transaction_size(&tx), crate::codec::tx::encode_tx(&tx).len() as i64);
    }
}
