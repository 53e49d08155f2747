//! Block-template transaction selection
//!
//! Greedy selection by descending ancestor fee rate, admitting an entry
//! only once its parents are in. The package selector instead emits whole
//! ancestor-closures as atomic units.

use super::{Mempool, MempoolEntry};
use crate::types::{Hash, Transaction};
use std::collections::HashSet;

/// Bytes reserved for the coinbase transaction.
const COINBASE_RESERVE: i64 = 200;

/// Result of a selection round.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub transactions: Vec<Transaction>,
    pub txids: Vec<Hash>,
    pub total_size: i64,
    pub total_fees: i64,
}

/// Greedy ancestor-fee-rate selection up to `max_block_size` bytes
/// (minus the coinbase reserve). Any entry whose parents have not been
/// selected yet is skipped; later entries may still fit.
pub fn select_transactions(mempool: &Mempool, max_block_size: i64) -> Selection {
    let budget = max_block_size - COINBASE_RESERVE;

    let mut ordered: Vec<&MempoolEntry> = mempool.entries().collect();
    ordered.sort_by(|a, b| {
        b.ancestor_fee_rate()
            .cmp(&a.ancestor_fee_rate())
            .then_with(|| a.tx_hash.cmp(&b.tx_hash))
    });

    let mut selection = Selection::default();
    let mut selected: HashSet<Hash> = HashSet::new();

    for entry in ordered {
        if selection.total_size + entry.size > budget {
            continue;
        }
        if !entry.parents.iter().all(|p| selected.contains(p)) {
            continue;
        }

        selected.insert(entry.tx_hash);
        selection.txids.push(entry.tx_hash);
        selection.transactions.push(entry.tx.clone());
        selection.total_size += entry.size;
        selection.total_fees += entry.fee;
    }

    selection
}

/// Package selection: each root entry (no in-pool parents) plus all its
/// descendants form one atomic unit, taken or skipped whole, best
/// fee-rate roots first.
pub fn select_packages(mempool: &Mempool, max_block_size: i64) -> Vec<Selection> {
    let budget = max_block_size - COINBASE_RESERVE;

    let mut roots: Vec<&MempoolEntry> = mempool
        .entries()
        .filter(|e| e.parents.is_empty())
        .collect();
    roots.sort_by(|a, b| {
        b.fee_rate
            .cmp(&a.fee_rate)
            .then_with(|| a.tx_hash.cmp(&b.tx_hash))
    });

    let mut packages = Vec::new();
    let mut taken: HashSet<Hash> = HashSet::new();
    let mut used: i64 = 0;

    for root in roots {
        if taken.contains(&root.tx_hash) {
            continue;
        }

        let mut package = Selection::default();
        let mut members = vec![root.tx_hash];
        members.extend(mempool.descendants_of(&root.tx_hash));

        for txid in &members {
            if let Some(entry) = mempool.get(txid) {
                package.txids.push(*txid);
                package.transactions.push(entry.tx.clone());
                package.total_size += entry.size;
                package.total_fees += entry.fee;
            }
        }

        if used + package.total_size > budget {
            continue;
        }
        used += package.total_size;
        taken.extend(members);
        packages.push(package);
    }

    packages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::MempoolConfig;
    use crate::types::{OutPoint, TxInput, TxOutput};

    fn tx_spending(prev: OutPoint, value: i64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev,
                sig_script: vec![0u8; 30],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value,
                pub_key_script: vec![0u8; 25],
            }],
            lock_time: 0,
        }
    }

    fn pool() -> Mempool {
        Mempool::new(MempoolConfig::default())
    }

    #[test]
    fn test_selection_orders_by_fee_rate() {
        let mut mempool = pool();
        let low = mempool
            .add(tx_spending(OutPoint::new(Hash::new([1u8; 32]), 0), 1000), 200, 0)
            .unwrap();
        let high = mempool
            .add(tx_spending(OutPoint::new(Hash::new([2u8; 32]), 0), 1000), 20_000, 0)
            .unwrap();

        let selection = select_transactions(&mempool, 1_000_000);
        assert_eq!(selection.txids, vec![high, low]);
        assert_eq!(selection.total_fees, 20_200);
    }

    #[test]
    fn test_parents_selected_before_children() {
        let mut mempool = pool();
        // Parent has a low own fee; the child pays richly, pulling the
        // package's ancestor fee rate up.
        let parent_id = mempool
            .add(tx_spending(OutPoint::new(Hash::new([1u8; 32]), 0), 100_000), 200, 0)
            .unwrap();
        let child_id = mempool
            .add(tx_spending(OutPoint::new(parent_id, 0), 90_000), 50_000, 0)
            .unwrap();

        let selection = select_transactions(&mempool, 1_000_000);
        let parent_pos = selection.txids.iter().position(|t| t == &parent_id);
        let child_pos = selection.txids.iter().position(|t| t == &child_id);
        assert!(parent_pos.is_some() && child_pos.is_some());
        assert!(parent_pos < child_pos);
    }

    #[test]
    fn test_size_budget_respected() {
        let mut mempool = pool();
        for seed in 1..=20u8 {
            mempool
                .add(
                    tx_spending(OutPoint::new(Hash::new([seed; 32]), 0), 1000),
                    10_000,
                    0,
                )
                .unwrap();
        }

        // Budget for roughly three transactions plus the coinbase reserve.
        let entry_size = mempool.entries().next().unwrap().size;
        let selection = select_transactions(&mempool, COINBASE_RESERVE + entry_size * 3 + 10);
        assert_eq!(selection.transactions.len(), 3);
        assert!(selection.total_size <= entry_size * 3 + 10);
    }

    #[test]
    fn test_package_selection_atomic() {
        let mut mempool = pool();
        let root_id = mempool
            .add(tx_spending(OutPoint::new(Hash::new([1u8; 32]), 0), 100_000), 1_000, 0)
            .unwrap();
        let child_id = mempool
            .add(tx_spending(OutPoint::new(root_id, 0), 90_000), 1_000, 0)
            .unwrap();
        let lone_id = mempool
            .add(tx_spending(OutPoint::new(Hash::new([2u8; 32]), 0), 1000), 5_000, 0)
            .unwrap();

        let packages = select_packages(&mempool, 1_000_000);
        assert_eq!(packages.len(), 2);

        let family: &Selection = packages
            .iter()
            .find(|p| p.txids.contains(&root_id))
            .unwrap();
        assert!(family.txids.contains(&child_id));
        assert_eq!(family.txids.len(), 2);

        let lone: &Selection = packages
            .iter()
            .find(|p| p.txids.contains(&lone_id))
            .unwrap();
        assert_eq!(lone.txids.len(), 1);
    }
}
