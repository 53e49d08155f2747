//! Mempool scenarios: replacement, eviction pressure, selection, and
//! fee estimation against a populated pool.

use bitnode::mempool::fee::{transaction_size, FeeEstimator};
use bitnode::mempool::select::select_transactions;
use bitnode::mempool::{Mempool, MempoolConfig};
use bitnode::types::{Hash, OutPoint, Transaction, TxInput, TxOutput};

fn tx_spending(prev: OutPoint, value: i64, sequence: u32) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev,
            sig_script: vec![0u8; 30],
            sequence,
        }],
        outputs: vec![TxOutput {
            value,
            pub_key_script: vec![0u8; 25],
        }],
        lock_time: 0,
    }
}

#[test]
fn rbf_replacement_leaves_single_entry() {
    // S3: tx2 replaces tx1 on the same outpoint; pool size ends at 1.
    let mut mempool = Mempool::new(MempoolConfig {
        max_bytes: 1_000_000,
        min_fee_rate: 1,
        max_age_seconds: 3600,
    });

    let outpoint = OutPoint::new(Hash::new([0xAB; 32]), 0);
    let tx1 = tx_spending(outpoint, 100_000, 0xFFFF_FFFD);
    let txid1 = mempool.add(tx1, 5_000, 0).unwrap();

    let tx2 = tx_spending(outpoint, 99_000, 0xFFFF_FFFD);
    let txid2 = mempool.add(tx2, 15_000, 0).unwrap();

    assert!(!mempool.contains(&txid1));
    assert!(mempool.contains(&txid2));
    assert_eq!(mempool.len(), 1);
}

#[test]
fn eviction_admits_high_fee_transaction() {
    // S6: a full pool of 1 sat/byte entries makes room for a 100 sat/byte
    // arrival by evicting from the bottom.
    let mut mempool = Mempool::new(MempoolConfig {
        max_bytes: 10_000,
        min_fee_rate: 1,
        max_age_seconds: 3600,
    });

    let mut filler = Vec::new();
    let mut seed = 0u8;
    loop {
        seed += 1;
        let tx = tx_spending(OutPoint::new(Hash::new([seed; 32]), 0), 1000, 0xFFFF_FFFF);
        let size = transaction_size(&tx);
        if mempool.current_bytes() + size > 10_000 {
            break;
        }
        filler.push(mempool.add(tx, size, 0).unwrap());
    }
    let filled = mempool.len();
    assert!(filled > 10);

    let premium = tx_spending(OutPoint::new(Hash::new([0xEE; 32]), 0), 1000, 0xFFFF_FFFF);
    let premium_size = transaction_size(&premium);
    let premium_id = mempool.add(premium, premium_size * 100, 0).unwrap();

    assert!(mempool.contains(&premium_id));
    assert!(mempool.current_bytes() <= 10_000);
    assert!(mempool.len() <= filled);
    assert!(filler.iter().any(|id| !mempool.contains(id)));
}

#[test]
fn ancestor_invariant_holds_across_package() {
    // For every entry: ancestor_fee == fee + sum of parents' ancestor_fee
    // (tree-shaped packages), and symmetrically for size.
    let mut mempool = Mempool::new(MempoolConfig::default());

    let root = tx_spending(OutPoint::new(Hash::new([1u8; 32]), 0), 500_000, 0xFFFF_FFFF);
    let root_id = mempool.add(root, 1_000, 0).unwrap();
    let mid = tx_spending(OutPoint::new(root_id, 0), 400_000, 0xFFFF_FFFF);
    let mid_id = mempool.add(mid, 2_000, 0).unwrap();
    let leaf = tx_spending(OutPoint::new(mid_id, 0), 300_000, 0xFFFF_FFFF);
    let leaf_id = mempool.add(leaf, 4_000, 0).unwrap();

    for txid in [root_id, mid_id, leaf_id] {
        let entry = mempool.get(&txid).unwrap();
        let parent_fee: i64 = entry
            .parents
            .iter()
            .map(|p| mempool.get(p).unwrap().ancestor_fee)
            .sum();
        let parent_size: i64 = entry
            .parents
            .iter()
            .map(|p| mempool.get(p).unwrap().ancestor_size)
            .sum();
        assert_eq!(entry.ancestor_fee, entry.fee + parent_fee);
        assert_eq!(entry.ancestor_size, entry.size + parent_size);
    }
}

#[test]
fn selection_respects_dependencies_under_budget() {
    let mut mempool = Mempool::new(MempoolConfig::default());

    // Low-fee parent with a high-fee child, plus independent mid-fee noise.
    let parent = tx_spending(OutPoint::new(Hash::new([1u8; 32]), 0), 500_000, 0xFFFF_FFFF);
    let parent_id = mempool.add(parent, 150, 0).unwrap();
    let child = tx_spending(OutPoint::new(parent_id, 0), 400_000, 0xFFFF_FFFF);
    let child_id = mempool.add(child, 60_000, 0).unwrap();

    for seed in 10..20u8 {
        let tx = tx_spending(OutPoint::new(Hash::new([seed; 32]), 0), 10_000, 0xFFFF_FFFF);
        mempool.add(tx, 1_000, 0).unwrap();
    }

    let selection = select_transactions(&mempool, 1_000_000);
    let pos_parent = selection.txids.iter().position(|t| t == &parent_id).unwrap();
    let pos_child = selection.txids.iter().position(|t| t == &child_id).unwrap();
    assert!(pos_parent < pos_child);
    assert_eq!(selection.transactions.len(), 12);
}

#[test]
fn fee_estimation_scales_with_target() {
    let mut mempool = Mempool::new(MempoolConfig::default());

    // A spread of fee rates: 10, 20, ..., 1000 sat/byte.
    for i in 1..=100u32 {
        let tx = tx_spending(
            OutPoint::new(Hash::new([(i % 250) as u8; 32]), i),
            10_000,
            0xFFFF_FFFF,
        );
        let size = transaction_size(&tx);
        mempool.add(tx, size * (i as i64) * 10, 0).unwrap();
    }

    let next_block = FeeEstimator::estimate_fee(&mempool, 1, 250);
    let three_blocks = FeeEstimator::estimate_fee(&mempool, 3, 250);
    let six_blocks = FeeEstimator::estimate_fee(&mempool, 6, 250);
    let ten_blocks = FeeEstimator::estimate_fee(&mempool, 10, 250);

    // Tighter targets demand higher rates.
    assert!(next_block >= three_blocks);
    assert!(three_blocks >= six_blocks);
    assert!(six_blocks >= ten_blocks);
    // Never below the pool minimum.
    assert!(ten_blocks >= 250);

    let stats = FeeEstimator::statistics(&mempool);
    assert_eq!(stats.tx_count, 100);
    assert!(stats.min_fee_rate <= stats.median_fee_rate);
    assert!(stats.median_fee_rate <= stats.max_fee_rate);
    assert!(stats.p25_fee_rate <= stats.p75_fee_rate);
    assert!(stats.p75_fee_rate <= stats.p90_fee_rate);
}

#[test]
fn expiry_sweeps_whole_packages() {
    let mut mempool = Mempool::new(MempoolConfig {
        max_bytes: 1_000_000,
        min_fee_rate: 1,
        max_age_seconds: 0, // disabled
    });

    let tx = tx_spending(OutPoint::new(Hash::new([1u8; 32]), 0), 1000, 0xFFFF_FFFF);
    mempool.add(tx, 1_000, 0).unwrap();

    // Age-based expiry disabled: nothing leaves.
    assert_eq!(mempool.expire_transactions(), 0);
    assert_eq!(mempool.len(), 1);
}
