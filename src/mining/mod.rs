//! Block assembly: coinbase construction and templates

pub mod miner;

pub use miner::{MineResult, Miner, MiningStats};

use crate::codec::tx::tx_hash;
use crate::consensus::block_subsidy;
use crate::crypto::merkle::compute_merkle_root;
use crate::script::p2pkh;
use crate::types::{Block, BlockHeader, Hash, OutPoint, Transaction, TxInput, TxOutput};
use crate::validation::encode_bip34_height;

/// Arbitrary tag appended to coinbase scripts this node mines.
const COINBASE_TAG: &[u8] = b"bitnode";

/// Build the coinbase transaction for a block at `height` paying
/// `subsidy + fees` to `miner_pubkey_hash`. The script starts with the
/// height push (BIP34), then the extra nonce, then the miner tag.
pub fn create_coinbase(
    height: u64,
    total_fees: i64,
    miner_pubkey_hash: &[u8; 20],
    extra_nonce: u64,
) -> Transaction {
    let encoded_height = encode_bip34_height(height);
    let mut script = Vec::with_capacity(1 + encoded_height.len() + 8 + COINBASE_TAG.len());
    script.push(encoded_height.len() as u8);
    script.extend_from_slice(&encoded_height);
    script.extend_from_slice(&extra_nonce.to_le_bytes());
    script.extend_from_slice(COINBASE_TAG);

    Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev: OutPoint::coinbase(),
            sig_script: script,
            sequence: 0xFFFF_FFFF,
        }],
        outputs: vec![TxOutput {
            value: block_subsidy(height) + total_fees,
            pub_key_script: p2pkh(miner_pubkey_hash),
        }],
        lock_time: 0,
    }
}

/// Everything a miner needs to search for a nonce.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub version: i32,
    pub prev: Hash,
    pub transactions: Vec<Transaction>,
    pub timestamp: u32,
    pub bits: u32,
    pub height: u64,
    pub total_fees: i64,
}

impl BlockTemplate {
    /// Assemble a template: coinbase first, then the selected
    /// transactions, timestamped now.
    pub fn assemble(
        prev: Hash,
        height: u64,
        miner_pubkey_hash: &[u8; 20],
        bits: u32,
        selected: Vec<Transaction>,
        total_fees: i64,
    ) -> BlockTemplate {
        let coinbase = create_coinbase(height, total_fees, miner_pubkey_hash, 0);
        let mut transactions = Vec::with_capacity(selected.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selected);

        BlockTemplate {
            version: 1,
            prev,
            transactions,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0),
            bits,
            height,
            total_fees,
        }
    }

    /// Replace the coinbase's extra nonce, e.g. after nonce exhaustion.
    pub fn bump_extra_nonce(&mut self, extra_nonce: u64, miner_pubkey_hash: &[u8; 20]) {
        self.transactions[0] =
            create_coinbase(self.height, self.total_fees, miner_pubkey_hash, extra_nonce);
    }
}

/// Materialize a block from a template with the given nonce; computes the
/// merkle root over the final transaction list.
pub fn build_block_from_template(template: &BlockTemplate, nonce: u32) -> Block {
    let header = BlockHeader {
        version: template.version,
        prev: template.prev,
        merkle_root: Hash::ZERO,
        timestamp: template.timestamp,
        bits: template.bits,
        nonce,
    };
    build_block(header, template.transactions.clone())
}

/// Fill in the merkle root for an ordered transaction list.
pub fn build_block(mut header: BlockHeader, transactions: Vec<Transaction>) -> Block {
    let tx_hashes: Vec<Hash> = transactions.iter().map(tx_hash).collect();
    header.merkle_root = compute_merkle_root(&tx_hashes);
    Block {
        header,
        transactions,
    }
}
