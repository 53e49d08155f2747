//! Block-level consensus validation and UTXO application

use super::{validate_coinbase, validate_transaction};
use crate::codec::block::{block_hash, block_size};
use crate::codec::tx::tx_hash;
use crate::consensus::pow::check_proof_of_work;
use crate::consensus::{check_block_reward, Network, MAX_BLOCK_SIZE};
use crate::crypto::merkle::compute_merkle_root;
use crate::error::{NodeError, Result};
use crate::script::{Engine, TxContext};
use crate::storage::BlockUndo;
use crate::types::{Block, Hash, Transaction};
use crate::utxo::UtxoSet;
use secp256k1::{All, Secp256k1};
use tracing::debug;

/// Validates blocks against a UTXO view and applies or reverts them.
pub struct BlockValidator {
    network: Network,
    secp: Secp256k1<All>,
}

impl BlockValidator {
    pub fn new(network: Network) -> Self {
        BlockValidator {
            network,
            secp: Secp256k1::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Full consensus check of `block` at `height` on top of `prev_hash`.
    /// Returns the total fees collected by its transactions.
    pub fn validate_block(
        &self,
        block: &Block,
        height: u64,
        prev_hash: Hash,
        utxo_set: &UtxoSet,
    ) -> Result<i64> {
        if block.header.prev != prev_hash {
            return Err(NodeError::Consensus(format!(
                "previous block hash mismatch: header says {}, chain says {}",
                block.header.prev, prev_hash
            )));
        }

        let hash = block_hash(&block.header);
        check_proof_of_work(self.network, &hash, block.header.bits)?;

        let size = block_size(block);
        if size > MAX_BLOCK_SIZE {
            return Err(NodeError::Consensus(format!(
                "block too large: {} > {}",
                size, MAX_BLOCK_SIZE
            )));
        }

        if block.transactions.is_empty() {
            return Err(NodeError::Consensus("block has no transactions".into()));
        }
        if !block.transactions[0].is_coinbase() {
            return Err(NodeError::Consensus("first transaction is not coinbase".into()));
        }
        for (i, tx) in block.transactions.iter().enumerate().skip(1) {
            if tx.is_coinbase() {
                return Err(NodeError::Consensus(format!(
                    "coinbase at index {} (must be first)",
                    i
                )));
            }
        }

        validate_coinbase(
            &block.transactions[0],
            height,
            self.network.bip34_activation_height(),
        )?;

        let tx_hashes: Vec<Hash> = block.transactions.iter().map(tx_hash).collect();

        let mut seen = std::collections::HashSet::with_capacity(tx_hashes.len());
        for txid in &tx_hashes {
            if !seen.insert(*txid) {
                return Err(NodeError::Consensus(format!("duplicate transaction: {}", txid)));
            }
        }

        let computed_root = compute_merkle_root(&tx_hashes);
        if computed_root != block.header.merkle_root {
            return Err(NodeError::Consensus(format!(
                "merkle root mismatch: computed {}, header has {}",
                computed_root, block.header.merkle_root
            )));
        }

        let mut total_fees: i64 = 0;
        for (i, tx) in block.transactions.iter().enumerate().skip(1) {
            validate_transaction(tx)
                .map_err(|e| NodeError::Consensus(format!("transaction {}: {}", i, e)))?;
            let fee = self.check_inputs(tx, height, utxo_set)?;
            total_fees += fee;
        }

        let coinbase_total = block.transactions[0].total_output_value();
        check_block_reward(coinbase_total, total_fees, height)?;

        Ok(total_fees)
    }

    /// Check a transaction's inputs against the UTXO view: existence,
    /// coinbase maturity, script execution, and non-negative fee.
    fn check_inputs(&self, tx: &Transaction, height: u64, utxo_set: &UtxoSet) -> Result<i64> {
        let mut total_in: i64 = 0;

        for (index, input) in tx.inputs.iter().enumerate() {
            let spent = utxo_set.get(&input.prev).ok_or_else(|| {
                NodeError::Consensus(format!("input {}: UTXO not found: {}", index, input.prev))
            })?;

            if !spent.is_mature_at(height) {
                return Err(NodeError::Consensus(format!(
                    "input {}: coinbase from height {} immature at height {}",
                    index, spent.creation_height, height
                )));
            }

            let context = TxContext {
                tx,
                input_index: index,
                prev_script: &spent.output.pub_key_script,
            };
            let mut engine = Engine::with_context(&self.secp, context);
            let ok = engine
                .verify(&input.sig_script, &spent.output.pub_key_script)
                .map_err(|e| NodeError::Consensus(format!("input {}: {}", index, e)))?;
            if !ok {
                return Err(NodeError::Consensus(format!(
                    "input {}: script evaluated to false",
                    index
                )));
            }

            total_in += spent.value();
        }

        let total_out = tx.total_output_value();
        let fee = total_in - total_out;
        if fee < 0 {
            return Err(NodeError::Consensus(format!(
                "outputs exceed inputs: {} > {}",
                total_out, total_in
            )));
        }
        Ok(fee)
    }

    /// Apply each transaction in order; the returned undo record carries
    /// every consumed UTXO so the block can be fully reverted.
    pub fn apply_block(&self, block: &Block, height: u64, utxo_set: &mut UtxoSet) -> Result<BlockUndo> {
        let mut undo = BlockUndo::default();

        for (i, tx) in block.transactions.iter().enumerate() {
            let txid = tx_hash(tx);
            let spent = utxo_set
                .apply_transaction(tx, txid, height, i == 0)
                .map_err(|e| NodeError::Consensus(format!("apply transaction {}: {}", i, e)))?;
            undo.spent.extend(spent);
        }

        debug!(height, spent = undo.spent.len(), "block applied to UTXO set");
        Ok(undo)
    }

    /// Undo a block: delete the outputs it created (reverse order), then
    /// restore everything it spent from the undo record.
    pub fn revert_block(&self, block: &Block, undo: &BlockUndo, utxo_set: &mut UtxoSet) -> Result<()> {
        for tx in block.transactions.iter().rev() {
            let txid = tx_hash(tx);
            utxo_set.revert_transaction(tx, txid);
        }

        for utxo in &undo.spent {
            utxo_set.add(utxo.clone())?;
        }

        Ok(())
    }
}
