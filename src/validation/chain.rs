//! Chain-level validation: accepting blocks onto the stored chain

use super::block::BlockValidator;
use crate::codec::block::block_hash;
use crate::consensus::Network;
use crate::error::{NodeError, Result};
use crate::storage::ChainStore;
use crate::types::{Block, ChainTip, Hash};
use crate::utxo::UtxoSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of offering a block to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Block validated, applied, and persisted at this height.
    Connected { height: u64 },
    /// Block already stored; the call was a no-op.
    AlreadyKnown,
    /// Parent is not our tip; the caller should consult the reorg engine.
    NotOnTip,
}

pub struct ChainValidator {
    store: Arc<ChainStore>,
    validator: BlockValidator,
}

impl ChainValidator {
    pub fn new(network: Network, store: Arc<ChainStore>) -> Self {
        ChainValidator {
            store,
            validator: BlockValidator::new(network),
        }
    }

    pub fn validator(&self) -> &BlockValidator {
        &self.validator
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    /// Validate and connect a block extending the current tip. The UTXO
    /// apply and the storage batch succeed or fail together: a storage
    /// failure rolls the UTXO set back via the undo record.
    pub fn accept_block(&self, block: &Block, utxo_set: &mut UtxoSet) -> Result<AcceptOutcome> {
        let hash = block_hash(&block.header);

        // Double submission is idempotent.
        if self.store.has_block(&hash)? {
            return Ok(AcceptOutcome::AlreadyKnown);
        }

        let (height, prev_hash) = match self.store.tip()? {
            None => {
                if !block.header.prev.is_zero() {
                    return Err(NodeError::Consensus(
                        "first block must have a zero parent".into(),
                    ));
                }
                (0, Hash::ZERO)
            }
            Some(ChainTip {
                best_hash,
                best_height,
            }) => {
                if block.header.prev != best_hash {
                    return Ok(AcceptOutcome::NotOnTip);
                }
                (best_height + 1, best_hash)
            }
        };

        self.validator
            .validate_block(block, height, prev_hash, utxo_set)?;

        let undo = self.validator.apply_block(block, height, utxo_set)?;

        if let Err(e) = self.store.save_block(block, height, &undo) {
            warn!(%hash, "block save failed, rolling back UTXO changes");
            self.validator.revert_block(block, &undo, utxo_set)?;
            return Err(e);
        }

        info!(height, %hash, txs = block.transactions.len(), "block connected");
        Ok(AcceptOutcome::Connected { height })
    }

    /// Block locator: recent hashes densely, then exponentially growing
    /// gaps, always ending with genesis.
    pub fn block_locator(&self) -> Result<Vec<Hash>> {
        let tip = match self.store.tip()? {
            Some(tip) => tip,
            None => return Ok(Vec::new()),
        };

        let mut locator = Vec::new();
        let mut step: u64 = 1;
        let mut height = tip.best_height as i64;

        while height > 0 {
            if let Some(hash) = self.store.get_hash_by_height(height as u64)? {
                locator.push(hash);
            }
            if locator.len() >= 10 {
                step *= 2;
            }
            height -= step as i64;
        }

        if let Some(genesis) = self.store.get_hash_by_height(0)? {
            if locator.last() != Some(&genesis) {
                locator.push(genesis);
            }
        }

        Ok(locator)
    }

    /// Replay the whole stored chain through a fresh UTXO set; returns
    /// the reconstructed set on success.
    pub fn verify_chain(&self) -> Result<UtxoSet> {
        let tip = match self.store.tip()? {
            Some(tip) => tip,
            None => return Ok(UtxoSet::new()),
        };

        let mut utxo_set = UtxoSet::new();
        let mut prev_hash = Hash::ZERO;

        for height in 0..=tip.best_height {
            let block = self.store.get_block_by_height(height)?.ok_or_else(|| {
                NodeError::Storage(format!("missing block at height {}", height))
            })?;

            self.validator
                .validate_block(&block, height, prev_hash, &utxo_set)
                .map_err(|e| {
                    NodeError::Consensus(format!("block at height {} invalid: {}", height, e))
                })?;
            self.validator.apply_block(&block, height, &mut utxo_set)?;

            prev_hash = block_hash(&block.header);
        }

        Ok(utxo_set)
    }
}
