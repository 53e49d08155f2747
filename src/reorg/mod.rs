//! Chain reorganization
//!
//! Switches the active chain to a heavier competitor: disconnect back to
//! the fork point (restoring spent outputs from undo records), connect the
//! new branch under full validation, and offer orphaned transactions back
//! to the mempool. A failed connect restores the old chain.

use crate::codec::block::block_hash;
use crate::codec::tx::tx_hash;
use crate::consensus::checkpoints::CheckpointVerifier;
use crate::consensus::pow::block_work;
use crate::error::{NodeError, Result};
use crate::mempool::Mempool;
use crate::storage::ChainStore;
use crate::types::{Block, ChainTip, Hash};
use crate::utxo::UtxoSet;
use crate::validation::block::BlockValidator;
use primitive_types::U256;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// What a detection pass concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgDecision {
    /// The proposed branch has more work; switch at this fork height.
    Switch { fork_height: u64 },
    /// The current chain is at least as heavy; ignore the branch.
    Ignore,
    /// The branch does not attach to any stored block.
    Orphan,
}

/// Summary of a completed reorganization.
#[derive(Debug, Clone)]
pub struct ReorgOutcome {
    pub fork_height: u64,
    pub disconnected: usize,
    pub connected: usize,
    pub reintroduced: usize,
}

pub struct ReorgManager {
    store: Arc<ChainStore>,
    validator: BlockValidator,
    checkpoints: CheckpointVerifier,
}

impl ReorgManager {
    pub fn new(
        store: Arc<ChainStore>,
        validator: BlockValidator,
        checkpoints: CheckpointVerifier,
    ) -> Self {
        ReorgManager {
            store,
            validator,
            checkpoints,
        }
    }

    /// Compare total work of the proposed branch against the active chain.
    pub fn detect_reorg(&self, new_blocks: &[Block]) -> Result<ReorgDecision> {
        if new_blocks.is_empty() {
            return Err(NodeError::Consensus("no blocks provided".into()));
        }

        let fork_hash = new_blocks[0].header.prev;
        let fork_height = match self.store.get_block_height(&fork_hash)? {
            Some(height) => height,
            None => return Ok(ReorgDecision::Orphan),
        };

        let tip = self
            .store
            .tip()?
            .ok_or_else(|| NodeError::Storage("no chain tip".into()))?;

        let current_work = self.chain_work(0, tip.best_height)?;
        let mut new_work = self.chain_work(0, fork_height)?;
        for block in new_blocks {
            new_work = new_work + block_work(block.header.bits);
        }

        if new_work > current_work {
            Ok(ReorgDecision::Switch { fork_height })
        } else {
            Ok(ReorgDecision::Ignore)
        }
    }

    /// Detect and, if warranted, perform the switch.
    pub fn handle_reorg(
        &self,
        new_blocks: &[Block],
        utxo_set: &mut UtxoSet,
        mempool: &mut Mempool,
    ) -> Result<Option<ReorgOutcome>> {
        let fork_height = match self.detect_reorg(new_blocks)? {
            ReorgDecision::Switch { fork_height } => fork_height,
            ReorgDecision::Ignore => return Ok(None),
            ReorgDecision::Orphan => {
                return Err(NodeError::Consensus("branch does not attach to chain".into()));
            }
        };

        let tip = self
            .store
            .tip()?
            .ok_or_else(|| NodeError::Storage("no chain tip".into()))?;

        self.checkpoints
            .allows_rewind_to(fork_height, tip.best_height)?;

        info!(
            fork_height,
            old_tip = tip.best_height,
            branch_len = new_blocks.len(),
            "starting reorganization"
        );

        let disconnected = self.disconnect_to(fork_height, tip.best_height, utxo_set)?;

        match self.connect_branch(new_blocks, fork_height, utxo_set) {
            Ok(connected) => {
                let reintroduced =
                    self.reintroduce_transactions(&disconnected, new_blocks, utxo_set, mempool);
                let outcome = ReorgOutcome {
                    fork_height,
                    disconnected: disconnected.len(),
                    connected,
                    reintroduced,
                };
                info!(?outcome, "reorganization complete");
                Ok(Some(outcome))
            }
            Err(e) => {
                warn!(error = %e, "branch connect failed, restoring old chain");
                self.restore_chain(&disconnected, fork_height, utxo_set)?;
                Err(e)
            }
        }
    }

    /// Sum of per-block work over stored heights `from..=to`.
    fn chain_work(&self, from: u64, to: u64) -> Result<U256> {
        let mut total = U256::zero();
        for height in from..=to {
            let block = self
                .store
                .get_block_by_height(height)?
                .ok_or_else(|| NodeError::Storage(format!("missing block at height {}", height)))?;
            total = total + block_work(block.header.bits);
        }
        Ok(total)
    }

    /// Disconnect blocks from the tip down to (excluding) `fork_height`,
    /// tip-first. Returns the disconnected blocks, tip-first.
    fn disconnect_to(
        &self,
        fork_height: u64,
        tip_height: u64,
        utxo_set: &mut UtxoSet,
    ) -> Result<Vec<Block>> {
        let mut disconnected = Vec::new();

        for height in (fork_height + 1..=tip_height).rev() {
            let block = self
                .store
                .get_block_by_height(height)?
                .ok_or_else(|| NodeError::Storage(format!("missing block at height {}", height)))?;
            let hash = block_hash(&block.header);

            let undo = self.store.get_undo(&hash)?.ok_or_else(|| {
                NodeError::Storage(format!("missing undo record for block {}", hash))
            })?;

            self.validator.revert_block(&block, &undo, utxo_set)?;

            let parent_height = height - 1;
            let parent_hash = self
                .store
                .get_hash_by_height(parent_height)?
                .ok_or_else(|| {
                    NodeError::Storage(format!("missing block hash at height {}", parent_height))
                })?;
            self.store.rewind_tip(
                &block,
                ChainTip {
                    best_hash: parent_hash,
                    best_height: parent_height,
                },
            )?;

            disconnected.push(block);
        }

        Ok(disconnected)
    }

    /// Validate and connect branch blocks on top of the fork point.
    fn connect_branch(
        &self,
        blocks: &[Block],
        fork_height: u64,
        utxo_set: &mut UtxoSet,
    ) -> Result<usize> {
        let mut prev_hash = self
            .store
            .get_hash_by_height(fork_height)?
            .ok_or_else(|| NodeError::Storage("missing fork block".into()))?;

        for (i, block) in blocks.iter().enumerate() {
            let height = fork_height + 1 + i as u64;
            let hash = block_hash(&block.header);

            self.checkpoints.verify(height, &hash)?;
            self.validator
                .validate_block(block, height, prev_hash, utxo_set)
                .map_err(|e| {
                    NodeError::Consensus(format!("branch block at height {} invalid: {}", height, e))
                })?;

            let undo = self.validator.apply_block(block, height, utxo_set)?;
            self.store.save_block(block, height, &undo)?;

            prev_hash = hash;
        }

        Ok(blocks.len())
    }

    /// Undo a failed connect and re-apply the previously disconnected
    /// blocks (tip-first input, so re-apply in reverse).
    fn restore_chain(
        &self,
        disconnected: &[Block],
        fork_height: u64,
        utxo_set: &mut UtxoSet,
    ) -> Result<()> {
        // Unwind whatever part of the branch made it in.
        let tip = self
            .store
            .tip()?
            .ok_or_else(|| NodeError::Storage("no chain tip".into()))?;
        if tip.best_height > fork_height {
            self.disconnect_to(fork_height, tip.best_height, utxo_set)?;
        }

        for (i, block) in disconnected.iter().rev().enumerate() {
            let height = fork_height + 1 + i as u64;
            let undo = self.validator.apply_block(block, height, utxo_set)?;
            self.store.save_block(block, height, &undo)?;
        }
        Ok(())
    }

    /// Offer transactions confirmed only on the old branch back to the
    /// mempool; fees are recomputed against the post-reorg UTXO set and
    /// failures are dropped silently.
    fn reintroduce_transactions(
        &self,
        disconnected: &[Block],
        connected: &[Block],
        utxo_set: &UtxoSet,
        mempool: &mut Mempool,
    ) -> usize {
        let mut confirmed: HashSet<Hash> = HashSet::new();
        for block in connected {
            for tx in &block.transactions {
                confirmed.insert(tx_hash(tx));
            }
        }

        let height = self
            .store
            .tip()
            .ok()
            .flatten()
            .map(|t| t.best_height)
            .unwrap_or(0);

        let mut reintroduced = 0;
        // Oldest blocks first so parents precede children.
        for block in disconnected.iter().rev() {
            for tx in block.transactions.iter().skip(1) {
                let txid = tx_hash(tx);
                if confirmed.contains(&txid) {
                    continue;
                }

                let mut input_total = 0i64;
                let mut resolvable = true;
                for input in &tx.inputs {
                    match utxo_set.get(&input.prev) {
                        Some(utxo) => input_total += utxo.value(),
                        None => {
                            resolvable = false;
                            break;
                        }
                    }
                }
                if !resolvable {
                    continue;
                }

                let fee = input_total - tx.total_output_value();
                if fee < 0 {
                    continue;
                }
                if mempool.add(tx.clone(), fee, height).is_ok() {
                    reintroduced += 1;
                }
            }
        }
        reintroduced
    }
}
