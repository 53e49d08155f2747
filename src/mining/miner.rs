//! Proof-of-work search

use super::{build_block_from_template, BlockTemplate};
use crate::codec::block::block_hash;
use crate::consensus::pow::check_proof_of_work;
use crate::consensus::Network;
use crate::error::{NodeError, Result};
use crate::types::Block;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Shutdown is polled once per chunk of hashes.
const SHUTDOWN_CHECK_INTERVAL: u32 = 100_000;

#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    pub attempts: u64,
    pub elapsed_secs: f64,
    pub hash_rate: f64,
    pub last_nonce: u32,
}

pub enum MineResult {
    /// A nonce satisfying the target was found.
    Mined(Block),
    /// The shutdown signal fired mid-search.
    Interrupted,
}

pub struct Miner {
    network: Network,
    shutdown: Arc<AtomicBool>,
    stats: MiningStats,
}

impl Miner {
    pub fn new(network: Network, shutdown: Arc<AtomicBool>) -> Self {
        Miner {
            network,
            shutdown,
            stats: MiningStats::default(),
        }
    }

    pub fn stats(&self) -> &MiningStats {
        &self.stats
    }

    /// Iterate the nonce from zero until the block hash meets the
    /// difficulty. Exhausting the u32 nonce space is an error; the caller
    /// bumps the timestamp or extra nonce and retries.
    pub fn mine_block(&mut self, template: &BlockTemplate) -> Result<MineResult> {
        let start = Instant::now();
        self.stats = MiningStats::default();

        // The merkle root is nonce-independent; build once and patch the
        // header nonce in the loop.
        let mut block = build_block_from_template(template, 0);

        let mut nonce: u32 = 0;
        loop {
            block.header.nonce = nonce;
            let hash = block_hash(&block.header);
            self.stats.attempts += 1;

            if check_proof_of_work(self.network, &hash, block.header.bits).is_ok() {
                self.finish_stats(start, nonce);
                info!(
                    %hash,
                    nonce,
                    attempts = self.stats.attempts,
                    hash_rate = self.stats.hash_rate,
                    "block mined"
                );
                return Ok(MineResult::Mined(block));
            }

            if nonce % SHUTDOWN_CHECK_INTERVAL == 0 {
                if self.shutdown.load(Ordering::Relaxed) {
                    self.finish_stats(start, nonce);
                    debug!(attempts = self.stats.attempts, "mining interrupted");
                    return Ok(MineResult::Interrupted);
                }
                if nonce > 0 {
                    debug!(attempts = self.stats.attempts, nonce, "mining progress");
                }
            }

            nonce = nonce.wrapping_add(1);
            if nonce == 0 {
                self.finish_stats(start, u32::MAX);
                return Err(NodeError::Mining(
                    "nonce space exhausted; bump timestamp or extra nonce".into(),
                ));
            }
        }
    }

    fn finish_stats(&mut self, start: Instant, nonce: u32) {
        let elapsed = start.elapsed().as_secs_f64();
        self.stats.elapsed_secs = elapsed;
        self.stats.last_nonce = nonce;
        if elapsed > 0.0 {
            self.stats.hash_rate = self.stats.attempts as f64 / elapsed;
        }
    }
}
