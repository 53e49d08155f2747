//! Sync manager: inventory exchange, block download, and relay decisions
//!
//! Tracks requested blocks to dedupe downloads, stashes orphans until
//! their parents arrive, keeps candidate side branches, and feeds the
//! chain validator and reorg engine. Handlers mutate shared state first
//! and send responses after every lock is released.

use super::message::{GetBlocksMessage, InvType, InventoryItem, NetworkMessage};
use super::peer::PeerHandle;
use crate::codec::block::block_hash;
use crate::codec::tx::tx_hash;
use crate::error::{NodeError, Result};
use crate::mempool::policy::Policy;
use crate::mempool::Mempool;
use crate::reorg::ReorgManager;
use crate::types::{Block, Hash, Transaction};
use crate::utxo::UtxoSet;
use crate::validation::chain::{AcceptOutcome, ChainValidator};
use crate::validation::validate_transaction;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Cap on inv entries returned for one getblocks request.
const MAX_GETBLOCKS_RESPONSE: u64 = 500;

pub struct SyncManager {
    chain: Arc<ChainValidator>,
    reorg: ReorgManager,
    utxo: Arc<RwLock<UtxoSet>>,
    mempool: Arc<RwLock<Mempool>>,
    policy: Policy,
    /// Outstanding block downloads: hash -> peer asked.
    requested: Mutex<HashMap<Hash, SocketAddr>>,
    /// Blocks whose parent we have not seen: parent hash -> blocks.
    orphans: Mutex<HashMap<Hash, Vec<Block>>>,
    /// Competing branches by their tip hash; grown until heavy enough
    /// to trigger a reorganization.
    side_branches: Mutex<HashMap<Hash, Vec<Block>>>,
}

impl SyncManager {
    pub fn new(
        chain: Arc<ChainValidator>,
        reorg: ReorgManager,
        utxo: Arc<RwLock<UtxoSet>>,
        mempool: Arc<RwLock<Mempool>>,
        policy: Policy,
    ) -> Self {
        SyncManager {
            chain,
            reorg,
            utxo,
            mempool,
            policy,
            requested: Mutex::new(HashMap::new()),
            orphans: Mutex::new(HashMap::new()),
            side_branches: Mutex::new(HashMap::new()),
        }
    }

    pub fn requested_count(&self) -> usize {
        self.requested.lock().unwrap().len()
    }

    /// Height of our best block, if any chain exists yet.
    pub fn chain_tip_height(&self) -> Option<u64> {
        self.chain
            .store()
            .tip()
            .ok()
            .flatten()
            .map(|tip| tip.best_height)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Kick off sync with a freshly ready peer.
    pub async fn start_sync(&self, peer: &PeerHandle) -> Result<()> {
        let locator = self.chain.block_locator()?;
        peer.send(NetworkMessage::GetBlocks(GetBlocksMessage::new(
            locator,
            Hash::ZERO,
        )))
        .await
    }

    /// Inventory announcement: request everything we miss, once.
    pub async fn handle_inv(&self, items: Vec<InventoryItem>, peer: &PeerHandle) -> Result<()> {
        let mut wanted = Vec::new();
        {
            let mut requested = self.requested.lock().unwrap();
            let mempool = self.mempool.read().unwrap();
            for item in items {
                match item.inv_type {
                    InvType::Block => {
                        if self.chain.store().has_block(&item.hash)? {
                            continue;
                        }
                        if requested.contains_key(&item.hash) {
                            continue;
                        }
                        requested.insert(item.hash, peer.addr);
                        wanted.push(item);
                    }
                    InvType::Tx => {
                        if !mempool.contains(&item.hash) {
                            wanted.push(item);
                        }
                    }
                }
            }
        }

        if !wanted.is_empty() {
            peer.send(NetworkMessage::GetData(wanted)).await?;
        }
        Ok(())
    }

    /// A block arrived. Connect it, grow a side branch, or stash it as an
    /// orphan; unlocked orphans are re-fed through the same pipeline.
    pub async fn handle_block(&self, block: Block, peer: &PeerHandle) -> Result<()> {
        let mut queue = VecDeque::from([block]);
        let mut requested_parent = false;

        while let Some(block) = queue.pop_front() {
            let hash = block_hash(&block.header);
            self.requested.lock().unwrap().remove(&hash);

            if self.chain.store().has_block(&hash)? {
                continue;
            }

            let outcome = {
                let mut utxo = self.utxo.write().unwrap();
                self.chain.accept_block(&block, &mut utxo)
            };

            match outcome {
                Ok(AcceptOutcome::Connected { height }) => {
                    info!(height, %hash, from = %peer.addr, "synced block");
                    self.on_block_connected(&block, height);
                    self.drain_orphans(&hash, &mut queue);
                }
                Ok(AcceptOutcome::AlreadyKnown) => {}
                Ok(AcceptOutcome::NotOnTip) => {
                    if self.try_branch(block.clone())? {
                        self.drain_orphans(&hash, &mut queue);
                    } else {
                        // Unknown parent: orphan. Ask the sender for the
                        // gap once per delivery.
                        debug!(%hash, parent = %block.header.prev, "orphan block stashed");
                        self.orphans
                            .lock()
                            .unwrap()
                            .entry(block.header.prev)
                            .or_default()
                            .push(block);
                        if !requested_parent {
                            requested_parent = true;
                            self.start_sync(peer).await?;
                        }
                    }
                }
                Err(e) => {
                    warn!(%hash, from = %peer.addr, "block rejected: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Attach a block to the main chain off-tip or to a tracked side
    /// branch and hand the result to the reorg engine. Returns false when
    /// the block attaches to nothing we know.
    fn try_branch(&self, block: Block) -> Result<bool> {
        let parent = block.header.prev;
        let hash = block_hash(&block.header);

        let branch = {
            let mut branches = self.side_branches.lock().unwrap();
            if let Some(mut existing) = branches.remove(&parent) {
                existing.push(block);
                existing
            } else if self.chain.store().get_block_height(&parent)?.is_some() {
                vec![block]
            } else {
                return Ok(false);
            }
        };

        let switched = {
            let mut utxo = self.utxo.write().unwrap();
            let mut mempool = self.mempool.write().unwrap();
            match self.reorg.handle_reorg(&branch, &mut utxo, &mut mempool) {
                Ok(Some(outcome)) => {
                    mempool.set_height(
                        self.chain
                            .store()
                            .tip()?
                            .map(|t| t.best_height)
                            .unwrap_or(0),
                    );
                    info!(?outcome, "switched to heavier branch");
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!("branch rejected: {}", e);
                    return Err(e);
                }
            }
        };

        if !switched {
            // Keep the branch around, keyed by its new tip.
            self.side_branches.lock().unwrap().insert(hash, branch);
        }
        Ok(true)
    }

    /// Mempool bookkeeping after a block joins the main chain.
    fn on_block_connected(&self, block: &Block, height: u64) {
        let mut mempool = self.mempool.write().unwrap();
        for tx in &block.transactions {
            mempool.remove_confirmed(&tx_hash(tx));
        }
        mempool.set_height(height);
    }

    /// Move any orphans waiting on `parent` into the processing queue.
    fn drain_orphans(&self, parent: &Hash, queue: &mut VecDeque<Block>) {
        if let Some(children) = self.orphans.lock().unwrap().remove(parent) {
            for child in children {
                queue.push_back(child);
            }
        }
    }

    /// Serve a locator request: find the most recent common block and
    /// enumerate up to 500 successors.
    pub async fn handle_getblocks(
        &self,
        msg: GetBlocksMessage,
        peer: &PeerHandle,
    ) -> Result<()> {
        let mut start_height = None;
        for hash in &msg.locator {
            if let Some(height) = self.chain.store().get_block_height(hash)? {
                start_height = Some(height);
                break;
            }
        }

        let start = match start_height {
            Some(height) => height,
            None => return Ok(()),
        };

        let mut inventory = Vec::new();
        for offset in 1..=MAX_GETBLOCKS_RESPONSE {
            match self.chain.store().get_hash_by_height(start + offset)? {
                Some(hash) => {
                    inventory.push(InventoryItem::block(hash));
                    if hash == msg.hash_stop {
                        break;
                    }
                }
                None => break,
            }
        }

        if !inventory.is_empty() {
            peer.send(NetworkMessage::Inv(inventory)).await?;
        }
        Ok(())
    }

    /// Fulfill getdata: known blocks and transactions are sent, the rest
    /// is reported as notfound.
    pub async fn handle_getdata(
        &self,
        items: Vec<InventoryItem>,
        peer: &PeerHandle,
    ) -> Result<()> {
        let mut responses = Vec::new();
        let mut missing = Vec::new();

        for item in items {
            match item.inv_type {
                InvType::Block => match self.chain.store().get_block(&item.hash)? {
                    Some(block) => responses.push(NetworkMessage::Block(Box::new(block))),
                    None => missing.push(item),
                },
                InvType::Tx => {
                    let pooled = {
                        let mempool = self.mempool.read().unwrap();
                        mempool.get(&item.hash).map(|e| e.tx.clone())
                    };
                    match pooled {
                        Some(tx) => responses.push(NetworkMessage::Tx(tx)),
                        None => match self.chain.store().get_transaction(&item.hash)? {
                            Some(tx) => responses.push(NetworkMessage::Tx(tx)),
                            None => missing.push(item),
                        },
                    }
                }
            }
        }

        for response in responses {
            peer.send(response).await?;
        }
        if !missing.is_empty() {
            peer.send(NetworkMessage::NotFound(missing)).await?;
        }
        Ok(())
    }

    /// A relayed transaction: resolve its inputs, apply policy, admit to
    /// the mempool. Returns the txid when admitted so the caller can
    /// relay the inventory onward.
    pub fn handle_tx(&self, tx: Transaction) -> Result<Option<Hash>> {
        let txid = tx_hash(&tx);

        {
            let mempool = self.mempool.read().unwrap();
            if mempool.contains(&txid) {
                return Ok(None);
            }
        }

        validate_transaction(&tx)?;

        let fee = match self.resolve_fee(&tx)? {
            Some(fee) => fee,
            None => {
                debug!(%txid, "dropping tx with unresolvable inputs");
                return Ok(None);
            }
        };

        self.policy.validate(&tx, fee)?;

        let mut mempool = self.mempool.write().unwrap();
        self.policy.check_ancestor_limits(&mempool, &tx)?;
        self.policy.check_descendant_limits(&mempool, &tx)?;
        let height = mempool.current_height();
        mempool.add(tx, fee, height)?;

        Ok(Some(txid))
    }

    /// Fee = inputs - outputs, resolving each input against the mempool,
    /// the UTXO set, then the confirmed-transaction index.
    fn resolve_fee(&self, tx: &Transaction) -> Result<Option<i64>> {
        let mut total_in: i64 = 0;

        for input in &tx.inputs {
            let value = {
                let mempool = self.mempool.read().unwrap();
                mempool
                    .get(&input.prev.tx_hash)
                    .and_then(|entry| entry.tx.outputs.get(input.prev.index as usize))
                    .map(|o| o.value)
            };
            let value = match value {
                Some(v) => Some(v),
                None => {
                    let utxo = self.utxo.read().unwrap();
                    utxo.get(&input.prev).map(|u| u.value())
                }
            };
            let value = match value {
                Some(v) => Some(v),
                None => self
                    .chain
                    .store()
                    .get_transaction(&input.prev.tx_hash)?
                    .and_then(|prev| prev.outputs.get(input.prev.index as usize).map(|o| o.value)),
            };

            match value {
                Some(v) => total_in += v,
                None => return Ok(None),
            }
        }

        let fee = total_in - tx.total_output_value();
        if fee < 0 {
            return Err(NodeError::Structural("outputs exceed inputs".into()));
        }
        Ok(Some(fee))
    }
}
