//! Node composition and lifecycle
//!
//! Wires storage, the UTXO set, mempool, validators, reorg engine,
//! wallet, miner, P2P, and RPC behind one start/stop surface. Shared
//! state lives in `Arc`s: the UTXO set behind a reader-writer lock with
//! validation on the write side, the mempool likewise.

use crate::codec::block::block_hash;
use crate::codec::tx::tx_hash;
use crate::config::NodeConfig;
use crate::consensus::checkpoints::CheckpointVerifier;
use crate::consensus::{Network, MAX_BLOCK_SIZE};
use crate::error::{NodeError, Result};
use crate::mempool::fee::FeeEstimator;
use crate::mempool::policy::Policy;
use crate::mempool::select::select_transactions;
use crate::mempool::{Mempool, MempoolConfig};
use crate::mining::{BlockTemplate, MineResult, Miner};
use crate::net::message::{InventoryItem, NetworkMessage};
use crate::net::sync::SyncManager;
use crate::net::{NetConfig, NetworkManager};
use crate::reorg::ReorgManager;
use crate::storage::ChainStore;
use crate::types::{Block, Hash, Transaction};
use crate::utxo::store::UtxoStore;
use crate::utxo::UtxoSet;
use crate::validation::block::BlockValidator;
use crate::validation::chain::{AcceptOutcome, ChainValidator};
use crate::wallet::Wallet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

/// Fallback fee for wallet sends when the estimator has no data.
const DEFAULT_SEND_FEE: i64 = 10_000;

pub struct Node {
    config: NodeConfig,
    network: Network,
    store: Arc<ChainStore>,
    chain: Arc<ChainValidator>,
    utxo: Arc<RwLock<UtxoSet>>,
    utxo_store: UtxoStore,
    mempool: Arc<RwLock<Mempool>>,
    wallet: Arc<RwLock<Wallet>>,
    net: Arc<NetworkManager>,
    mining_shutdown: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    pub fn new(config: NodeConfig) -> anyhow::Result<Arc<Node>> {
        config.validate()?;
        let network = config.network_params()?;

        let store = Arc::new(ChainStore::open(&config.data_dir)?);
        let chain = Arc::new(ChainValidator::new(network, Arc::clone(&store)));

        let utxo_store = UtxoStore::from_tree(store.tree());
        let utxo = Arc::new(RwLock::new(utxo_store.load_set()?));

        let mempool = Arc::new(RwLock::new(Mempool::new(MempoolConfig::default())));
        if let Some(tip) = store.tip()? {
            mempool.write().unwrap().set_height(tip.best_height);
        }

        let mut wallet = Wallet::new(network);
        wallet.rescan(&utxo.read().unwrap());
        let wallet = Arc::new(RwLock::new(wallet));

        let checkpoints = match network {
            Network::Mainnet => CheckpointVerifier::mainnet(),
            _ => CheckpointVerifier::new(false),
        };
        let reorg = ReorgManager::new(
            Arc::clone(&store),
            BlockValidator::new(network),
            checkpoints,
        );

        let sync = Arc::new(SyncManager::new(
            Arc::clone(&chain),
            reorg,
            Arc::clone(&utxo),
            Arc::clone(&mempool),
            Policy::default(),
        ));

        let initial_peers = config
            .initial_peers
            .iter()
            .filter_map(|p| p.parse::<SocketAddr>().ok())
            .collect();
        let net_config = NetConfig {
            listen_addr: config
                .p2p_addr()
                .parse()
                .map_err(|e| anyhow::anyhow!("bad p2p address: {}", e))?,
            network,
            user_agent: config.user_agent(),
            initial_peers,
        };
        let net = Arc::new(NetworkManager::new(net_config, sync));

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Node {
            config,
            network,
            store,
            chain,
            utxo,
            utxo_store,
            mempool,
            wallet,
            net,
            mining_shutdown: Arc::new(AtomicBool::new(false)),
            shutdown,
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    pub fn peer_count(&self) -> usize {
        self.net.peer_count()
    }

    /// Start networking, RPC, and (if configured) the auto-mine ticker.
    pub async fn start(self: &Arc<Node>) -> anyhow::Result<()> {
        info!(
            node_id = %self.config.node_id,
            network = %self.network.name(),
            "starting node"
        );

        self.net.start().await?;

        let rpc_node = Arc::clone(self);
        let rpc_addr: SocketAddr = self
            .config
            .rpc_addr()
            .parse()
            .map_err(|e| anyhow::anyhow!("bad rpc address: {}", e))?;
        tokio::spawn(async move {
            if let Err(e) = crate::rpc::serve(rpc_node, rpc_addr).await {
                warn!("rpc server exited: {}", e);
            }
        });

        if self.config.mining_enabled && self.config.auto_mine {
            let miner_node = Arc::clone(self);
            let interval = self.config.mine_interval_seconds.max(1);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_secs(interval));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let node = Arc::clone(&miner_node);
                            let result =
                                tokio::task::spawn_blocking(move || node.mine_block()).await;
                            match result {
                                Ok(Ok(hash)) => info!(%hash, "auto-mined block"),
                                Ok(Err(e)) => warn!("auto-mine failed: {}", e),
                                Err(e) => warn!("auto-mine task failed: {}", e),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            });
        }

        Ok(())
    }

    /// Stop all tasks, persist the UTXO set, and flush storage.
    pub fn stop(&self) {
        info!("stopping node");
        self.mining_shutdown.store(true, Ordering::Relaxed);
        let _ = self.shutdown.send(true);
        self.net.stop();

        let utxo = self.utxo.read().unwrap();
        if let Err(e) = self.utxo_store.save_set(&utxo) {
            warn!("UTXO persistence failed: {}", e);
        }
        if let Err(e) = self.store.flush() {
            warn!("storage flush failed: {}", e);
        }
    }

    /// Assemble a template from the mempool and search for a nonce.
    /// Blocking; run on a blocking thread from async contexts.
    pub fn mine_block(&self) -> Result<Hash> {
        if !self.config.mining_enabled {
            return Err(NodeError::Mining("mining is disabled".into()));
        }

        let miner_hash = self
            .wallet
            .read()
            .unwrap()
            .pubkey_hash_for(&self.config.miner_address)?;

        let (prev, height) = match self.store.tip()? {
            Some(tip) => (tip.best_hash, tip.best_height + 1),
            None => (Hash::ZERO, 0),
        };

        let selection = {
            let mempool = self.mempool.read().unwrap();
            select_transactions(&mempool, MAX_BLOCK_SIZE as i64)
        };

        let mut template = BlockTemplate::assemble(
            prev,
            height,
            &miner_hash,
            self.network.default_bits(),
            selection.transactions,
            selection.total_fees,
        );

        let mut miner = Miner::new(self.network, Arc::clone(&self.mining_shutdown));
        let mut extra_nonce: u64 = 0;
        loop {
            match miner.mine_block(&template) {
                Ok(MineResult::Mined(block)) => {
                    return self.submit_block(block);
                }
                Ok(MineResult::Interrupted) => {
                    return Err(NodeError::Mining("mining interrupted by shutdown".into()));
                }
                Err(NodeError::Mining(_)) => {
                    // Nonce space exhausted: vary the coinbase and retry.
                    extra_nonce += 1;
                    template.bump_extra_nonce(extra_nonce, &miner_hash);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Validate and connect a locally mined block, then clear its
    /// transactions from the mempool and announce it to peers.
    pub fn submit_block(&self, block: Block) -> Result<Hash> {
        let hash = block_hash(&block.header);

        let outcome = {
            let mut utxo = self.utxo.write().unwrap();
            self.chain.accept_block(&block, &mut utxo)?
        };

        match outcome {
            AcceptOutcome::Connected { height } => {
                let mut mempool = self.mempool.write().unwrap();
                for tx in &block.transactions {
                    mempool.remove_confirmed(&tx_hash(tx));
                }
                mempool.set_height(height);
                drop(mempool);

                self.net
                    .relay_inventory(InventoryItem::block(hash), None);
                Ok(hash)
            }
            AcceptOutcome::AlreadyKnown => Ok(hash),
            AcceptOutcome::NotOnTip => Err(NodeError::Consensus(
                "block does not extend the current tip".into(),
            )),
        }
    }

    /// Admit a wallet-built transaction and relay it.
    pub fn submit_transaction(&self, tx: Transaction, fee: i64) -> Result<Hash> {
        crate::validation::validate_transaction(&tx)?;

        let txid = {
            let mut mempool = self.mempool.write().unwrap();
            let height = mempool.current_height();
            mempool.add(tx.clone(), fee, height)?
        };

        self.net.broadcast(NetworkMessage::Tx(tx));
        Ok(txid)
    }

    // Wallet / RPC surface

    pub fn get_new_address(&self) -> String {
        self.wallet.write().unwrap().generate_address()
    }

    /// Import a WIF key into the node wallet; returns its address.
    pub fn import_wif(&self, wif: &str) -> Result<String> {
        self.wallet.write().unwrap().import_wif(wif)
    }

    pub fn list_addresses(&self) -> Vec<String> {
        self.wallet.read().unwrap().list_addresses()
    }

    /// Balance over the current UTXO set; the wallet rescans so reorgs
    /// and p2p-synced blocks are reflected.
    pub fn get_balance(&self) -> i64 {
        let utxo = self.utxo.read().unwrap();
        let mut wallet = self.wallet.write().unwrap();
        wallet.rescan(&utxo);
        wallet.balance()
    }

    /// Build, sign, admit, and relay a payment.
    pub fn send_to_address(&self, address: &str, amount: i64) -> Result<Hash> {
        let height = self.store.tip()?.map(|t| t.best_height).unwrap_or(0);

        let fee = {
            let mempool = self.mempool.read().unwrap();
            // Estimate against a typical two-output spend.
            let estimate = FeeEstimator::estimate_fee(&mempool, 3, 250);
            estimate.max(DEFAULT_SEND_FEE)
        };

        let tx = {
            let utxo = self.utxo.read().unwrap();
            let mut wallet = self.wallet.write().unwrap();
            wallet.rescan(&utxo);
            wallet.create_send(address, amount, fee, height)?
        };

        self.submit_transaction(tx, fee)
    }

    pub fn get_block_count(&self) -> Result<u64> {
        Ok(self.store.tip()?.map(|t| t.best_height).unwrap_or(0))
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<(Hash, Block)>> {
        match self.store.get_block_by_height(height)? {
            Some(block) => Ok(Some((block_hash(&block.header), block))),
            None => Ok(None),
        }
    }

    /// A transaction by id, from the mempool or the confirmed index.
    pub fn get_transaction(&self, txid: &Hash) -> Result<Option<Transaction>> {
        {
            let mempool = self.mempool.read().unwrap();
            if let Some(entry) = mempool.get(txid) {
                return Ok(Some(entry.tx.clone()));
            }
        }
        self.store.get_transaction(txid)
    }

    pub fn mempool_size(&self) -> usize {
        self.mempool.read().unwrap().len()
    }
}
