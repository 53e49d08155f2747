//! P2P networking: listener, peer table, handshake, and dispatch

pub mod message;
pub mod peer;
pub mod sync;

use crate::consensus::Network;
use crate::error::Result;
use message::{NetworkMessage, VersionMessage};
use peer::{spawn_peer, PeerHandle, PeerState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use sync::SyncManager;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub listen_addr: SocketAddr,
    pub network: Network,
    pub user_agent: String,
    pub initial_peers: Vec<SocketAddr>,
}

/// Owns the peer table and drives per-peer message pumps.
pub struct NetworkManager {
    config: NetConfig,
    sync: Arc<SyncManager>,
    peers: Arc<RwLock<HashMap<SocketAddr, PeerHandle>>>,
    shutdown: watch::Sender<bool>,
}

impl NetworkManager {
    pub fn new(config: NetConfig, sync: Arc<SyncManager>) -> Self {
        let (shutdown, _) = watch::channel(false);
        NetworkManager {
            config,
            sync,
            peers: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    pub fn peer_addresses(&self) -> Vec<SocketAddr> {
        self.peers.read().unwrap().keys().copied().collect()
    }

    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    /// Bind the listener, start accepting, and dial the initial peers.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("bind {}: {}", self.config.listen_addr, e))?;
        info!(addr = %self.config.listen_addr, "p2p listening");

        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                debug!(%addr, "inbound connection");
                                manager.clone().handle_connection(stream, addr, true);
                            }
                            Err(e) => error!("accept failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        for addr in self.config.initial_peers.clone() {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = manager.connect(addr).await {
                    warn!(%addr, "initial peer connect failed: {}", e);
                }
            });
        }

        Ok(())
    }

    /// Dial an outbound peer.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow::anyhow!("connect {}: {}", addr, e))?;
        info!(%addr, "outbound connection");
        Arc::clone(self).handle_connection(stream, addr, false);
        Ok(())
    }

    /// Stop all peers and the accept loop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let peers = self.peers.read().unwrap();
        for peer in peers.values() {
            peer.shutdown();
        }
    }

    /// Register the peer and run its message pump until disconnect.
    fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, inbound: bool) {
        let magic = self.config.network.magic();
        let (handle, mut inbound_rx) = spawn_peer(stream, addr, inbound, magic);

        self.peers.write().unwrap().insert(addr, handle.clone());

        tokio::spawn(async move {
            // Outbound connections speak first.
            if !inbound {
                if let Err(e) = handle.send(self.version_message()).await {
                    warn!(%addr, "version send failed: {}", e);
                } else {
                    handle.set_state(PeerState::VersionSent);
                }
            }

            while let Some(message) = inbound_rx.recv().await {
                if let Err(e) = self.dispatch(message, &handle).await {
                    warn!(%addr, "message handling failed: {}", e);
                }
                if handle.state() == PeerState::Closed {
                    break;
                }
            }

            // Reader closed or shutdown: tear down and deregister.
            handle.shutdown();
            self.peers.write().unwrap().remove(&addr);
            info!(%addr, "peer disconnected");
        });
    }

    fn version_message(&self) -> NetworkMessage {
        let height = self
            .sync
            .chain_tip_height()
            .unwrap_or(0);
        NetworkMessage::Version(VersionMessage::new(
            &self.config.user_agent,
            height as i32,
            rand::random(),
        ))
    }

    /// One message, in receive order.
    async fn dispatch(&self, message: NetworkMessage, peer: &PeerHandle) -> Result<()> {
        match message {
            NetworkMessage::Version(version) => {
                peer.set_start_height(version.start_height);
                debug!(addr = %peer.addr, agent = %version.user_agent, "version received");

                if peer.inbound && peer.state() == PeerState::Connecting {
                    // Inbound: reply with our version, then verack.
                    peer.send(self.version_message()).await?;
                    peer.send(NetworkMessage::Verack).await?;
                    peer.set_state(PeerState::VersionReceived);
                } else {
                    peer.send(NetworkMessage::Verack).await?;
                    peer.set_state(PeerState::VersionReceived);
                }
            }
            NetworkMessage::Verack => {
                if peer.state() == PeerState::VersionReceived {
                    peer.set_state(PeerState::Ready);
                    info!(addr = %peer.addr, height = peer.start_height(), "handshake complete");
                    self.sync.start_sync(peer).await?;
                }
            }
            NetworkMessage::Ping(nonce) => {
                peer.send(NetworkMessage::Pong(nonce)).await?;
            }
            NetworkMessage::Pong(_) => {}
            NetworkMessage::Inv(items) => {
                self.sync.handle_inv(items, peer).await?;
            }
            NetworkMessage::GetData(items) => {
                self.sync.handle_getdata(items, peer).await?;
            }
            NetworkMessage::GetBlocks(msg) | NetworkMessage::GetHeaders(msg) => {
                self.sync.handle_getblocks(msg, peer).await?;
            }
            NetworkMessage::Block(block) => {
                self.sync.handle_block(*block, peer).await?;
            }
            NetworkMessage::Tx(tx) => {
                if let Some(txid) = self.sync.handle_tx(tx)? {
                    self.relay_inventory(
                        message::InventoryItem::tx(txid),
                        Some(peer.addr),
                    );
                }
            }
            NetworkMessage::NotFound(items) => {
                debug!(addr = %peer.addr, count = items.len(), "notfound");
            }
        }
        Ok(())
    }

    /// Announce an inventory item to every ready peer except `except`.
    pub fn relay_inventory(&self, item: message::InventoryItem, except: Option<SocketAddr>) {
        let peers = self.peers.read().unwrap();
        for (addr, peer) in peers.iter() {
            if Some(*addr) == except || !peer.is_ready() {
                continue;
            }
            peer.try_send(NetworkMessage::Inv(vec![item]));
        }
    }

    /// Broadcast a full message to every ready peer.
    pub fn broadcast(&self, message: NetworkMessage) {
        let peers = self.peers.read().unwrap();
        for peer in peers.values() {
            if peer.is_ready() {
                peer.try_send(message.clone());
            }
        }
    }
}
