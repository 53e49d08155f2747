//! Peer connection state and I/O loops
//!
//! Each connection runs a reader and a writer task joined to the peer by
//! bounded channels. Read and write honor their deadlines and the peer's
//! shutdown signal; any decode error, timeout, or send failure closes the
//! connection.

use super::message::{read_message, write_message, NetworkMessage};
use crate::error::NodeError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Read deadline: a silent peer is dropped after this long.
pub const READ_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Write deadline per message.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Outbound queue depth per peer.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 100;

/// Handshake progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    VersionSent,
    VersionReceived,
    Ready,
    Closed,
}

/// Shared handle to a live peer connection.
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub inbound: bool,
    state: Arc<RwLock<PeerState>>,
    start_height: Arc<AtomicI32>,
    outbound: mpsc::Sender<NetworkMessage>,
    shutdown: watch::Sender<bool>,
}

impl PeerHandle {
    pub fn state(&self) -> PeerState {
        *self.state.read().unwrap()
    }

    pub fn set_state(&self, state: PeerState) {
        *self.state.write().unwrap() = state;
    }

    pub fn is_ready(&self) -> bool {
        self.state() == PeerState::Ready
    }

    pub fn start_height(&self) -> i32 {
        self.start_height.load(Ordering::Relaxed)
    }

    pub fn set_start_height(&self, height: i32) {
        self.start_height.store(height, Ordering::Relaxed);
    }

    /// Queue a message for the writer task. Blocks when the channel is
    /// full; returns an error once the peer is shutting down.
    pub async fn send(&self, message: NetworkMessage) -> crate::error::Result<()> {
        let mut closed = self.shutdown.subscribe();
        tokio::select! {
            result = self.outbound.send(message) => {
                result.map_err(|_| NodeError::Network(format!("peer {} gone", self.addr)))
            }
            _ = closed.changed() => {
                Err(NodeError::Network(format!("peer {} shutting down", self.addr)))
            }
        }
    }

    /// Best-effort send for relay paths; drops the message if the queue
    /// is full rather than blocking the broadcaster.
    pub fn try_send(&self, message: NetworkMessage) {
        if let Err(e) = self.outbound.try_send(message) {
            debug!(addr = %self.addr, "relay dropped: {}", e);
        }
    }

    /// Signal both loops to stop and the socket to close.
    pub fn shutdown(&self) {
        self.set_state(PeerState::Closed);
        let _ = self.shutdown.send(true);
    }
}

/// Wire a fresh TCP stream into reader/writer loops. Incoming messages
/// arrive on the returned receiver in the order read from the socket;
/// a `None`-free closed channel means the connection died.
pub fn spawn_peer(
    stream: TcpStream,
    addr: SocketAddr,
    inbound: bool,
    magic: u32,
) -> (PeerHandle, mpsc::Receiver<NetworkMessage>) {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = PeerHandle {
        addr,
        inbound,
        state: Arc::new(RwLock::new(PeerState::Connecting)),
        start_height: Arc::new(AtomicI32::new(0)),
        outbound: outbound_tx,
        shutdown: shutdown_tx,
    };

    tokio::spawn(read_loop(
        read_half,
        addr,
        magic,
        inbound_tx,
        shutdown_rx.clone(),
        handle.clone(),
    ));
    tokio::spawn(write_loop(write_half, addr, magic, outbound_rx, shutdown_rx));

    (handle, inbound_rx)
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    addr: SocketAddr,
    magic: u32,
    inbound_tx: mpsc::Sender<NetworkMessage>,
    mut shutdown: watch::Receiver<bool>,
    handle: PeerHandle,
) {
    loop {
        let message = tokio::select! {
            result = timeout(READ_TIMEOUT, read_message(&mut read_half, magic)) => {
                match result {
                    Ok(Ok(message)) => message,
                    Ok(Err(e)) => {
                        debug!(%addr, "read error: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!(%addr, "read timeout");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => break,
        };

        // Deliver in order; a full channel applies backpressure.
        tokio::select! {
            result = inbound_tx.send(message) => {
                if result.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    handle.shutdown();
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    addr: SocketAddr,
    magic: u32,
    mut outbound_rx: mpsc::Receiver<NetworkMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            message = outbound_rx.recv() => {
                match message {
                    Some(message) => message,
                    None => break,
                }
            }
            _ = shutdown.changed() => break,
        };

        match timeout(WRITE_TIMEOUT, write_message(&mut write_half, magic, &message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%addr, "write error: {}", e);
                break;
            }
            Err(_) => {
                warn!(%addr, "write timeout");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server, addr)
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let magic = 0xDAB5_BFFA;
        let (client, server, addr) = connected_pair().await;
        let (client_handle, mut client_rx) = spawn_peer(client, addr, false, magic);
        let (server_handle, mut server_rx) = spawn_peer(server, addr, true, magic);

        client_handle.send(NetworkMessage::Ping(1)).await.unwrap();
        assert_eq!(server_rx.recv().await.unwrap(), NetworkMessage::Ping(1));

        server_handle.send(NetworkMessage::Pong(1)).await.unwrap();
        assert_eq!(client_rx.recv().await.unwrap(), NetworkMessage::Pong(1));

        client_handle.shutdown();
        server_handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_channels() {
        let magic = 0xDAB5_BFFA;
        let (client, server, addr) = connected_pair().await;
        let (client_handle, _client_rx) = spawn_peer(client, addr, false, magic);
        let (_server_handle, mut server_rx) = spawn_peer(server, addr, true, magic);

        client_handle.shutdown();
        assert_eq!(client_handle.state(), PeerState::Closed);

        // The server side eventually observes the closed connection.
        let got = tokio::time::timeout(Duration::from_secs(5), server_rx.recv()).await;
        assert!(matches!(got, Ok(None)));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let magic = 0xDAB5_BFFA;
        let (client, _server, addr) = connected_pair().await;
        let (handle, _rx) = spawn_peer(client, addr, false, magic);

        assert_eq!(handle.state(), PeerState::Connecting);
        handle.set_state(PeerState::VersionSent);
        handle.set_state(PeerState::Ready);
        assert!(handle.is_ready());

        handle.set_start_height(55);
        assert_eq!(handle.start_height(), 55);
    }
}
