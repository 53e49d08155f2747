//! Wire protocol: message frame and payload codecs
//!
//! Frame: `magic (u32 LE) | command (12 bytes, null-padded) |
//! payload_length (u32 LE) | checksum (4 bytes) | payload`. The checksum
//! is the first four bytes of double-SHA-256 over the payload. Payloads
//! are canonical encodings, bit-exact per message type.

use crate::codec::{block as block_codec, tx as tx_codec, Reader, Writer};
use crate::crypto::hashing::double_sha256;
use crate::error::{NodeError, Result};
use crate::types::{Block, Hash, Transaction};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version advertised in `version` messages.
pub const PROTOCOL_VERSION: i32 = 70015;

/// Service bit: full node able to serve blocks.
pub const NODE_NETWORK: u64 = 1;

/// Maximum wire payload (32 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

const COMMAND_LENGTH: usize = 12;
const HEADER_LENGTH: usize = 24;

/// Inventory object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Tx,
    Block,
}

impl InvType {
    pub fn to_u32(self) -> u32 {
        match self {
            InvType::Tx => 1,
            InvType::Block => 2,
        }
    }

    pub fn from_u32(value: u32) -> Result<InvType> {
        match value {
            1 => Ok(InvType::Tx),
            2 => Ok(InvType::Block),
            other => Err(NodeError::Decode(format!("unknown inventory type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryItem {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl InventoryItem {
    pub fn tx(hash: Hash) -> Self {
        InventoryItem {
            inv_type: InvType::Tx,
            hash,
        }
    }

    pub fn block(hash: Hash) -> Self {
        InventoryItem {
            inv_type: InvType::Block,
            hash,
        }
    }
}

/// Network address block inside `version`: services, IPv6-mapped IP, and
/// a big-endian port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetAddress {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetAddress,
    pub addr_from: NetAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionMessage {
    pub fn new(user_agent: &str, start_height: i32, nonce: u64) -> Self {
        VersionMessage {
            version: PROTOCOL_VERSION,
            services: NODE_NETWORK,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            addr_recv: NetAddress::default(),
            addr_from: NetAddress::default(),
            nonce,
            user_agent: user_agent.to_string(),
            start_height,
            relay: true,
        }
    }
}

/// `getblocks` / `getheaders` payload: a locator (newest to oldest) plus
/// a stop hash (zero = no limit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksMessage {
    pub version: i32,
    pub locator: Vec<Hash>,
    pub hash_stop: Hash,
}

impl GetBlocksMessage {
    pub fn new(locator: Vec<Hash>, hash_stop: Hash) -> Self {
        GetBlocksMessage {
            version: PROTOCOL_VERSION,
            locator,
            hash_stop,
        }
    }
}

/// All messages this node speaks, tagged by command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    Version(VersionMessage),
    Verack,
    Ping(u64),
    Pong(u64),
    Inv(Vec<InventoryItem>),
    GetData(Vec<InventoryItem>),
    NotFound(Vec<InventoryItem>),
    GetBlocks(GetBlocksMessage),
    GetHeaders(GetBlocksMessage),
    Block(Box<Block>),
    Tx(Transaction),
}

impl NetworkMessage {
    pub fn command(&self) -> &'static str {
        match self {
            NetworkMessage::Version(_) => "version",
            NetworkMessage::Verack => "verack",
            NetworkMessage::Ping(_) => "ping",
            NetworkMessage::Pong(_) => "pong",
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetData(_) => "getdata",
            NetworkMessage::NotFound(_) => "notfound",
            NetworkMessage::GetBlocks(_) => "getblocks",
            NetworkMessage::GetHeaders(_) => "getheaders",
            NetworkMessage::Block(_) => "block",
            NetworkMessage::Tx(_) => "tx",
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            NetworkMessage::Version(v) => {
                w.write_i32(v.version);
                w.write_u64(v.services);
                w.write_i64(v.timestamp);
                write_net_address(&mut w, &v.addr_recv);
                write_net_address(&mut w, &v.addr_from);
                w.write_u64(v.nonce);
                w.write_var_string(&v.user_agent);
                w.write_i32(v.start_height);
                w.write_u8(v.relay as u8);
            }
            NetworkMessage::Verack => {}
            NetworkMessage::Ping(nonce) | NetworkMessage::Pong(nonce) => {
                w.write_u64(*nonce);
            }
            NetworkMessage::Inv(items)
            | NetworkMessage::GetData(items)
            | NetworkMessage::NotFound(items) => {
                w.write_varint(items.len() as u64);
                for item in items {
                    w.write_u32(item.inv_type.to_u32());
                    w.write_hash(&item.hash);
                }
            }
            NetworkMessage::GetBlocks(msg) | NetworkMessage::GetHeaders(msg) => {
                w.write_i32(msg.version);
                w.write_varint(msg.locator.len() as u64);
                for hash in &msg.locator {
                    w.write_hash(hash);
                }
                w.write_hash(&msg.hash_stop);
            }
            NetworkMessage::Block(block) => {
                return block_codec::encode_block(block);
            }
            NetworkMessage::Tx(tx) => {
                return tx_codec::encode_tx(tx);
            }
        }
        w.into_bytes()
    }

    pub fn decode_payload(command: &str, payload: &[u8]) -> Result<NetworkMessage> {
        let mut r = Reader::new(payload);
        let message = match command {
            "version" => {
                let version = r.read_i32()?;
                let services = r.read_u64()?;
                let timestamp = r.read_i64()?;
                let addr_recv = read_net_address(&mut r)?;
                let addr_from = read_net_address(&mut r)?;
                let nonce = r.read_u64()?;
                let user_agent = r.read_var_string()?;
                let start_height = r.read_i32()?;
                let relay = r.read_u8()? != 0;
                NetworkMessage::Version(VersionMessage {
                    version,
                    services,
                    timestamp,
                    addr_recv,
                    addr_from,
                    nonce,
                    user_agent,
                    start_height,
                    relay,
                })
            }
            "verack" => NetworkMessage::Verack,
            "ping" => NetworkMessage::Ping(r.read_u64()?),
            "pong" => NetworkMessage::Pong(r.read_u64()?),
            "inv" => NetworkMessage::Inv(read_inventory(&mut r)?),
            "getdata" => NetworkMessage::GetData(read_inventory(&mut r)?),
            "notfound" => NetworkMessage::NotFound(read_inventory(&mut r)?),
            "getblocks" => NetworkMessage::GetBlocks(read_getblocks(&mut r)?),
            "getheaders" => NetworkMessage::GetHeaders(read_getblocks(&mut r)?),
            "block" => return Ok(NetworkMessage::Block(Box::new(block_codec::decode_block(payload)?))),
            "tx" => return Ok(NetworkMessage::Tx(tx_codec::decode_tx(payload)?)),
            other => {
                return Err(NodeError::Decode(format!("unknown command: {}", other)));
            }
        };

        if !r.is_empty() {
            return Err(NodeError::Decode(format!(
                "trailing bytes in {} payload",
                command
            )));
        }
        Ok(message)
    }
}

fn write_net_address(w: &mut Writer, addr: &NetAddress) {
    w.write_u64(addr.services);
    w.write_bytes(&addr.ip);
    // Port is the one big-endian field on the wire.
    w.write_bytes(&addr.port.to_be_bytes());
}

fn read_net_address(r: &mut Reader<'_>) -> Result<NetAddress> {
    let services = r.read_u64()?;
    let mut ip = [0u8; 16];
    ip.copy_from_slice(r.read_bytes(16)?);
    let port_bytes = r.read_bytes(2)?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    Ok(NetAddress { services, ip, port })
}

fn read_inventory(r: &mut Reader<'_>) -> Result<Vec<InventoryItem>> {
    let count = r.read_varint()?;
    if count > 50_000 {
        return Err(NodeError::Decode(format!("inventory too large: {}", count)));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let inv_type = InvType::from_u32(r.read_u32()?)?;
        let hash = r.read_hash()?;
        items.push(InventoryItem { inv_type, hash });
    }
    Ok(items)
}

fn read_getblocks(r: &mut Reader<'_>) -> Result<GetBlocksMessage> {
    let version = r.read_i32()?;
    let count = r.read_varint()?;
    if count > 2_000 {
        return Err(NodeError::Decode(format!("locator too large: {}", count)));
    }
    let mut locator = Vec::with_capacity(count as usize);
    for _ in 0..count {
        locator.push(r.read_hash()?);
    }
    let hash_stop = r.read_hash()?;
    Ok(GetBlocksMessage {
        version,
        locator,
        hash_stop,
    })
}

fn payload_checksum(payload: &[u8]) -> [u8; 4] {
    let hash = double_sha256(payload);
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&hash.as_bytes()[..4]);
    checksum
}

/// Serialize a full frame for the given network magic.
pub fn encode_frame(magic: u32, message: &NetworkMessage) -> Vec<u8> {
    let payload = message.encode_payload();
    let command = message.command();

    let mut frame = Vec::with_capacity(HEADER_LENGTH + payload.len());
    frame.extend_from_slice(&magic.to_le_bytes());

    let mut command_bytes = [0u8; COMMAND_LENGTH];
    command_bytes[..command.len()].copy_from_slice(command.as_bytes());
    frame.extend_from_slice(&command_bytes);

    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload_checksum(&payload));
    frame.extend_from_slice(&payload);
    frame
}

/// Parse a full frame from a byte buffer; used by tests and by the
/// async reader below.
pub fn decode_frame(magic: u32, data: &[u8]) -> Result<NetworkMessage> {
    if data.len() < HEADER_LENGTH {
        return Err(NodeError::Decode("frame too short".into()));
    }

    let frame_magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if frame_magic != magic {
        return Err(NodeError::Decode(format!(
            "bad magic: {:#010x}, expected {:#010x}",
            frame_magic, magic
        )));
    }

    let command = parse_command(&data[4..16])?;

    let payload_len =
        u32::from_le_bytes([data[16], data[17], data[18], data[19]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(NodeError::Decode(format!("payload too large: {}", payload_len)));
    }
    if data.len() < HEADER_LENGTH + payload_len {
        return Err(NodeError::Decode("incomplete frame".into()));
    }

    let checksum = &data[20..24];
    let payload = &data[HEADER_LENGTH..HEADER_LENGTH + payload_len];
    if payload_checksum(payload) != checksum {
        return Err(NodeError::Decode("checksum mismatch".into()));
    }

    NetworkMessage::decode_payload(&command, payload)
}

fn parse_command(bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|_| NodeError::Decode("non-ascii command".into()))
}

/// Read one framed message from an async stream.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    magic: u32,
) -> Result<NetworkMessage> {
    let mut header = [0u8; HEADER_LENGTH];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| NodeError::Network(format!("read header: {}", e)))?;

    let frame_magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if frame_magic != magic {
        return Err(NodeError::Decode(format!("bad magic: {:#010x}", frame_magic)));
    }

    let command = parse_command(&header[4..16])?;
    let payload_len =
        u32::from_le_bytes([header[16], header[17], header[18], header[19]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(NodeError::Decode(format!("payload too large: {}", payload_len)));
    }

    let mut payload = vec![0u8; payload_len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| NodeError::Network(format!("read payload: {}", e)))?;

    if payload_checksum(&payload) != header[20..24] {
        return Err(NodeError::Decode("checksum mismatch".into()));
    }

    NetworkMessage::decode_payload(&command, &payload)
}

/// Write one framed message to an async stream.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    magic: u32,
    message: &NetworkMessage,
) -> Result<()> {
    let frame = encode_frame(magic, message);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| NodeError::Network(format!("write frame: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| NodeError::Network(format!("flush: {}", e)))?;
    Ok(())
}
