//! bitnode - a self-contained Bitcoin-style full node
//!
//! A peer-to-peer replicated ledger: blocks and transactions flow in over
//! a framed TCP protocol, pass the consensus validation pipeline, mutate
//! the UTXO set, and land in sled-backed storage. A mempool with
//! replace-by-fee and ancestor-aware selection feeds the miner; a reorg
//! engine with per-block undo records switches to heavier chains without
//! losing mempool contents. An HTTP RPC surface backs the wallet tooling.
//!
//! Layering, leaves first:
//!
//! 1. `types` / `codec` / `crypto` - data model and bit-exact serialization
//! 2. `script` / `keys` - script VM, signature hashing, addresses
//! 3. `consensus` / `utxo` / `validation` - rules and state transitions
//! 4. `mempool` / `mining` / `reorg` - unconfirmed state and block supply
//! 5. `storage` / `net` - persistence and the wire protocol
//! 6. `wallet` / `node` / `rpc` - composition and external surfaces

pub mod codec;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod logging;
pub mod mempool;
pub mod mining;
pub mod net;
pub mod node;
pub mod reorg;
pub mod rpc;
pub mod script;
pub mod storage;
pub mod types;
pub mod utxo;
pub mod validation;
pub mod wallet;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::Node;
pub use types::{
    Block, BlockHeader, ChainTip, Hash, OutPoint, Transaction, TxInput, TxOutput,
};
