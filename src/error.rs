//! Error types shared across the node

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("structural validation failed: {0}")]
    Structural(String),

    #[error("consensus rule violation: {0}")]
    Consensus(String),

    #[error("script execution failed: {0}")]
    Script(String),

    #[error("UTXO not found: {0}")]
    UtxoNotFound(String),

    #[error("policy rejection: {0}")]
    Policy(String),

    #[error("mempool error: {0}")]
    Mempool(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("mining error: {0}")]
    Mining(String),
}

impl From<sled::Error> for NodeError {
    fn from(e: sled::Error) -> Self {
        NodeError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
