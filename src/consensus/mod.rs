//! Consensus constants and economic rules

pub mod checkpoints;
pub mod pow;

use crate::error::{NodeError, Result};

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum money supply in satoshis (21 million coins).
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Blocks a coinbase output must wait before it is spendable.
pub const COINBASE_MATURITY: u64 = 100;

/// Initial block subsidy in satoshis (50 coins).
pub const INITIAL_SUBSIDY: i64 = 50 * 100_000_000;

/// Blocks between subsidy halvings.
pub const SUBSIDY_HALVING_INTERVAL: u64 = 210_000;

/// Network selector; fixes magic bytes, address version, and the
/// proof-of-work rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn from_name(name: &str) -> Result<Network> {
        match name {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(NodeError::Decode(format!(
                "invalid network: {} (must be mainnet, testnet, or regtest)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    /// Wire-frame magic value.
    pub fn magic(&self) -> u32 {
        match self {
            Network::Mainnet => 0xD9B4_BEF9,
            Network::Testnet => 0x0709_110B,
            Network::Regtest => 0xDAB5_BFFA,
        }
    }

    /// Base58Check version byte for P2PKH addresses.
    pub fn address_version(&self) -> u8 {
        match self {
            Network::Mainnet => crate::keys::VERSION_P2PKH_MAINNET,
            Network::Testnet | Network::Regtest => crate::keys::VERSION_P2PKH_TESTNET,
        }
    }

    /// Regtest substitutes a leading-zero-bytes rule for the compact
    /// target; other networks compare numerically against `bits`.
    pub fn pow_leading_zero_bytes(&self) -> Option<usize> {
        match self {
            Network::Regtest => Some(1),
            _ => None,
        }
    }

    /// Difficulty bits newly assembled blocks carry.
    pub fn default_bits(&self) -> u32 {
        match self {
            Network::Regtest => 0x207F_FFFF,
            _ => 0x1D00_FFFF,
        }
    }

    /// Height at which the coinbase script must encode the block height.
    pub fn bip34_activation_height(&self) -> u64 {
        match self {
            Network::Mainnet => 227_931,
            Network::Testnet => 21_111,
            Network::Regtest => 0,
        }
    }
}

/// Protocol-issued subsidy at `height`: 50 coins halved every 210,000
/// blocks, zero after 64 halvings.
pub fn block_subsidy(height: u64) -> i64 {
    let halvings = height / SUBSIDY_HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    INITIAL_SUBSIDY >> halvings
}

/// A single value must lie in `[0, MAX_MONEY]`.
pub fn check_money_range(value: i64) -> Result<()> {
    if value < 0 {
        return Err(NodeError::Structural(format!("negative value: {}", value)));
    }
    if value > MAX_MONEY {
        return Err(NodeError::Structural(format!(
            "value exceeds maximum: {} > {}",
            value, MAX_MONEY
        )));
    }
    Ok(())
}

/// Coinbase output total may not exceed subsidy plus collected fees.
pub fn check_block_reward(coinbase_total: i64, total_fees: i64, height: u64) -> Result<()> {
    let allowed = block_subsidy(height) + total_fees;
    if coinbase_total > allowed {
        return Err(NodeError::Consensus(format!(
            "coinbase pays {} but only {} is allowed at height {}",
            coinbase_total, allowed, height
        )));
    }
    Ok(())
}
