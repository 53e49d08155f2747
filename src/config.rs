//! Node configuration: defaults, environment loading, validation

use crate::consensus::Network;
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity string, used in logs and the p2p user agent.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// mainnet, testnet, or regtest.
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default = "default_p2p_port")]
    pub p2p_port: u16,

    /// host:port entries to dial at startup.
    #[serde(default)]
    pub initial_peers: Vec<String>,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub mining_enabled: bool,

    /// Address receiving block rewards; required when mining is enabled.
    #[serde(default)]
    pub miner_address: String,

    /// Mine on a timer instead of on demand.
    #[serde(default)]
    pub auto_mine: bool,

    #[serde(default = "default_mine_interval")]
    pub mine_interval_seconds: u64,

    /// debug, info, warn, or error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub enable_monitoring: bool,
}

fn default_node_id() -> String {
    "bitnode".to_string()
}

fn default_network() -> String {
    "regtest".to_string()
}

fn default_rpc_port() -> u16 {
    8332
}

fn default_p2p_port() -> u16 {
    8333
}

fn default_data_dir() -> String {
    "./data/node".to_string()
}

fn default_mine_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: default_node_id(),
            network: default_network(),
            rpc_port: default_rpc_port(),
            p2p_port: default_p2p_port(),
            initial_peers: Vec::new(),
            data_dir: default_data_dir(),
            mining_enabled: false,
            miner_address: String::new(),
            auto_mine: false,
            mine_interval_seconds: default_mine_interval(),
            log_level: default_log_level(),
            enable_monitoring: false,
        }
    }
}

impl NodeConfig {
    /// Overlay environment variables on the defaults.
    pub fn from_env() -> NodeConfig {
        let mut config = NodeConfig::default();

        if let Ok(value) = env::var("NODE_ID") {
            config.node_id = value;
        }
        if let Ok(value) = env::var("NETWORK") {
            config.network = value;
        }
        if let Ok(value) = env::var("RPC_PORT") {
            if let Ok(port) = value.parse() {
                config.rpc_port = port;
            }
        }
        if let Ok(value) = env::var("P2P_PORT") {
            if let Ok(port) = value.parse() {
                config.p2p_port = port;
            }
        }
        if let Ok(value) = env::var("INITIAL_PEERS") {
            config.initial_peers = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(value) = env::var("DATA_DIR") {
            config.data_dir = value;
        }
        if let Ok(value) = env::var("MINING_ENABLED") {
            config.mining_enabled = value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = env::var("MINER_ADDRESS") {
            config.miner_address = value;
        }
        if let Ok(value) = env::var("AUTO_MINE") {
            config.auto_mine = value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = env::var("MINE_INTERVAL") {
            if let Ok(secs) = value.parse() {
                config.mine_interval_seconds = secs;
            }
        }
        if let Ok(value) = env::var("LOG_LEVEL") {
            config.log_level = value;
        }
        if let Ok(value) = env::var("ENABLE_MONITORING") {
            config.enable_monitoring = value.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Fail fast on nonsense before any component starts.
    pub fn validate(&self) -> Result<()> {
        Network::from_name(&self.network)?;

        if self.rpc_port == 0 {
            return Err(NodeError::Decode("invalid RPC port: 0".into()));
        }
        if self.p2p_port == 0 {
            return Err(NodeError::Decode("invalid P2P port: 0".into()));
        }
        if self.data_dir.is_empty() {
            return Err(NodeError::Decode("data directory cannot be empty".into()));
        }
        if self.mining_enabled && self.miner_address.is_empty() {
            return Err(NodeError::Decode(
                "miner address required when mining is enabled".into(),
            ));
        }

        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(NodeError::Decode(format!("invalid log level: {}", other)));
            }
        }

        Ok(())
    }

    pub fn network_params(&self) -> Result<Network> {
        Network::from_name(&self.network)
    }

    pub fn rpc_addr(&self) -> String {
        format!("127.0.0.1:{}", self.rpc_port)
    }

    pub fn p2p_addr(&self) -> String {
        format!("0.0.0.0:{}", self.p2p_port)
    }

    pub fn user_agent(&self) -> String {
        format!("/{}:0.1.0/", self.node_id)
    }
}
