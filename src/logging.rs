//! Logging setup

use crate::config::NodeConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, filtered by the configured
/// level (RUST_LOG still wins when set). Safe to call more than once;
/// later calls are no-ops.
pub fn init(config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bitnode={}", config.log_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
