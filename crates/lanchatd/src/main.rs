//! lanchatd — LAN chat peer.
//!
//! Usage: `lanchatd [config-path]`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use lanchat_core::LanchatConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(LanchatConfig::file_path);
    if let Err(e) = LanchatConfig::write_default_if_missing(&path) {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = LanchatConfig::load_from(&path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LanchatConfig::default()
    });
    tracing::info!(
        handle = %config.identity.handle,
        port = config.network.port,
        discovery_port = config.network.discovery_port,
        config = %path.display(),
        "lanchatd starting"
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(lanchatd::run(config));
    // stdin is read on a blocking thread that never returns on its own.
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}
