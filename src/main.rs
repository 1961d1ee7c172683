#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Marketmesh node entrypoint (systemd-friendly).
//! Loads configuration, brings up every component, and waits for a signal.

use marketmesh::config::NodeConfig;
use marketmesh::supervisor::Supervisor;
use std::path::Path;
use tracing::{error, info};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_config() -> NodeConfig {
    let path = env("MARKETMESH_CONFIG", "./config.toml");
    if Path::new(&path).exists() {
        match NodeConfig::load(Path::new(&path)) {
            Ok(cfg) => return cfg,
            Err(e) => {
                eprintln!("config file {path} failed to load: {e}");
                std::process::exit(1);
            }
        }
    }
    match NodeConfig::from_defaults() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("default configuration failed validation: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).with_level(true).compact().try_init();

    let config = load_config();
    info!(data_dir = %config.data_dir, port = config.p2p.port, "marketmesh node starting");

    let supervisor = match Supervisor::bootstrap(config).await {
        Ok(s) => s,
        Err(e) => {
            error!(?e, "supervisor failed to start");
            std::process::exit(1);
        }
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(?e, "failed to install ctrl-c handler, shutting down anyway"),
    }

    supervisor.shutdown().await;
}
