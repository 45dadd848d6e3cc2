//! Relay server entry point.
//!
//! Run with: `cargo run -p delve-server -- --port 8080`
//! (`PORT` in the environment works too.)

use std::sync::Arc;

use clap::Parser;
use delve_config::{CliArgs, Config};
use delve_server::RelayServer;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let (mut config, load_error) = match args.config.as_deref() {
        Some(dir) => match Config::load_or_create(dir) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        },
        None => (Config::default(), None),
    };
    config.apply_cli_overrides(&args);

    let log_dir = args.config.as_deref().map(|dir| dir.join("logs"));
    delve_log::init_logging(
        log_dir.as_deref(),
        "delve-server.log",
        cfg!(debug_assertions),
        Some(&config),
    );

    if let Some(e) = load_error {
        error!("Failed to load config: {e}");
        std::process::exit(1);
    }
    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    info!(
        "Heartbeat every {:?}, sessions time out after {:?}, up to {} peers",
        config.server.heartbeat_interval(),
        config.server.session_timeout(),
        config.server.max_peers,
    );

    let server = Arc::new(RelayServer::new(config.server.clone()));
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        error!("Relay failed: {e}");
        std::process::exit(1);
    }
}
