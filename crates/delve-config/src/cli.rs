//! Command-line argument parsing shared by the relay and client binaries.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Delve command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "delve", about = "Delve multiplayer state relay")]
pub struct CliArgs {
    /// Relay listen port.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Relay bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Relay address a client connects to (`host:port`).
    #[arg(long)]
    pub server: Option<String>,

    /// Character tag a client announces.
    #[arg(long)]
    pub character: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory. Without it, built-in defaults are used.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref bind) = args.bind {
            self.server.bind_address = bind.clone();
        }
        if let Some(ref addr) = args.server {
            self.client.server_address = addr.clone();
        }
        if let Some(ref tag) = args.character {
            self.client.character_tag = tag.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
