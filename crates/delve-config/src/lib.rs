//! Configuration for the Delve relay server and sync clients.
//!
//! Settings persist to disk as RON, can be overridden from the command line
//! via clap, and tolerate missing or unknown fields so older files keep
//! loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{ClientConfig, Config, DebugConfig, ServerConfig};
pub use error::ConfigError;
