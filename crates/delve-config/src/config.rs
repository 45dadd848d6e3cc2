//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration shared by the relay and its clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Relay server settings.
    pub server: ServerConfig,
    /// Sync client settings.
    pub client: ClientConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind_address: String,
    /// Listen port.
    pub port: u16,
    /// Sessions beyond this count are refused.
    pub max_peers: usize,
    /// Period of the stale-session sweep.
    pub heartbeat_interval_ms: u64,
    /// A session silent for longer than this is evicted.
    pub session_timeout_ms: u64,
    /// How long a new socket may take to send its `hello`.
    pub handshake_timeout_ms: u64,
    /// Largest accepted frame, in bytes.
    pub max_frame_bytes: u32,
    /// Frames queued for one peer before it is dropped as too slow.
    pub outbound_queue_depth: usize,
}

/// Sync client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the relay.
    pub server_address: String,
    /// Character announced in the `hello` handshake.
    pub character_tag: String,
    /// Minimum spacing between outgoing position updates.
    pub update_interval_ms: u64,
    /// Delay before retrying after an unexpected disconnect.
    pub reconnect_delay_ms: u64,
    /// A dial that has not completed by then counts as failed.
    pub connect_timeout_ms: u64,
    /// An open connection whose relay stops acknowledging traffic or
    /// keepalive packets for this long is dropped.
    pub dead_link_timeout_ms: u64,
    /// How far in the past remote peers are rendered.
    pub interpolation_delay_ms: u64,
    /// Oldest sample age kept in an interpolation buffer.
    pub extrapolation_window_ms: u64,
    /// Divergence (world units) above which a prediction is corrected.
    pub reconcile_threshold: f32,
    /// Unmatched snapshots older than this are discarded.
    pub reconcile_horizon_ms: u64,
    /// Record local snapshots for reconciliation.
    pub enable_reconciliation: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_peers: 256,
            heartbeat_interval_ms: 1000,
            session_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
            max_frame_bytes: 65_536,
            outbound_queue_depth: 256,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8080".to_string(),
            character_tag: "adventurer".to_string(),
            update_interval_ms: 50,
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 5000,
            dead_link_timeout_ms: 15_000,
            interpolation_delay_ms: 100,
            extrapolation_window_ms: 1000,
            reconcile_threshold: 0.1,
            reconcile_horizon_ms: 1000,
            enable_reconciliation: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Duration accessors ---

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// `bind_address:port`, suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl ClientConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn dead_link_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_link_timeout_ms)
    }

    pub fn interpolation_delay(&self) -> Duration {
        Duration::from_millis(self.interpolation_delay_ms)
    }

    pub fn extrapolation_window(&self) -> Duration {
        Duration::from_millis(self.extrapolation_window_ms)
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::WriteError {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new().depth_limit(2);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::WriteError {
            path: config_path,
            source,
        })
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject settings that parse but would make the sync loop misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "server.heartbeat_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.server.session_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(ConfigError::Invalid {
                field: "server.session_timeout_ms",
                reason: "must not be shorter than the heartbeat interval",
            });
        }
        if self.server.max_peers == 0 {
            return Err(ConfigError::Invalid {
                field: "server.max_peers",
                reason: "must be greater than zero",
            });
        }
        if self.server.outbound_queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "server.outbound_queue_depth",
                reason: "must be greater than zero",
            });
        }
        if self.client.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "client.connect_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if self.client.dead_link_timeout_ms < 1000 {
            return Err(ConfigError::Invalid {
                field: "client.dead_link_timeout_ms",
                reason: "must be at least one second",
            });
        }
        if self.client.interpolation_delay_ms > self.client.extrapolation_window_ms {
            return Err(ConfigError::Invalid {
                field: "client.interpolation_delay_ms",
                reason: "must fit inside the extrapolation window",
            });
        }
        let threshold = self.client.reconcile_threshold;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(ConfigError::Invalid {
                field: "client.reconcile_threshold",
                reason: "must be a non-negative number",
            });
        }
        Ok(())
    }

    fn read(config_path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::ReadError {
                path: config_path.to_path_buf(),
                source,
            })?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}
