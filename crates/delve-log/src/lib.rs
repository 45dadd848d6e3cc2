//! Structured logging for the relay server and sync clients.
//!
//! Wraps `tracing-subscriber`: console output with uptime timestamps and
//! module paths, an optional JSON log file in debug builds, and filtering
//! from `RUST_LOG` or the config's `debug.log_level`.

use std::path::Path;

use delve_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config says otherwise.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.debug.log_level`, which wins over
/// [`DEFAULT_FILTER`]. When `debug_build` is set and `log_dir` is writable,
/// a JSON copy of the log goes to `<log_dir>/<file_name>`.
///
/// Calling this twice in one process is harmless: the second call leaves
/// the first subscriber in place.
pub fn init_logging(
    log_dir: Option<&Path>,
    file_name: &str,
    debug_build: bool,
    config: Option<&Config>,
) {
    let filter_str = filter_for(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(file_name))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        let _ = subscriber.with(file_layer).try_init();
        return;
    }

    let _ = subscriber.try_init();
}

/// The filter string implied by `config`, ignoring `RUST_LOG`.
pub fn filter_for(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => {
            config.debug.log_level.clone()
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_without_config() {
        assert_eq!(filter_for(None), "info");
    }

    #[test]
    fn test_config_level_is_used() {
        let mut config = Config::default();
        config.debug.log_level = "debug,delve_server=trace".to_string();
        assert_eq!(filter_for(Some(&config)), "debug,delve_server=trace");
    }

    #[test]
    fn test_blank_config_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "  ".to_string();
        assert_eq!(filter_for(Some(&config)), DEFAULT_FILTER);
    }

    #[test]
    fn test_subsystem_filters_parse() {
        for filter_str in ["info", "warn,delve_client=debug", "delve_server::reaper=trace"] {
            assert!(EnvFilter::try_new(filter_str).is_ok(), "{filter_str}");
        }
    }

    #[test]
    fn test_debug_build_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        init_logging(Some(dir.path()), "relay.log", true, None);
        assert!(dir.path().join("relay.log").exists());
        // A second initialization must not panic.
        init_logging(None, "relay.log", false, None);
    }
}
