//! Headless client for poking at a running relay.
//!
//! Connects, walks in a circle and logs who comes and goes.
//!
//! Run with: `cargo run -p delve-client --bin delve-bot -- --server 127.0.0.1:8080`

use std::time::{Duration, Instant};

use clap::Parser;
use delve_client::{ConnectionState, NetworkManager, PeerEvent};
use delve_config::{CliArgs, Config};
use glam::Vec3;
use tracing::{error, info};

/// Frame pacing for the bot's update loop.
const TICK: Duration = Duration::from_millis(16);
/// Radius of the walked circle, in world units.
const RADIUS: f32 = 5.0;

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
        "delve-bot.log",
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

    let endpoint = config.client.server_address.clone();
    info!(
        "Connecting to {endpoint} as '{}'",
        config.client.character_tag
    );
    let mut manager = NetworkManager::new(config.client, tokio::runtime::Handle::current());
    manager.connect(endpoint);

    let started = Instant::now();
    let mut ticker = tokio::time::interval(TICK);
    let mut last_state = manager.state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let angle = now.duration_since(started).as_secs_f32() * 0.5;
                manager.set_local_transform(
                    Vec3::new(angle.cos() * RADIUS, 0.0, angle.sin() * RADIUS),
                    Vec3::new(0.0, -angle, 0.0),
                );
                manager.update(now);

                if manager.state() != last_state {
                    info!("Connection {:?} -> {:?}", last_state, manager.state());
                    last_state = manager.state();
                }
                for event in manager.drain_events() {
                    match event {
                        PeerEvent::Assigned(id) => info!("Assigned {id}"),
                        PeerEvent::Joined { id, character_tag } => {
                            info!("{id} joined as '{character_tag}'");
                        }
                        PeerEvent::Left(id) => info!("{id} left"),
                    }
                }
                for (id, cast) in manager.drain_abilities() {
                    info!("{id} cast '{}'", cast.ability);
                }
            }
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    if manager.state() == ConnectionState::Open {
        manager.disconnect();
    }
}
