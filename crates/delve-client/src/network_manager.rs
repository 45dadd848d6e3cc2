//! Client connection owner, driven once per frame.
//!
//! [`NetworkManager::update`] is the only place client state changes: it
//! finishes pending connects, fires due reconnects, routes every inbound
//! message through the [`MessageRouter`], sends the local transform at the
//! configured cadence and advances the remote peer proxies. Socket I/O runs
//! on tokio tasks spawned onto the supplied runtime handle.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use delve_config::ClientConfig;
use delve_protocol::{CastAbility, FrameConfig, Hello, Message, MessageType, PeerId, PlayerPosition};
use glam::Vec3;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::connection::{ConnectError, Link, LinkConfig, LinkEvent, open_link};
use crate::peers::{PeerEvent, PeerTable};
use crate::proxy::{AbilityEvent, Transform};
use crate::reconciliation::{Correction, StateReconciler, StateSnapshot};
use crate::reconnect::ReconnectSchedule;
use crate::router::{MessageHandler, MessageRouter};

/// Lifecycle of the manager's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection. A reconnect may be scheduled.
    Disconnected,
    /// Dial and handshake in flight.
    Connecting,
    /// Hello sent; messages flow both ways.
    Open,
}

type PendingConnect = oneshot::Receiver<Result<Link, ConnectError>>;

pub struct NetworkManager {
    config: ClientConfig,
    runtime: Handle,
    link_config: LinkConfig,
    state: ConnectionState,
    endpoint: Option<String>,
    link: Option<Link>,
    pending: Option<PendingConnect>,
    reconnect: ReconnectSchedule,
    router: MessageRouter,
    peers: PeerTable,
    local: Transform,
    last_sent: Option<Instant>,
    reconciler: Option<StateReconciler>,
    clock_origin: (Instant, u64),
}

impl NetworkManager {
    /// Create a disconnected manager. Socket tasks are spawned on `runtime`.
    pub fn new(config: ClientConfig, runtime: Handle) -> Self {
        let reconciler = config
            .enable_reconciliation
            .then(|| StateReconciler::new(config.reconcile_threshold, config.reconcile_horizon_ms));
        let wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            reconnect: ReconnectSchedule::new(config.reconnect_delay()),
            peers: PeerTable::new(config.interpolation_delay(), config.extrapolation_window()),
            link_config: LinkConfig {
                frame: FrameConfig::default(),
                connect_timeout: config.connect_timeout(),
                dead_link_timeout: config.dead_link_timeout(),
            },
            config,
            runtime,
            state: ConnectionState::Disconnected,
            endpoint: None,
            link: None,
            pending: None,
            router: MessageRouter::with_default_handlers(),
            local: Transform::default(),
            last_sent: None,
            reconciler,
            clock_origin: (Instant::now(), wall_ms),
        }
    }

    /// Start connecting to `endpoint` (`host:port`). Any existing connection
    /// is dropped first. The result shows up in a later [`update`].
    ///
    /// [`update`]: NetworkManager::update
    pub fn connect(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        self.link = None;
        self.reconnect.cancel();
        self.endpoint = Some(endpoint.clone());
        self.start_connect(endpoint);
    }

    /// Close the connection and stop reconnecting. Known peers are
    /// forgotten.
    pub fn disconnect(&mut self) {
        self.endpoint = None;
        self.link = None;
        self.pending = None;
        self.reconnect.cancel();
        self.peers.clear();
        self.state = ConnectionState::Disconnected;
        tracing::info!("Disconnected from relay");
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Id the relay assigned us, once `init` has arrived.
    pub fn local_id(&self) -> Option<PeerId> {
        self.peers.local_id()
    }

    /// Install `handler` for `message_type`, replacing the current one
    /// (including the built-in roster handlers).
    pub fn register_handler<H: MessageHandler + 'static>(
        &mut self,
        message_type: MessageType,
        handler: H,
    ) {
        self.router.register_handler(message_type, handler);
    }

    /// Set the transform sent on the next position tick.
    pub fn set_local_transform(&mut self, position: Vec3, rotation: Vec3) {
        self.local = Transform { position, rotation };
    }

    pub fn local_transform(&self) -> Transform {
        self.local
    }

    /// Announce an ability cast. Dropped unless the connection is open.
    pub fn cast_ability(&mut self, ability: impl Into<String>, target: Value) -> bool {
        self.send(&Message::CastAbility(CastAbility {
            ability: ability.into(),
            target,
        }))
    }

    /// Send an arbitrary message. Returns `false` if it was dropped.
    pub fn send(&mut self, msg: &Message) -> bool {
        if self.state != ConnectionState::Open {
            tracing::trace!("Not connected, dropping {:?}", msg.message_type());
            return false;
        }
        let Some(link) = &self.link else {
            return false;
        };
        match link.send(msg) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to send {:?}: {e}", msg.message_type());
                false
            }
        }
    }

    /// Compare the state sent at `timestamp_ms` with an authoritative echo.
    /// Always `None` when reconciliation is disabled.
    pub fn reconcile(
        &mut self,
        timestamp_ms: u64,
        position: Vec3,
        rotation: Vec3,
    ) -> Option<Correction> {
        let correction = self
            .reconciler
            .as_mut()?
            .reconcile(timestamp_ms, position, rotation)?;
        self.local = Transform {
            position: correction.position,
            rotation: correction.rotation,
        };
        Some(correction)
    }

    pub fn reconciler(&self) -> Option<&StateReconciler> {
        self.reconciler.as_ref()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerTable {
        &mut self.peers
    }

    /// Rendered transforms of every remote peer as of the last update.
    pub fn transforms(&self) -> Vec<(PeerId, Transform)> {
        self.peers.transforms().collect()
    }

    /// Roster changes since the last call.
    pub fn drain_events(&mut self) -> Vec<PeerEvent> {
        self.peers.drain_events().collect()
    }

    /// Abilities remote peers cast since the last call.
    pub fn drain_abilities(&mut self) -> Vec<(PeerId, AbilityEvent)> {
        self.peers.drain_abilities()
    }

    /// Milliseconds since the Unix epoch at `now`, as used for snapshot
    /// timestamps.
    pub fn clock_ms(&self, now: Instant) -> u64 {
        let (origin, wall_ms) = self.clock_origin;
        wall_ms + now.saturating_duration_since(origin).as_millis() as u64
    }

    /// Advance the client by one frame.
    pub fn update(&mut self, now: Instant) {
        self.poll_pending(now);

        if self.state == ConnectionState::Disconnected
            && self.reconnect.due(now)
            && let Some(endpoint) = self.endpoint.clone()
        {
            tracing::info!(
                "Reconnecting to {endpoint} (attempt {})",
                self.reconnect.attempts()
            );
            self.start_connect(endpoint);
        }

        self.drain_inbound(now);
        self.send_position(now);

        let now_ms = self.clock_ms(now);
        if let Some(reconciler) = &mut self.reconciler {
            reconciler.prune(now_ms);
        }

        self.peers.update(now);
    }

    fn start_connect(&mut self, endpoint: String) {
        let (tx, rx) = oneshot::channel();
        let hello = Hello {
            character_tag: self.config.character_tag.clone(),
        };
        let link_config = self.link_config.clone();
        self.runtime.spawn(async move {
            let _ = tx.send(open_link(&endpoint, hello, link_config).await);
        });
        self.pending = Some(rx);
        self.state = ConnectionState::Connecting;
    }

    fn poll_pending(&mut self, now: Instant) {
        let Some(rx) = self.pending.as_mut() else {
            return;
        };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return,
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(ConnectError::Io(std::io::Error::other("connect task ended")))
            }
        };
        self.pending = None;

        match outcome {
            Ok(link) => {
                self.link = Some(link);
                self.state = ConnectionState::Open;
                self.last_sent = None;
                self.reconnect.cancel();
            }
            Err(e) => {
                tracing::warn!("Connect failed: {e}");
                self.on_link_lost(now);
            }
        }
    }

    fn drain_inbound(&mut self, now: Instant) {
        while let Some(link) = self.link.as_mut() {
            match link.try_recv() {
                Some(LinkEvent::Message(msg)) => {
                    tracing::trace!("Received {:?}", msg.message_type());
                    self.router.route(&msg, &mut self.peers, now);
                }
                Some(LinkEvent::Closed) => {
                    self.on_link_lost(now);
                    break;
                }
                None => break,
            }
        }
    }

    /// Unexpected loss of the connection (or a failed dial): go back to
    /// `Disconnected` and retry after the fixed delay.
    fn on_link_lost(&mut self, now: Instant) {
        self.link = None;
        self.state = ConnectionState::Disconnected;
        if self.endpoint.is_some() {
            self.reconnect.schedule(now);
            tracing::info!("Connection lost, retrying in {:?}", self.reconnect.delay());
        }
    }

    fn send_position(&mut self, now: Instant) {
        if self.state != ConnectionState::Open || self.peers.local_id().is_none() {
            return;
        }
        let interval = self.config.update_interval();
        if let Some(last) = self.last_sent
            && now.saturating_duration_since(last) < interval
        {
            return;
        }

        let Transform { position, rotation } = self.local;
        let sent = self.send(&Message::PlayerPosition(PlayerPosition {
            id: None,
            position: position.into(),
            rotation: rotation.into(),
        }));
        if !sent {
            return;
        }
        self.last_sent = Some(now);

        let timestamp = self.clock_ms(now);
        if let Some(reconciler) = &mut self.reconciler {
            reconciler.record(StateSnapshot {
                position,
                rotation,
                ability_states: Value::Null,
                timestamp,
            });
        }
    }
}
