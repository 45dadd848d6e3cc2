//! Authoritative table of connected peers and best-effort fan-out.
//!
//! Sessions and their transports live in one map keyed by [`PeerId`]; a
//! transport never points back at its session. The registry is a plain owned
//! value: whoever holds `&mut SessionRegistry` has exclusive access for an
//! entire iterate-and-mutate sequence, which is the only locking discipline
//! the relay needs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use delve_protocol::{Message, PeerId, PeerSnapshot, encode};
use glam::Vec3;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The session's transport is gone; nothing more can be sent on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Non-owning handle used to reach a peer.
///
/// `send` must not block: it queues the frame and returns. Delivery is
/// best-effort and unacknowledged.
pub trait Transport {
    /// Queue one encoded envelope for delivery.
    fn send(&self, frame: Arc<str>) -> Result<(), TransportClosed>;

    /// Tear the connection down. Idempotent.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// Server-side record of one connected peer.
pub struct PeerSession<T> {
    pub id: PeerId,
    pub transport: T,
    pub position: Vec3,
    pub rotation: Vec3,
    pub character_tag: String,
    /// Last time the peer said anything that counts as a sign of life.
    pub last_seen_at: Instant,
}

impl<T> PeerSession<T> {
    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id,
            position: self.position.into(),
            rotation: self.rotation.into(),
            character_tag: self.character_tag.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Error returned when the registry already holds `max_peers` sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("registry full ({max_peers} peers)")]
pub struct RegistryFull {
    pub max_peers: usize,
}

/// Outcome of a [`SessionRegistry::broadcast`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the frame was queued for.
    pub delivered: usize,
    /// Peers whose transport refused the frame.
    pub failed: Vec<PeerId>,
}

pub struct SessionRegistry<T> {
    sessions: HashMap<PeerId, PeerSession<T>>,
    next_id: u64,
    max_peers: usize,
}

impl<T: Transport> SessionRegistry<T> {
    /// Create an empty registry holding at most `max_peers` sessions.
    pub fn new(max_peers: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
            max_peers,
        }
    }

    /// Allocate a fresh id and store a session at the origin.
    pub fn register(
        &mut self,
        transport: T,
        character_tag: String,
        now: Instant,
    ) -> Result<PeerId, RegistryFull> {
        if self.sessions.len() >= self.max_peers {
            return Err(RegistryFull {
                max_peers: self.max_peers,
            });
        }

        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(
            id,
            PeerSession {
                id,
                transport,
                position: Vec3::ZERO,
                rotation: Vec3::ZERO,
                character_tag,
                last_seen_at: now,
            },
        );
        Ok(id)
    }

    /// Remove a session. Returns it if it was present; a second call is a
    /// no-op returning `None`.
    pub fn unregister(&mut self, id: PeerId) -> Option<PeerSession<T>> {
        self.sessions.remove(&id)
    }

    /// Store a new transform and refresh `last_seen_at`.
    ///
    /// Returns `false` (and changes nothing) for an unknown id.
    pub fn update_state(&mut self, id: PeerId, position: Vec3, rotation: Vec3, now: Instant) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.position = position;
                session.rotation = rotation;
                session.last_seen_at = now;
                true
            }
            None => false,
        }
    }

    /// Refresh `last_seen_at` without touching the transform.
    pub fn touch(&mut self, id: PeerId, now: Instant) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.last_seen_at = now;
                true
            }
            None => false,
        }
    }

    /// State of every session except `exclude`, ordered by id.
    pub fn snapshot(&self, exclude: Option<PeerId>) -> Vec<PeerSnapshot> {
        let mut players: Vec<PeerSnapshot> = self
            .sessions
            .values()
            .filter(|s| Some(s.id) != exclude)
            .map(PeerSession::snapshot)
            .collect();
        players.sort_by_key(|p| p.id);
        players
    }

    /// Send `msg` to one peer.
    pub fn send_to(&self, id: PeerId, msg: &Message) -> Result<(), TransportClosed> {
        let session = self.sessions.get(&id).ok_or(TransportClosed)?;
        let frame = encode_frame(msg).ok_or(TransportClosed)?;
        session.transport.send(frame)
    }

    /// Send `msg` to every session except `exclude`.
    ///
    /// A failing transport is logged and listed in the report; delivery to
    /// the rest continues.
    pub fn broadcast(&self, msg: &Message, exclude: Option<PeerId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Some(frame) = encode_frame(msg) else {
            return report;
        };

        for session in self.sessions.values().filter(|s| Some(s.id) != exclude) {
            match session.transport.send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        "Broadcast of {:?} to {} failed: {e}",
                        msg.message_type(),
                        session.id
                    );
                    report.failed.push(session.id);
                }
            }
        }
        report
    }

    /// Ids of sessions silent for longer than `timeout` as of `now`.
    pub fn stale_ids(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let mut stale: Vec<PeerId> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_seen_at) > timeout)
            .map(|s| s.id)
            .collect();
        stale.sort();
        stale
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerSession<T>> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session, closing its transport. Used on shutdown.
    pub fn close_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.transport.close();
        }
    }
}

fn encode_frame(msg: &Message) -> Option<Arc<str>> {
    match encode(msg) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::error!("Failed to encode {:?}: {e}", msg.message_type());
            None
        }
    }
}
