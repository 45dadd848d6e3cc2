//! Connection protocol on top of the session registry.
//!
//! [`Relay`] turns the three things that can happen to a peer (it connects,
//! it sends a message, it goes away) into registry mutations and broadcasts.
//! It knows nothing about sockets, so the whole protocol can be driven from
//! tests with in-memory transports.

use std::time::{Duration, Instant};

use delve_protocol::{
    AbilityUsed, Init, Message, PeerId, PlayerJoined, PlayerLeft, PlayerPosition,
};

use crate::reaper::reap_stale;
use crate::registry::{SessionRegistry, Transport};

/// Owns the session registry and applies the relay protocol to it.
pub struct Relay<T> {
    registry: SessionRegistry<T>,
    session_timeout: Duration,
}

impl<T: Transport> Relay<T> {
    pub fn new(registry: SessionRegistry<T>, session_timeout: Duration) -> Self {
        Self {
            registry,
            session_timeout,
        }
    }

    pub fn registry(&self) -> &SessionRegistry<T> {
        &self.registry
    }

    /// Admit a peer that completed its handshake.
    ///
    /// The newcomer gets `init` with everyone else's state; everyone else
    /// gets `playerJoined`. Returns `None` if the registry is full; the
    /// transport is then dropped, which ends a channel-backed connection.
    pub fn on_connect(&mut self, transport: T, character_tag: String, now: Instant) -> Option<PeerId> {
        let id = match self.registry.register(transport, character_tag.clone(), now) {
            Ok(id) => id,
            Err(full) => {
                tracing::warn!("Refusing peer '{character_tag}': {full}");
                return None;
            }
        };

        tracing::info!("{id} joined as '{character_tag}' ({} online)", self.registry.len());

        let init = Message::Init(Init {
            id,
            players: self.registry.snapshot(Some(id)),
        });
        if let Err(e) = self.registry.send_to(id, &init) {
            tracing::warn!("Failed to send init to {id}: {e}");
        }

        self.registry.broadcast(
            &Message::PlayerJoined(PlayerJoined { id, character_tag }),
            Some(id),
        );
        Some(id)
    }

    /// Apply one inbound message from `id`.
    pub fn on_message(&mut self, id: PeerId, msg: Message, now: Instant) {
        match msg {
            Message::PlayerPosition(update) => {
                let updated = self.registry.update_state(
                    id,
                    update.position.into(),
                    update.rotation.into(),
                    now,
                );
                if !updated {
                    tracing::trace!("Position from departed {id} dropped");
                    return;
                }
                self.registry.broadcast(
                    &Message::PlayerPosition(PlayerPosition {
                        id: Some(id),
                        position: update.position,
                        rotation: update.rotation,
                    }),
                    Some(id),
                );
            }
            Message::CastAbility(cast) => {
                if !self.registry.touch(id, now) {
                    tracing::trace!("Ability from departed {id} dropped");
                    return;
                }
                tracing::debug!("{id} cast '{}'", cast.ability);
                self.registry.broadcast(
                    &Message::AbilityUsed(AbilityUsed {
                        player_id: id,
                        ability: cast.ability,
                        target: cast.target,
                    }),
                    Some(id),
                );
            }
            Message::Hello(_) => {
                tracing::debug!("Ignoring repeated hello from {id}");
            }
            other => {
                tracing::debug!(
                    "Dropping server-bound {:?} from {id}",
                    other.message_type()
                );
            }
        }
    }

    /// Handle a closed connection. Announces `playerLeft` only if the
    /// session was still registered, so a peer already evicted by the
    /// reaper is not announced twice.
    pub fn on_disconnect(&mut self, id: PeerId) {
        if self.registry.unregister(id).is_none() {
            return;
        }
        tracing::info!("{id} left ({} online)", self.registry.len());
        self.registry
            .broadcast(&Message::PlayerLeft(PlayerLeft { id }), None);
    }

    /// Run one heartbeat sweep.
    pub fn reap(&mut self, now: Instant) -> Vec<PeerId> {
        reap_stale(&mut self.registry, now, self.session_timeout)
    }

    /// Close every connection. Used on shutdown.
    pub fn close_all(&mut self) {
        self.registry.close_all();
    }
}
