//! Stale-session eviction.
//!
//! A peer that drops off the network without closing its socket keeps its
//! session alive until this sweep notices it has gone quiet. The relay runs
//! [`reap_stale`] on a fixed period from the same task that owns the
//! registry, so a sweep never overlaps a broadcast.

use std::time::{Duration, Instant};

use delve_protocol::{Message, PeerId, PlayerLeft};

use crate::registry::{SessionRegistry, Transport};

/// Evict every session silent for longer than `timeout`.
///
/// Each evicted peer has its transport closed, is removed from the registry,
/// and is announced to the remaining peers with one `playerLeft`. Returns the
/// evicted ids.
pub fn reap_stale<T: Transport>(
    registry: &mut SessionRegistry<T>,
    now: Instant,
    timeout: Duration,
) -> Vec<PeerId> {
    let stale = registry.stale_ids(now, timeout);

    for &id in &stale {
        let Some(session) = registry.unregister(id) else {
            continue;
        };
        tracing::warn!(
            "{id} timed out after {:?} without updates, evicting",
            now.saturating_duration_since(session.last_seen_at)
        );
        session.transport.close();
        registry.broadcast(&Message::PlayerLeft(PlayerLeft { id }), None);
    }

    stale
}
