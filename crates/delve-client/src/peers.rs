//! Table of remote peer proxies and the default handlers that maintain it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use delve_protocol::{AbilityUsed, Init, Message, PeerId, PlayerJoined, PlayerLeft, PlayerPosition};
use glam::Vec3;

use crate::proxy::{AbilityEvent, RemotePeerProxy, Transform};

/// Roster changes kept for the game layer before the oldest are dropped.
pub const MAX_QUEUED_EVENTS: usize = 1024;

/// Roster change the game layer may want to react to (spawn or despawn a
/// model, show a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The server assigned us an id.
    Assigned(PeerId),
    Joined { id: PeerId, character_tag: String },
    Left(PeerId),
}

/// Everything the client knows about the other peers in the session.
pub struct PeerTable {
    local_id: Option<PeerId>,
    proxies: HashMap<PeerId, RemotePeerProxy>,
    interpolation_delay: Duration,
    extrapolation_window: Duration,
    events: VecDeque<PeerEvent>,
}

impl PeerTable {
    pub fn new(interpolation_delay: Duration, extrapolation_window: Duration) -> Self {
        Self {
            local_id: None,
            proxies: HashMap::new(),
            interpolation_delay,
            extrapolation_window,
            events: VecDeque::new(),
        }
    }

    /// Id assigned by the server in the last `init`.
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    pub fn get(&self, id: PeerId) -> Option<&RemotePeerProxy> {
        self.proxies.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut RemotePeerProxy> {
        self.proxies.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePeerProxy> {
        self.proxies.values()
    }

    /// Create a proxy unless one exists or `id` is ourselves. Returns whether
    /// a proxy was created.
    ///
    /// `initial` is the peer's reported transform when known (from `init`).
    /// Without it the proxy waits for the peer's first position.
    pub fn spawn(
        &mut self,
        id: PeerId,
        character_tag: String,
        initial: Option<Transform>,
        now: Instant,
    ) -> bool {
        if Some(id) == self.local_id || self.proxies.contains_key(&id) {
            return false;
        }
        let proxy = match initial {
            Some(initial) => RemotePeerProxy::from_snapshot(
                id,
                character_tag.clone(),
                initial,
                self.interpolation_delay,
                self.extrapolation_window,
                now,
            ),
            None => RemotePeerProxy::new(
                id,
                character_tag.clone(),
                self.interpolation_delay,
                self.extrapolation_window,
            ),
        };
        self.proxies.insert(id, proxy);
        self.push_event(PeerEvent::Joined { id, character_tag });
        true
    }

    /// Destroy a proxy. Returns whether one existed.
    pub fn despawn(&mut self, id: PeerId) -> bool {
        if self.proxies.remove(&id).is_none() {
            return false;
        }
        self.push_event(PeerEvent::Left(id));
        true
    }

    /// Advance every proxy's rendered transform.
    pub fn update(&mut self, now: Instant) {
        for proxy in self.proxies.values_mut() {
            proxy.update(now);
        }
    }

    /// Rendered transforms as of the last [`PeerTable::update`].
    pub fn transforms(&self) -> impl Iterator<Item = (PeerId, Transform)> + '_ {
        self.proxies.values().map(|p| (p.id(), p.transform()))
    }

    /// Take the roster changes accumulated since the last call.
    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    /// Take every proxy's queued abilities, tagged with the caster.
    pub fn drain_abilities(&mut self) -> Vec<(PeerId, AbilityEvent)> {
        self.proxies
            .values_mut()
            .flat_map(|proxy| {
                let id = proxy.id();
                proxy.take_abilities().into_iter().map(move |a| (id, a))
            })
            .collect()
    }

    /// Forget everything, including our own id. Used on disconnect.
    pub fn clear(&mut self) {
        let ids: Vec<PeerId> = self.proxies.keys().copied().collect();
        for id in ids {
            self.despawn(id);
        }
        self.local_id = None;
    }

    /// Record our id. A proxy already holding that id (a relay restart
    /// reuses ids) is destroyed like any departed peer.
    fn assign_local_id(&mut self, id: PeerId) {
        self.despawn(id);
        self.local_id = Some(id);
        self.push_event(PeerEvent::Assigned(id));
    }

    fn push_event(&mut self, event: PeerEvent) {
        if self.events.len() >= MAX_QUEUED_EVENTS
            && let Some(dropped) = self.events.pop_front()
        {
            tracing::warn!("Peer event queue full, dropping {dropped:?}");
        }
        self.events.push_back(event);
    }
}

// ---------------------------------------------------------------------------
// Default handlers
// ---------------------------------------------------------------------------

/// `init`: record our id and mirror the listed roster. Proxies for peers no
/// longer listed (left over from a previous connection) are destroyed.
pub fn handle_init(msg: &Message, peers: &mut PeerTable, now: Instant) {
    let Message::Init(Init { id, players }) = msg else {
        return;
    };
    peers.assign_local_id(*id);

    let stale: Vec<PeerId> = peers
        .proxies
        .keys()
        .filter(|known| !players.iter().any(|p| p.id == **known))
        .copied()
        .collect();
    for gone in stale {
        peers.despawn(gone);
    }

    for player in players {
        let initial = Transform {
            position: player.position.into(),
            rotation: player.rotation.into(),
        };
        peers.spawn(player.id, player.character_tag.clone(), Some(initial), now);
    }
}

pub fn handle_player_joined(msg: &Message, peers: &mut PeerTable, now: Instant) {
    let Message::PlayerJoined(PlayerJoined { id, character_tag }) = msg else {
        return;
    };
    peers.spawn(*id, character_tag.clone(), None, now);
}

pub fn handle_player_left(msg: &Message, peers: &mut PeerTable, _now: Instant) {
    let Message::PlayerLeft(PlayerLeft { id }) = msg else {
        return;
    };
    peers.despawn(*id);
}

pub fn handle_player_position(msg: &Message, peers: &mut PeerTable, now: Instant) {
    let Message::PlayerPosition(PlayerPosition {
        id: Some(id),
        position,
        rotation,
    }) = msg
    else {
        return;
    };
    if let Some(proxy) = peers.get_mut(*id) {
        proxy.on_position(Vec3::from(*position), now);
        proxy.on_rotation(Vec3::from(*rotation));
    }
}

pub fn handle_ability_used(msg: &Message, peers: &mut PeerTable, _now: Instant) {
    let Message::AbilityUsed(AbilityUsed {
        player_id,
        ability,
        target,
    }) = msg
    else {
        return;
    };
    if let Some(proxy) = peers.get_mut(*player_id) {
        proxy.on_ability(ability.clone(), target.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_protocol::{PeerSnapshot, Vector3};
    use serde_json::json;

    fn table() -> PeerTable {
        PeerTable::new(Duration::from_millis(100), Duration::from_millis(1000))
    }

    fn init(id: u64, others: &[u64]) -> Message {
        Message::Init(Init {
            id: PeerId(id),
            players: others
                .iter()
                .map(|&o| PeerSnapshot {
                    id: PeerId(o),
                    position: Vector3::new(o as f32, 0.0, 0.0),
                    rotation: Vector3::ZERO,
                    character_tag: format!("hero{o}"),
                })
                .collect(),
        })
    }

    #[test]
    fn test_init_creates_proxies_except_self() {
        let mut peers = table();
        let now = Instant::now();
        handle_init(&init(3, &[1, 2, 3]), &mut peers, now);

        assert_eq!(peers.local_id(), Some(PeerId(3)));
        assert_eq!(peers.len(), 2);
        assert!(peers.get(PeerId(3)).is_none());
        let p2 = peers.get(PeerId(2)).unwrap();
        assert_eq!(p2.character_tag(), "hero2");
        assert_eq!(p2.transform().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_reinit_drops_peers_not_listed() {
        let mut peers = table();
        let now = Instant::now();
        handle_init(&init(3, &[1, 2]), &mut peers, now);
        peers.drain_events().for_each(drop);

        handle_init(&init(7, &[2, 5]), &mut peers, now);
        assert_eq!(peers.local_id(), Some(PeerId(7)));
        assert!(peers.get(PeerId(1)).is_none());
        assert!(peers.get(PeerId(2)).is_some());
        assert!(peers.get(PeerId(5)).is_some());

        let events: Vec<_> = peers.drain_events().collect();
        assert!(events.contains(&PeerEvent::Left(PeerId(1))));
        assert!(events.contains(&PeerEvent::Assigned(PeerId(7))));
    }

    #[test]
    fn test_joined_is_idempotent() {
        let mut peers = table();
        let now = Instant::now();
        let joined = Message::PlayerJoined(PlayerJoined {
            id: PeerId(4),
            character_tag: "druid".into(),
        });
        handle_player_joined(&joined, &mut peers, now);
        handle_player_joined(&joined, &mut peers, now);
        assert_eq!(peers.len(), 1);

        let joins = peers
            .drain_events()
            .filter(|e| matches!(e, PeerEvent::Joined { .. }))
            .count();
        assert_eq!(joins, 1);
    }

    #[test]
    fn test_left_destroys_proxy() {
        let mut peers = table();
        let now = Instant::now();
        handle_init(&init(1, &[2]), &mut peers, now);
        handle_player_left(&Message::PlayerLeft(PlayerLeft { id: PeerId(2) }), &mut peers, now);
        assert!(peers.is_empty());
    }

    #[test]
    fn test_position_for_unknown_peer_is_ignored() {
        let mut peers = table();
        let now = Instant::now();
        let msg = Message::PlayerPosition(PlayerPosition {
            id: Some(PeerId(9)),
            position: Vector3::new(1.0, 0.0, 0.0),
            rotation: Vector3::ZERO,
        });
        handle_player_position(&msg, &mut peers, now);
        assert!(peers.is_empty());
    }

    #[test]
    fn test_position_and_ability_reach_proxy() {
        let mut peers = table();
        let now = Instant::now();
        handle_init(&init(1, &[2]), &mut peers, now);

        let msg = Message::PlayerPosition(PlayerPosition {
            id: Some(PeerId(2)),
            position: Vector3::new(8.0, 0.0, 0.0),
            rotation: Vector3::new(0.0, 0.5, 0.0),
        });
        handle_player_position(&msg, &mut peers, now + Duration::from_millis(50));
        handle_ability_used(
            &Message::AbilityUsed(AbilityUsed {
                player_id: PeerId(2),
                ability: "blink".into(),
                target: json!(null),
            }),
            &mut peers,
            now,
        );

        let proxy = peers.get_mut(PeerId(2)).unwrap();
        assert_eq!(proxy.buffered_samples(), 2);
        assert_eq!(proxy.update(now).rotation, Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(proxy.take_abilities()[0].ability, "blink");
    }

    #[test]
    fn test_joined_peer_does_not_slide_in_from_origin() {
        let mut peers = table();
        let t0 = Instant::now();
        handle_player_joined(
            &Message::PlayerJoined(PlayerJoined {
                id: PeerId(4),
                character_tag: "druid".into(),
            }),
            &mut peers,
            t0,
        );
        let msg = Message::PlayerPosition(PlayerPosition {
            id: Some(PeerId(4)),
            position: Vector3::new(100.0, 0.0, 0.0),
            rotation: Vector3::ZERO,
        });
        handle_player_position(&msg, &mut peers, t0 + Duration::from_millis(50));

        peers.update(t0 + Duration::from_millis(125));
        let rendered = peers.get(PeerId(4)).unwrap().transform().position;
        assert_eq!(rendered, Vec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_init_reusing_a_known_id_despawns_that_proxy() {
        let mut peers = table();
        let now = Instant::now();
        handle_player_joined(
            &Message::PlayerJoined(PlayerJoined {
                id: PeerId(1),
                character_tag: "druid".into(),
            }),
            &mut peers,
            now,
        );
        peers.drain_events().for_each(drop);

        // Relay restarted and handed our own id to us again.
        handle_init(&init(1, &[]), &mut peers, now);
        let events: Vec<_> = peers.drain_events().collect();
        assert_eq!(
            events,
            vec![PeerEvent::Left(PeerId(1)), PeerEvent::Assigned(PeerId(1))]
        );
        assert!(peers.is_empty());
    }

    #[test]
    fn test_undrained_events_are_capped() {
        let mut peers = table();
        let now = Instant::now();
        for id in 0..(MAX_QUEUED_EVENTS as u64 + 5) {
            peers.spawn(PeerId(id), "npc".into(), None, now);
        }
        let events: Vec<_> = peers.drain_events().collect();
        assert_eq!(events.len(), MAX_QUEUED_EVENTS);
        assert_eq!(
            events[0],
            PeerEvent::Joined {
                id: PeerId(5),
                character_tag: "npc".into()
            }
        );
    }

    #[test]
    fn test_drain_abilities_tags_caster() {
        let mut peers = table();
        let now = Instant::now();
        handle_init(&init(1, &[2, 3]), &mut peers, now);
        for caster in [2, 3] {
            handle_ability_used(
                &Message::AbilityUsed(AbilityUsed {
                    player_id: PeerId(caster),
                    ability: format!("spell{caster}"),
                    target: json!(null),
                }),
                &mut peers,
                now,
            );
        }

        let mut drained = peers.drain_abilities();
        drained.sort_by_key(|(id, _)| *id);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, PeerId(2));
        assert_eq!(drained[1].1.ability, "spell3");
        assert!(peers.drain_abilities().is_empty());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut peers = table();
        handle_init(&init(1, &[2, 3]), &mut peers, Instant::now());
        peers.clear();
        assert!(peers.is_empty());
        assert_eq!(peers.local_id(), None);
    }
}
