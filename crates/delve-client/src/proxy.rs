//! Client-side stand-in for one remote peer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use delve_protocol::PeerId;
use glam::Vec3;
use serde_json::Value;

use crate::interpolation::{PositionInterpolator, PositionSample};

/// Position and Euler rotation handed to the renderer each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
}

/// An ability cast by a remote peer, waiting for the animation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct AbilityEvent {
    pub ability: String,
    pub target: Value,
}

/// Abilities kept for the animation layer before the oldest are dropped.
pub const MAX_QUEUED_ABILITIES: usize = 64;

/// Receives raw updates for one remote peer and exposes a renderable
/// transform.
///
/// Positions are smoothed through a [`PositionInterpolator`]; rotation snaps
/// to the latest value.
#[derive(Debug, Clone)]
pub struct RemotePeerProxy {
    id: PeerId,
    character_tag: String,
    interpolator: PositionInterpolator,
    last_recorded: Option<Vec3>,
    rendered: Transform,
    abilities: VecDeque<AbilityEvent>,
}

impl RemotePeerProxy {
    /// Create a proxy for a peer whose position is not known yet. It renders
    /// at the origin until [`RemotePeerProxy::has_position`] turns true; the
    /// first received position is taken as-is.
    pub fn new(
        id: PeerId,
        character_tag: String,
        interpolation_delay: Duration,
        extrapolation_window: Duration,
    ) -> Self {
        Self {
            id,
            character_tag,
            interpolator: PositionInterpolator::new(interpolation_delay, extrapolation_window),
            last_recorded: None,
            rendered: Transform::default(),
            abilities: VecDeque::new(),
        }
    }

    /// Create a proxy from a reported snapshot. `initial` is rendered and
    /// buffered as the first sample.
    pub fn from_snapshot(
        id: PeerId,
        character_tag: String,
        initial: Transform,
        interpolation_delay: Duration,
        extrapolation_window: Duration,
        now: Instant,
    ) -> Self {
        let mut proxy = Self::new(id, character_tag, interpolation_delay, extrapolation_window);
        proxy.rendered.rotation = initial.rotation;
        proxy.on_position(initial.position, now);
        proxy
    }

    /// Buffer a received position, unless it repeats the last one.
    pub fn on_position(&mut self, position: Vec3, now: Instant) {
        if self.last_recorded == Some(position) {
            return;
        }
        if self.last_recorded.is_none() {
            self.rendered.position = position;
        }
        self.last_recorded = Some(position);
        self.interpolator.add_position(PositionSample {
            position,
            timestamp: now,
        });
    }

    /// Rotation is applied as-is.
    pub fn on_rotation(&mut self, rotation: Vec3) {
        self.rendered.rotation = rotation;
    }

    /// Queue an ability for the animation layer. Past
    /// [`MAX_QUEUED_ABILITIES`] the oldest queued one is discarded.
    pub fn on_ability(&mut self, ability: String, target: Value) {
        if self.abilities.len() >= MAX_QUEUED_ABILITIES
            && let Some(dropped) = self.abilities.pop_front()
        {
            tracing::debug!("{} ability queue full, dropping '{}'", self.id, dropped.ability);
        }
        self.abilities.push_back(AbilityEvent { ability, target });
    }

    /// Advance the rendered transform to `now`.
    ///
    /// Once render time has passed the newest sample the peer has stopped
    /// reporting, so it settles on that sample. Otherwise, when nothing
    /// brackets render time, the previous position is held.
    pub fn update(&mut self, now: Instant) -> Transform {
        if let Some(position) = self.interpolator.update(now) {
            self.rendered.position = position;
        } else if let Some(latest) = self.interpolator.latest()
            && now
                .checked_sub(self.interpolator.interpolation_delay())
                .is_some_and(|render_time| render_time >= latest.timestamp)
        {
            self.rendered.position = latest.position;
        }
        self.rendered
    }

    /// Transform as of the last [`RemotePeerProxy::update`].
    pub fn transform(&self) -> Transform {
        self.rendered
    }

    /// Whether any position has been received for this peer.
    pub fn has_position(&self) -> bool {
        self.last_recorded.is_some()
    }

    /// Take the abilities received since the last call.
    pub fn take_abilities(&mut self) -> Vec<AbilityEvent> {
        self.abilities.drain(..).collect()
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn character_tag(&self) -> &str {
        &self.character_tag
    }

    /// Number of samples currently buffered.
    pub fn buffered_samples(&self) -> usize {
        self.interpolator.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DELAY: Duration = Duration::from_millis(100);
    const WINDOW: Duration = Duration::from_millis(1000);

    fn proxy_at(origin: Vec3, now: Instant) -> RemotePeerProxy {
        RemotePeerProxy::from_snapshot(
            PeerId(2),
            "rogue".into(),
            Transform {
                position: origin,
                rotation: Vec3::ZERO,
            },
            DELAY,
            WINDOW,
            now,
        )
    }

    #[test]
    fn test_duplicate_positions_do_not_grow_buffer() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::ZERO, base);
        for i in 1..=50u64 {
            proxy.on_position(Vec3::ZERO, base + Duration::from_millis(i * 10));
        }
        assert_eq!(proxy.buffered_samples(), 1);

        for i in 1..=50u64 {
            proxy.on_position(Vec3::X, base + Duration::from_millis(500 + i));
        }
        assert_eq!(proxy.buffered_samples(), 2);
    }

    #[test]
    fn test_update_interpolates_between_updates() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::ZERO, base);
        proxy.on_position(Vec3::new(10.0, 0.0, 0.0), base + Duration::from_millis(200));

        let t = proxy.update(base + Duration::from_millis(200));
        assert!((t.position.x - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_settles_on_final_sample_when_peer_stops() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::ZERO, base);
        proxy.on_position(Vec3::new(10.0, 0.0, 0.0), base + Duration::from_millis(200));
        let moving = proxy.update(base + Duration::from_millis(250)).position;
        assert!(moving.x < 10.0);

        // Long after the last sample: the peer rests where it last reported.
        let t = proxy.update(base + Duration::from_secs(5));
        assert_eq!(t.position, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_holds_position_until_render_time_reaches_samples() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::ZERO, base);
        proxy.update(base + Duration::from_millis(150));
        // A burst arrives after a gap; render time is still before it.
        proxy.on_position(Vec3::new(4.0, 0.0, 0.0), base + Duration::from_millis(2000));
        proxy.on_position(Vec3::new(6.0, 0.0, 0.0), base + Duration::from_millis(2050));
        let t = proxy.update(base + Duration::from_millis(2060));
        assert_eq!(t.position, Vec3::ZERO);
    }

    #[test]
    fn test_joined_peer_starts_at_first_reported_position() {
        let base = Instant::now();
        let mut proxy = RemotePeerProxy::new(PeerId(3), "monk".into(), DELAY, WINDOW);
        assert!(!proxy.has_position());
        assert_eq!(proxy.buffered_samples(), 0);

        proxy.on_position(Vec3::new(100.0, 0.0, 0.0), base + Duration::from_millis(50));
        assert!(proxy.has_position());
        for at in [60, 125, 400] {
            let t = proxy.update(base + Duration::from_millis(at));
            assert_eq!(t.position, Vec3::new(100.0, 0.0, 0.0), "at {at} ms");
        }
    }

    #[test]
    fn test_initial_transform_rendered_before_samples() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::new(3.0, 4.0, 5.0), base);
        assert_eq!(proxy.update(base).position, Vec3::new(3.0, 4.0, 5.0));
    }

    #[test]
    fn test_rotation_snaps() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::ZERO, base);
        proxy.on_rotation(Vec3::new(0.0, 1.5, 0.0));
        assert_eq!(proxy.update(base).rotation, Vec3::new(0.0, 1.5, 0.0));
    }

    #[test]
    fn test_abilities_are_drained_once() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::ZERO, base);
        proxy.on_ability("fireball".into(), json!({"x": 1}));
        let taken = proxy.take_abilities();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].ability, "fireball");
        assert!(proxy.take_abilities().is_empty());
    }

    #[test]
    fn test_undrained_abilities_are_capped() {
        let base = Instant::now();
        let mut proxy = proxy_at(Vec3::ZERO, base);
        for i in 0..(MAX_QUEUED_ABILITIES + 10) {
            proxy.on_ability(format!("spell{i}"), Value::Null);
        }
        let taken = proxy.take_abilities();
        assert_eq!(taken.len(), MAX_QUEUED_ABILITIES);
        assert_eq!(taken[0].ability, "spell10");
        assert_eq!(
            taken.last().unwrap().ability,
            format!("spell{}", MAX_QUEUED_ABILITIES + 9)
        );
    }
}
