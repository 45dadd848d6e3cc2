//! Correction of locally predicted state against authoritative echoes.
//!
//! Every state the client sends is kept as a [`StateSnapshot`] keyed by its
//! timestamp. When an authoritative echo for that timestamp comes back, the
//! predicted and authoritative positions are compared; past the threshold
//! the caller gets a [`Correction`] to snap to. Snapshots that never get an
//! echo age out after the horizon. Without an echo channel this is inert.

use std::collections::BTreeMap;

use glam::Vec3;
use serde_json::Value;

/// Default divergence, in world units, tolerated before correcting.
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// Default age, in milliseconds, after which an unmatched snapshot is dropped.
pub const DEFAULT_HORIZON_MS: u64 = 1000;

/// Locally predicted state at the moment it was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub position: Vec3,
    pub rotation: Vec3,
    /// Opaque state owned by the ability system.
    pub ability_states: Value,
    /// Milliseconds on the client's clock.
    pub timestamp: u64,
}

/// Snap instruction produced when a prediction diverged too far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub timestamp: u64,
    /// Euclidean distance between predicted and authoritative position.
    pub divergence: f32,
    pub position: Vec3,
    pub rotation: Vec3,
}

#[derive(Debug, Clone)]
pub struct StateReconciler {
    pending: BTreeMap<u64, StateSnapshot>,
    threshold: f32,
    horizon_ms: u64,
}

impl Default for StateReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_HORIZON_MS)
    }
}

impl StateReconciler {
    pub fn new(threshold: f32, horizon_ms: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            threshold,
            horizon_ms,
        }
    }

    /// Buffer a sent snapshot. A second snapshot with the same timestamp
    /// replaces the first.
    pub fn record(&mut self, snapshot: StateSnapshot) {
        self.pending.insert(snapshot.timestamp, snapshot);
    }

    /// Compare the snapshot sent at `timestamp` with the authoritative
    /// state.
    ///
    /// The matched snapshot and everything older are discarded: echoes come
    /// back in send order, so older ones can no longer be matched. When a
    /// correction is issued, the newer pending snapshots are shifted by the
    /// same offset so they are not corrected a second time.
    pub fn reconcile(
        &mut self,
        timestamp: u64,
        authoritative_position: Vec3,
        authoritative_rotation: Vec3,
    ) -> Option<Correction> {
        let predicted = self.pending.remove(&timestamp)?;
        self.pending = self.pending.split_off(&timestamp);

        let divergence = predicted.position.distance(authoritative_position);
        if divergence <= self.threshold {
            return None;
        }

        let offset = authoritative_position - predicted.position;
        for snapshot in self.pending.values_mut() {
            snapshot.position += offset;
        }

        tracing::debug!("Prediction at {timestamp} ms off by {divergence:.3}, correcting");
        Some(Correction {
            timestamp,
            divergence,
            position: authoritative_position,
            rotation: authoritative_rotation,
        })
    }

    /// Drop snapshots older than the horizon as of `now_ms`.
    pub fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.horizon_ms);
        self.pending = self.pending.split_off(&cutoff);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
