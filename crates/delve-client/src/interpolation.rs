//! Remote position smoothing by rendering slightly in the past.
//!
//! Updates from a remote peer arrive with jitter, and two peers' updates can
//! reach us in either order. Rather than snapping to each update as it lands,
//! the interpolator keeps a short history of timestamped samples and renders
//! the peer at `now - interpolation_delay`, blending the two samples that
//! bracket that instant. When no pair brackets it, the caller holds the last
//! rendered position; there is no extrapolation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use glam::Vec3;

/// Default render-time offset.
pub const DEFAULT_INTERPOLATION_DELAY: Duration = Duration::from_millis(100);

/// Default maximum age of a buffered sample.
pub const DEFAULT_EXTRAPOLATION_WINDOW: Duration = Duration::from_millis(1000);

/// A received position and the local time it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub position: Vec3,
    pub timestamp: Instant,
}

/// Time-ordered, age-bounded buffer of samples for one remote peer.
#[derive(Debug, Clone)]
pub struct PositionInterpolator {
    samples: VecDeque<PositionSample>,
    interpolation_delay: Duration,
    extrapolation_window: Duration,
}

impl Default for PositionInterpolator {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPOLATION_DELAY, DEFAULT_EXTRAPOLATION_WINDOW)
    }
}

impl PositionInterpolator {
    pub fn new(interpolation_delay: Duration, extrapolation_window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            interpolation_delay,
            extrapolation_window,
        }
    }

    /// Append a sample, then evict samples older than the window measured
    /// from this sample's timestamp.
    ///
    /// Timestamps stay strictly increasing: a sample older than the newest
    /// one is discarded, and one with the same timestamp replaces it.
    pub fn add_position(&mut self, sample: PositionSample) {
        if let Some(last) = self.samples.back_mut() {
            if sample.timestamp < last.timestamp {
                tracing::trace!("Discarding out-of-order position sample");
                return;
            }
            if sample.timestamp == last.timestamp {
                last.position = sample.position;
                return;
            }
        }

        self.samples.push_back(sample);

        if let Some(cutoff) = sample.timestamp.checked_sub(self.extrapolation_window) {
            while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
                self.samples.pop_front();
            }
        }
    }

    /// The smoothed position at `now - interpolation_delay`, or `None` if no
    /// two buffered samples bracket that instant.
    pub fn update(&self, now: Instant) -> Option<Vec3> {
        let render_time = now.checked_sub(self.interpolation_delay)?;

        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .find(|(s1, s2)| s1.timestamp <= render_time && render_time <= s2.timestamp)
            .map(|(s1, s2)| {
                let span = (s2.timestamp - s1.timestamp).as_secs_f32();
                let alpha = (render_time - s1.timestamp).as_secs_f32() / span;
                s1.position.lerp(s2.position, alpha.clamp(0.0, 1.0))
            })
    }

    /// Most recently buffered sample.
    pub fn latest(&self) -> Option<&PositionSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn interpolation_delay(&self) -> Duration {
        self.interpolation_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn sample(base: Instant, at_ms: u64, x: f32) -> PositionSample {
        PositionSample {
            position: Vec3::new(x, 0.0, 0.0),
            timestamp: base + ms(at_ms),
        }
    }

    #[test]
    fn test_midpoint_between_two_samples() {
        let base = Instant::now();
        let mut interp = PositionInterpolator::new(ms(100), ms(1000));
        interp.add_position(sample(base, 0, 0.0));
        interp.add_position(sample(base, 200, 10.0));

        // now = 200 ms, render time = 100 ms, halfway between samples.
        let pos = interp.update(base + ms(200)).unwrap();
        assert!((pos - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4, "{pos}");
    }

    #[test]
    fn test_exact_sample_time_returns_sample() {
        let base = Instant::now();
        let mut interp = PositionInterpolator::new(ms(100), ms(1000));
        interp.add_position(sample(base, 0, 0.0));
        interp.add_position(sample(base, 200, 10.0));
        interp.add_position(sample(base, 400, 30.0));

        let pos = interp.update(base + ms(300)).unwrap();
        assert!((pos.x - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_single_sample_yields_none() {
        let base = Instant::now();
        let mut interp = PositionInterpolator::default();
        interp.add_position(sample(base, 0, 1.0));
        assert_eq!(interp.update(base + ms(500)), None);
    }

    #[test]
    fn test_render_time_past_newest_sample_yields_none() {
        let base = Instant::now();
        let mut interp = PositionInterpolator::new(ms(100), ms(1000));
        interp.add_position(sample(base, 0, 0.0));
        interp.add_position(sample(base, 50, 1.0));
        // render time 150 ms is beyond the newest sample: hold, don't extrapolate.
        assert_eq!(interp.update(base + ms(250)), None);
    }

    #[test]
    fn test_render_time_before_oldest_sample_yields_none() {
        let base = Instant::now();
        let mut interp = PositionInterpolator::new(ms(100), ms(1000));
        interp.add_position(sample(base, 500, 0.0));
        interp.add_position(sample(base, 600, 1.0));
        assert_eq!(interp.update(base + ms(550)), None);
    }

    #[test]
    fn test_old_samples_evicted() {
        let base = Instant::now();
        let mut interp = PositionInterpolator::new(ms(100), ms(1000));
        for i in 0..30u64 {
            interp.add_position(sample(base, i * 100, i as f32));
        }
        // Newest at 2900 ms; everything before 1900 ms is gone.
        assert_eq!(interp.len(), 11);
        assert!(interp.update(base + ms(1500)).is_none());
        assert!(interp.update(base + ms(2500)).is_some());
    }

    #[test]
    fn test_out_of_order_sample_dropped_and_equal_timestamp_replaced() {
        let base = Instant::now();
        let mut interp = PositionInterpolator::default();
        interp.add_position(sample(base, 100, 1.0));
        interp.add_position(sample(base, 50, 99.0));
        assert_eq!(interp.len(), 1);

        interp.add_position(sample(base, 100, 2.0));
        assert_eq!(interp.len(), 1);
        assert_eq!(interp.latest().unwrap().position.x, 2.0);
    }

    #[test]
    fn test_results_stay_on_bracketing_segment() {
        // Seeded jittery trajectory: irregular spacing, wandering path.
        let base = Instant::now();
        let mut interp = PositionInterpolator::new(ms(100), ms(1000));
        let mut rng = ChaCha8Rng::seed_from_u64(0x2545_f491);

        let mut t = 0u64;
        for _ in 0..40 {
            t += rng.random_range(5..65u64);
            let p = Vec3::new(
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
            );
            interp.add_position(PositionSample {
                position: p,
                timestamp: base + ms(t),
            });

            for offset in [0u64, 17, 63, 101, 140] {
                let now = base + ms(t + offset);
                let Some(pos) = interp.update(now) else {
                    continue;
                };
                let render_time = now - ms(100);
                let samples: Vec<_> = interp.samples.iter().copied().collect();
                let (s1, s2) = samples
                    .windows(2)
                    .map(|w| (w[0], w[1]))
                    .find(|(a, b)| a.timestamp <= render_time && render_time <= b.timestamp)
                    .expect("a result implies a bracketing pair");

                let seg = s2.position - s1.position;
                let along = if seg.length_squared() > 0.0 {
                    ((pos - s1.position).dot(seg) / seg.length_squared()).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let closest = s1.position + seg * along;
                assert!(
                    (pos - closest).length() < 1e-3,
                    "{pos} is off the segment {} -> {}",
                    s1.position,
                    s2.position
                );
            }
        }
    }
}
