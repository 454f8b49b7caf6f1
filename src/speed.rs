//! Throughput estimation with an exponential moving average
//!
//! The [`SpeedEstimator`] turns periodic cumulative byte counts into a smoothed
//! bytes-per-second figure. It owns one [`SpeedSample`] per active transfer and
//! has no side effects beyond that map, so the same timestamp sequence always
//! yields the same estimates.

use std::collections::HashMap;
use std::time::Instant;

use crate::types::TransferId;

/// Weight of the newest instantaneous rate in the moving average
pub const DEFAULT_SMOOTHING: f64 = 0.25;

/// Per-transfer estimator state
#[derive(Clone, Copy, Debug)]
struct SpeedSample {
    last_bytes: u64,
    last_at: Instant,
    /// `None` until the first valid (positive-interval, non-negative) sample
    rate: Option<f64>,
}

/// Smoothed throughput estimator keyed by transfer
#[derive(Debug)]
pub struct SpeedEstimator {
    alpha: f64,
    samples: HashMap<TransferId, SpeedSample>,
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedEstimator {
    /// Create an estimator with the default smoothing weight
    pub fn new() -> Self {
        Self::with_smoothing(DEFAULT_SMOOTHING)
    }

    /// Create an estimator with a custom smoothing weight (clamped to `0.0..=1.0`)
    pub fn with_smoothing(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            samples: HashMap::new(),
        }
    }

    /// Feed an observed cumulative byte count and return the smoothed rate
    ///
    /// - The first observation for an id only records a baseline and returns 0.
    /// - A sample with no elapsed time or a shrinking counter (clock jitter,
    ///   counter reset) refreshes the baseline and returns the previous rate
    ///   unchanged.
    /// - The first valid sample seeds the estimate directly; later ones are
    ///   blended as `alpha * instant + (1 - alpha) * previous`.
    pub fn update(&mut self, id: TransferId, observed_bytes: u64, now: Instant) -> f64 {
        let Some(sample) = self.samples.get_mut(&id) else {
            self.samples.insert(
                id,
                SpeedSample {
                    last_bytes: observed_bytes,
                    last_at: now,
                    rate: None,
                },
            );
            return 0.0;
        };

        let previous = sample.rate.unwrap_or(0.0);
        let elapsed = now.saturating_duration_since(sample.last_at).as_secs_f64();

        if elapsed <= 0.0 || observed_bytes < sample.last_bytes {
            sample.last_bytes = observed_bytes;
            sample.last_at = now;
            return previous;
        }

        let instant = (observed_bytes - sample.last_bytes) as f64 / elapsed;
        let smoothed = match sample.rate {
            None => instant,
            Some(old) => self.alpha * instant + (1.0 - self.alpha) * old,
        };

        sample.last_bytes = observed_bytes;
        sample.last_at = now;
        sample.rate = Some(smoothed);
        smoothed
    }

    /// Current smoothed rate for an id (0 when unknown)
    pub fn rate(&self, id: &TransferId) -> f64 {
        self.samples
            .get(id)
            .and_then(|s| s.rate)
            .unwrap_or(0.0)
    }

    /// Drop the state for a transfer leaving the active set
    ///
    /// Returns `true` if state existed.
    pub fn cleanup(&mut self, id: &TransferId) -> bool {
        self.samples.remove(id).is_some()
    }

    /// Number of tracked transfers
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no transfer is tracked
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
