//! # Online Statistics
//!
//! Streaming mean and variance (Welford's algorithm). One accumulator costs
//! three words and every update is O(1), so entries can carry several of
//! them: inter-arrival times for burstiness and completed sequential run
//! lengths for access patterns.

use serde::{Deserialize, Serialize};

/// Streaming mean/variance accumulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OnlineStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl OnlineStats {
    pub const fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    #[inline]
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Fold another accumulator into this one (Chan et al. pairwise update)
    pub fn merge(&mut self, other: &OnlineStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let total = n_a + n_b;
        let delta = other.mean - self.mean;

        self.mean += delta * n_b / total;
        self.m2 += other.m2 + delta * delta * n_a * n_b / total;
        self.count += other.count;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the observations, reported only once there are two of them
    pub fn mean(&self) -> Option<f64> {
        (self.count >= 2).then_some(self.mean)
    }

    /// Sample variance `m2 / (n - 1)`
    pub fn variance(&self) -> Option<f64> {
        (self.count >= 2).then(|| self.m2 / (self.count - 1) as f64)
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Coefficient of variation `stddev / |mean|`
    pub fn cov(&self) -> Option<f64> {
        let stddev = self.stddev()?;
        if self.mean == 0.0 {
            return None;
        }
        Some(stddev / self.mean.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_small_counts_report_nothing() {
        let mut stats = OnlineStats::new();
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.cov(), None);

        stats.record(10.0);
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.variance(), None);
        assert_eq!(stats.cov(), None);
    }

    #[test]
    fn test_known_values() {
        let mut stats = OnlineStats::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.record(v);
        }
        assert!(approx(stats.mean().unwrap(), 5.0));
        // Sample variance of the classic example is 32 / 7
        assert!(approx(stats.variance().unwrap(), 32.0 / 7.0));
        assert!(approx(stats.cov().unwrap(), (32.0f64 / 7.0).sqrt() / 5.0));
    }

    #[test]
    fn test_constant_stream_has_zero_cov() {
        let mut stats = OnlineStats::new();
        for _ in 0..50 {
            stats.record(8.0);
        }
        assert_eq!(stats.cov(), Some(0.0));
    }

    #[test]
    fn test_zero_mean_has_no_cov() {
        let mut stats = OnlineStats::new();
        stats.record(0.0);
        stats.record(0.0);
        assert_eq!(stats.mean(), Some(0.0));
        assert_eq!(stats.cov(), None);
    }

    #[test]
    fn test_merge_matches_sequential() {
        let values: Vec<f64> = (1..=20).map(|v| (v * v) as f64).collect();

        let mut whole = OnlineStats::new();
        values.iter().for_each(|v| whole.record(*v));

        let mut left = OnlineStats::new();
        let mut right = OnlineStats::new();
        values[..7].iter().for_each(|v| left.record(*v));
        values[7..].iter().for_each(|v| right.record(*v));
        left.merge(&right);

        assert_eq!(left.count(), whole.count());
        assert!(approx(left.mean().unwrap(), whole.mean().unwrap()));
        assert!((left.variance().unwrap() - whole.variance().unwrap()).abs() < 1e-6);
    }
}
