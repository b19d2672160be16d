//! # Timing Histogram
//!
//! Fixed-width log2 latency histogram used for read and write timings.
//!
//! ## Bin Layout
//!
//! ```text
//! bin  0  │ exactly 0 µs
//! bin  1  │ [1, 2)
//! bin  2  │ [2, 4)
//! bin  i  │ [2^(i-1), 2^i)
//! bin 30  │ [2^29, 2^30)
//! bin 31  │ >= 2^30           (overflow, ~18 minutes)
//! ```
//!
//! Recording is a single `leading_zeros` plus an increment. Histograms merge
//! by element-wise addition, so per-period histograms can be summed
//! downstream.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of bins in every timing histogram
pub const HIST_BINS: usize = 32;

/// Log2 latency histogram with running count, total, min and max
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingHistogram {
    bins: [u64; HIST_BINS],
    count: u64,
    total_us: u64,
    /// `u64::MAX` while empty
    min_us: u64,
    max_us: u64,
}

impl Default for TimingHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingHistogram {
    pub const fn new() -> Self {
        Self {
            bins: [0; HIST_BINS],
            count: 0,
            total_us: 0,
            min_us: u64::MAX,
            max_us: 0,
        }
    }

    /// Record one latency sample in microseconds
    #[inline]
    pub fn record(&mut self, value_us: u64) {
        self.bins[bin_index(value_us)] += 1;
        self.count += 1;
        self.total_us = self.total_us.saturating_add(value_us);
        self.min_us = self.min_us.min(value_us);
        self.max_us = self.max_us.max(value_us);
    }

    /// Add every sample of `other` into this histogram
    pub fn merge(&mut self, other: &TimingHistogram) {
        for (mine, theirs) in self.bins.iter_mut().zip(other.bins.iter()) {
            *mine += theirs;
        }
        self.count += other.count;
        self.total_us = self.total_us.saturating_add(other.total_us);
        self.min_us = self.min_us.min(other.min_us);
        self.max_us = self.max_us.max(other.max_us);
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn bins(&self) -> &[u64; HIST_BINS] {
        &self.bins
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total_us(&self) -> u64 {
        self.total_us
    }

    pub fn min_us(&self) -> Option<u64> {
        (self.count > 0).then_some(self.min_us)
    }

    pub fn max_us(&self) -> Option<u64> {
        (self.count > 0).then_some(self.max_us)
    }

    pub fn mean_us(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_us as f64 / self.count as f64)
    }

    /// Approximate percentile, see [`histogram_percentile`]
    pub fn percentile(&self, p: f64) -> Result<Option<f64>> {
        histogram_percentile(&self.bins, p)
    }
}

/// Bin for a latency value: 0 for zero, else `floor(log2 v) + 1` capped at 31
#[inline]
pub fn bin_index(value_us: u64) -> usize {
    if value_us == 0 {
        return 0;
    }
    let log2 = 63 - value_us.leading_zeros() as usize;
    (log2 + 1).min(HIST_BINS - 1)
}

/// Inclusive lower bound of a bin in microseconds
#[inline]
pub fn bin_lower_bound(bin: usize) -> f64 {
    if bin == 0 {
        0.0
    } else {
        (1u64 << (bin - 1)) as f64
    }
}

/// Approximate percentile of a serialized 32-bin histogram
///
/// Returns the lower bound of the bin containing the `ceil(total * p)`-th
/// sample, `None` when the histogram holds no samples.
pub fn histogram_percentile(bins: &[u64], p: f64) -> Result<Option<f64>> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::ValueOutOfRange {
            message: format!("percentile must be between 0.0 and 1.0, got {}", p),
        });
    }
    if bins.len() != HIST_BINS {
        return Err(Error::InvalidHistogram {
            expected: HIST_BINS,
            actual: bins.len(),
        });
    }

    // 32 u64 counters cannot overflow a u128 sum
    let total: u128 = bins.iter().map(|&count| count as u128).sum();
    if total == 0 {
        return Ok(None);
    }

    let target = ((total as f64 * p).ceil() as u128).max(1);
    let mut cumulative = 0u128;
    for (i, &count) in bins.iter().enumerate() {
        cumulative += count as u128;
        if cumulative >= target {
            return Ok(Some(bin_lower_bound(i)));
        }
    }

    // Unreachable with target <= total, kept for float edge cases
    Ok(Some(bin_lower_bound(HIST_BINS - 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_boundaries() {
        assert_eq!(bin_index(0), 0);
        assert_eq!(bin_index(1), 1);
        assert_eq!(bin_index(2), 2);
        assert_eq!(bin_index(3), 2);
        assert_eq!(bin_index(4), 3);
        assert_eq!(bin_index(16), 5);
        assert_eq!(bin_index(31), 5);
        assert_eq!(bin_index((1 << 29) + 5), 30);
        assert_eq!(bin_index(1 << 30), 31);
        assert_eq!(bin_index(u64::MAX), 31);
    }

    #[test]
    fn test_lower_bound_matches_bin() {
        for bin in 1..HIST_BINS {
            let bound = bin_lower_bound(bin) as u64;
            assert_eq!(bin_index(bound), bin);
        }
    }

    #[test]
    fn test_record_tracks_extremes() {
        let mut hist = TimingHistogram::new();
        assert_eq!(hist.min_us(), None);
        assert_eq!(hist.max_us(), None);

        for v in [7, 0, 300, 12] {
            hist.record(v);
        }
        assert_eq!(hist.count(), 4);
        assert_eq!(hist.total_us(), 319);
        assert_eq!(hist.min_us(), Some(0));
        assert_eq!(hist.max_us(), Some(300));
        assert_eq!(hist.bins().iter().sum::<u64>(), hist.count());
    }

    #[test]
    fn test_merge() {
        let mut a = TimingHistogram::new();
        let mut b = TimingHistogram::new();
        a.record(5);
        b.record(1000);
        b.record(2);
        a.merge(&b);

        assert_eq!(a.count(), 3);
        assert_eq!(a.min_us(), Some(2));
        assert_eq!(a.max_us(), Some(1000));
        assert_eq!(a.bins().iter().sum::<u64>(), 3);

        // Merging an empty histogram leaves the extremes alone
        a.merge(&TimingHistogram::new());
        assert_eq!(a.min_us(), Some(2));
    }
}
