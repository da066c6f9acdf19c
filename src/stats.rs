#![forbid(unsafe_code)]

// Aggregate statistics shared by the run summary, the trace analyzer and the exporter.
// Percentiles are nearest-rank on the ascending-sorted values.

use serde::{Deserialize, Serialize};

/// Below this many samples a tail percentile reports the maximum instead of a rank estimate.
pub const MIN_RANKED_SAMPLES: usize = 20;

/// Summary of a sequence of numeric observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl AggregateStats {
    /// Computes stats over `values`, ignoring NaN and infinities.
    /// Returns `None` when nothing usable remains.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let sorted = sorted_finite(values);
        if sorted.is_empty() {
            return None;
        }

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();

        Some(Self {
            count,
            sum,
            mean: sum / count as f64,
            min: sorted[0],
            max: sorted[count - 1],
            p50: percentile(&sorted, 50),
            p95: percentile(&sorted, 95),
            p99: percentile(&sorted, 99),
        })
    }
}

/// Nearest-rank percentile over ascending-sorted data.
///
/// The rank is `floor(n * pct / 100)`, clamped to the last index so `pct = 100`
/// never reads past the end. Tail percentiles (above the median) over fewer than
/// [`MIN_RANKED_SAMPLES`] values report the maximum. Empty input yields 0.
pub fn percentile(sorted: &[f64], pct: u32) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if pct > 50 && n < MIN_RANKED_SAMPLES {
        return sorted[n - 1];
    }
    let idx = n.saturating_mul(pct as usize) / 100;
    sorted[idx.min(n - 1)]
}

/// Rounds to a fixed number of decimal places for the hand-off files.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_to(n: usize) -> Vec<f64> {
        (1..=n).map(|v| v as f64).collect()
    }

    #[test]
    fn test_nearest_rank_on_hundred_values() {
        let stats = AggregateStats::from_values(&one_to(100)).unwrap();
        assert_eq!(stats.p50, 51.0);
        assert_eq!(stats.p95, 96.0);
        assert_eq!(stats.p99, 100.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.mean, 50.5);
    }

    #[test]
    fn test_small_sample_tail_falls_back_to_max() {
        let stats = AggregateStats::from_values(&[3.0, 1.0, 5.0, 2.0, 4.0]).unwrap();
        assert_eq!(stats.p95, 5.0);
        assert_eq!(stats.p99, 5.0);
        // median still uses the integer-division midpoint
        assert_eq!(stats.p50, 3.0);
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let mut values = one_to(40);
        values.reverse();
        let stats = AggregateStats::from_values(&values).unwrap();
        assert_eq!(stats.p50, 21.0);
        assert_eq!(stats.p95, 39.0);
    }

    #[test]
    fn test_full_percentile_is_clamped() {
        let sorted = one_to(25);
        assert_eq!(percentile(&sorted, 100), 25.0);
    }

    #[test]
    fn test_empty_and_non_finite() {
        assert!(AggregateStats::from_values(&[]).is_none());
        assert!(AggregateStats::from_values(&[f64::NAN, f64::INFINITY]).is_none());
        assert_eq!(percentile(&[], 95), 0.0);

        let stats = AggregateStats::from_values(&[f64::NAN, 2.0]).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.max, 2.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(0.123456, 4), 0.1235);
    }

    #[test]
    fn test_sum_is_exact() {
        let stats = AggregateStats::from_values(&[1.0, 2.0, 4.0]).unwrap();
        assert_eq!(stats.sum, 7.0);
        assert_eq!(stats.count, 3);
    }
}
