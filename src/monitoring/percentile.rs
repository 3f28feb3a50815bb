//! Nearest-rank percentile statistics over bounded sample sets.
//!
//! Everything here is pure: inputs are copied and sorted locally, so the
//! callers' sample buffers are never reordered.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileSummary {
    pub count: usize,
    pub average: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Value at nearest-rank index `ceil(p/100 * len) - 1` of an ascending slice.
///
/// Returns 0 for an empty slice. `p` is clamped to [0, 100].
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

pub fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Copy and sort samples ascending; NaN values are dropped.
pub fn sorted_copy<'a, I>(samples: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut sorted: Vec<f64> = samples.into_iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Average, median, p95 and p99 over an unordered sample set.
pub fn summarize<'a, I>(samples: I) -> PercentileSummary
where
    I: IntoIterator<Item = &'a f64>,
{
    let sorted = sorted_copy(samples);
    if sorted.is_empty() {
        return PercentileSummary::default();
    }

    PercentileSummary {
        count: sorted.len(),
        average: average(&sorted),
        median: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
    }
}
