use serde::Serialize;

use crate::histogram::LatencyHistogram;

/// Fixed percentile ranks on a "nines" scale with their positions on a
/// logarithmic plot axis (1/(1-p) encoding). The log axis visually expands
/// the tail, where real-time SLAs are decided.
const NINES_RANKS: [(f64, f64); 8] = [
    (0.0, 1.0),
    (90.0, 10.0),
    (99.0, 100.0),
    (99.9, 1_000.0),
    (99.99, 10_000.0),
    (99.999, 100_000.0),
    (99.9999, 1_000_000.0),
    (99.99999, 10_000_000.0),
];

/// One point of the percentile-latency curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSample {
    /// Percentile rank in 0..100
    pub rank: f64,
    /// Position on the logarithmic plot axis (1, 10, 100, ...)
    pub axis_position: f64,
    pub latency_ms: f64,
}

/// Extract the ordered (rank, latency) sequence from a closed histogram.
///
/// Pure and deterministic: re-running on the same closed histogram yields an
/// identical sequence. Once a rank reports the histogram maximum, deeper
/// ranks would only repeat it, so the curve is truncated there — mirroring a
/// percentile plot that stops once it has covered the whole distribution.
pub fn percentile_series(histogram: &LatencyHistogram) -> Vec<PercentileSample> {
    if histogram.total_count() == 0 {
        return Vec::new();
    }
    let max_us = histogram.max_us();
    let mut series = Vec::with_capacity(NINES_RANKS.len());
    for (rank, axis_position) in NINES_RANKS {
        let us = histogram.percentile(rank);
        series.push(PercentileSample {
            rank,
            axis_position,
            latency_ms: us as f64 / 1_000.0,
        });
        if us >= max_us {
            break;
        }
    }
    series
}
