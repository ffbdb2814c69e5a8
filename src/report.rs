use serde::Serialize;

use crate::attack::EndpointResult;
use crate::series::PercentileSample;

/// The fixed "real-time API" bar: end-to-end P99 at or under 30ms. The engine
/// does not enforce it; it is passed through to reporting as a pass/fail
/// annotation.
pub const REALTIME_THRESHOLD_MS: f64 = 30.0;

// ---------------------------------------------------------------------------
// Table output
// ---------------------------------------------------------------------------

/// Print the per-endpoint summary table to stdout.
pub fn print_table(results: &[EndpointResult]) {
    println!();
    println!("================================================================================");
    println!("  Real-Time API Latency Report");
    println!("================================================================================");
    println!(
        "  Real-time threshold: P99 <= {:.0}ms",
        REALTIME_THRESHOLD_MS
    );
    println!();
    println!(
        "  {:<44} {:>8} {:>6} {:>8} {:>8} {:>8}  {}",
        "Endpoint", "Reqs", "Err%", "p50", "p99", "Max", "Real-time"
    );
    println!("  {}", "\u{2500}".repeat(94));

    for result in results {
        let total = result.total_count();
        let errors = result.error_count();
        let err_pct = if total > 0 {
            (errors as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let verdict = if result.is_realtime(REALTIME_THRESHOLD_MS) {
            "YES"
        } else {
            "no"
        };
        println!(
            "  {:<44} {:>8} {:>5.1}% {:>8} {:>8} {:>8}  {}",
            truncate_url(result.url(), 44),
            format_count(total),
            err_pct,
            format_latency(result.histogram.percentile(50.0)),
            format_latency(result.histogram.percentile(99.0)),
            format_latency(result.histogram.max_us()),
            verdict,
        );
    }
    println!("  {}", "\u{2500}".repeat(94));
    println!();
}

// ---------------------------------------------------------------------------
// JSON output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct JsonReport {
    pub realtime_threshold_ms: f64,
    pub endpoints: Vec<JsonEndpoint>,
}

#[derive(Serialize)]
pub struct JsonEndpoint {
    pub url: String,
    pub method: String,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub error_rate_pct: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    pub realtime: bool,
    pub percentiles: Vec<PercentileSample>,
}

/// Assemble the machine-readable report. Pure projection of the results; no
/// aggregation happens here.
pub fn json_report(results: &[EndpointResult]) -> JsonReport {
    let endpoints = results
        .iter()
        .map(|result| {
            let total = result.total_count();
            let errors = result.error_count();
            JsonEndpoint {
                url: result.url().to_string(),
                method: result.spec.method.to_string(),
                requests: total,
                successes: result.success_count(),
                errors,
                error_rate_pct: if total > 0 {
                    (errors as f64 / total as f64) * 100.0
                } else {
                    0.0
                },
                p50_ms: result.histogram.percentile(50.0) as f64 / 1_000.0,
                p99_ms: result.p99_ms,
                max_ms: result.histogram.max_us() as f64 / 1_000.0,
                realtime: result.is_realtime(REALTIME_THRESHOLD_MS),
                percentiles: result.series.clone(),
            }
        })
        .collect();
    JsonReport {
        realtime_threshold_ms: REALTIME_THRESHOLD_MS,
        endpoints,
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn format_latency(us: u64) -> String {
    if us < 1_000 {
        format!("{}us", us)
    } else if us < 1_000_000 {
        format!("{:.1}ms", us as f64 / 1_000.0)
    } else {
        format!("{:.2}s", us as f64 / 1_000_000.0)
    }
}

fn format_count(n: u64) -> String {
    if n < 1_000 {
        n.to_string()
    } else if n < 1_000_000 {
        format!("{},{:03}", n / 1_000, n % 1_000)
    } else {
        format!(
            "{},{:03},{:03}",
            n / 1_000_000,
            (n % 1_000_000) / 1_000,
            n % 1_000
        )
    }
}

fn truncate_url(url: &str, max_len: usize) -> String {
    if url.len() <= max_len {
        return url.to_string();
    }
    // Keep the tail; the cut must land on a char boundary
    let mut start = url.len() - (max_len - 3);
    while !url.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &url[start..])
}
