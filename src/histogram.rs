use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Highest trackable latency: 60 seconds, in microseconds. Larger values are
/// clamped into the top bucket.
pub const MAX_LATENCY_US: u64 = 60_000_000;

/// Each power-of-two latency range is split into 2^6 = 64 linear sub-buckets,
/// bounding the relative quantization error at 1/64 (~1.6%) while the absolute
/// bucket width doubles with each range. Tail latency keeps its relative
/// precision; microsecond values keep exact buckets.
const SUB_BUCKET_BITS: u32 = 6;
const SUB_BUCKETS: u64 = 1 << SUB_BUCKET_BITS;

const MAX_MSB: u32 = 63 - MAX_LATENCY_US.leading_zeros();
const BUCKET_COUNT: usize = (MAX_MSB - SUB_BUCKET_BITS + 2) as usize * SUB_BUCKETS as usize;

/// Recording attempted on a closed histogram. This is a programming-contract
/// violation, not a user-facing condition: the attack closes its histogram
/// only after every worker has exited.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("latency histogram is closed")]
pub struct AggregatorClosed;

/// Transport-level failure classification for a single request. Non-2xx
/// responses are not failures; they carry a status code instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request exceeded the configured timeout
    Timeout,
    /// TCP/TLS connection could not be established
    Connect,
    /// Any other transport or protocol failure
    Transport,
}

impl From<&reqwest::Error> for ErrorKind {
    fn from(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Connect
        } else {
            ErrorKind::Transport
        }
    }
}

/// Exactly one of status code or error kind, per the outcome contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// HTTP response received; any status counts as a completed request
    Status(u16),
    /// Transport-level failure before a response arrived
    Failed(ErrorKind),
}

/// One completed HTTP call: its latency and how it ended. Produced by a
/// worker, consumed immediately by the histogram, never retained.
#[derive(Debug, Clone, Copy)]
pub struct RequestOutcome {
    pub latency: Duration,
    pub disposition: Disposition,
}

impl RequestOutcome {
    pub fn success(latency: Duration, status: u16) -> Self {
        RequestOutcome {
            latency,
            disposition: Disposition::Status(status),
        }
    }

    pub fn failure(latency: Duration, kind: ErrorKind) -> Self {
        RequestOutcome {
            latency,
            disposition: Disposition::Failed(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.disposition, Disposition::Status(_))
    }
}

/// Concurrent-safe latency accumulator over log-linear buckets.
///
/// Recording is lock-free: one relaxed `fetch_add` per bucket, so concurrent
/// workers never serialize on a shared lock and no updates are lost under any
/// interleaving. Counters are monotonic while the histogram is open; `close`
/// freezes it, after which recording fails and percentile queries are valid.
/// Percentiles answer with bucket upper bounds, so the result is deterministic
/// for a given multiset of samples regardless of recording order.
pub struct LatencyHistogram {
    buckets: Vec<AtomicU64>,
    total: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    max_us: AtomicU64,
    closed: AtomicBool,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        LatencyHistogram {
            buckets: (0..BUCKET_COUNT).map(|_| AtomicU64::new(0)).collect(),
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Record one outcome. Fails with [`AggregatorClosed`] once the histogram
    /// has been closed.
    pub fn record(&self, outcome: &RequestOutcome) -> Result<(), AggregatorClosed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AggregatorClosed);
        }
        let us = (outcome.latency.as_micros() as u64).min(MAX_LATENCY_US);
        self.buckets[bucket_index(us)].fetch_add(1, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
        if outcome.is_success() {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Freeze the histogram. Idempotent; recording fails afterwards.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Largest recorded latency in microseconds (clamped at the trackable max)
    pub fn max_us(&self) -> u64 {
        self.max_us.load(Ordering::Relaxed)
    }

    /// Smallest recorded latency value (µs) such that at least `p` percent of
    /// samples are less than or equal to it, answered at bucket resolution.
    /// `p` outside 0..=100 is clamped. Returns 0 for an empty histogram.
    pub fn percentile(&self, p: f64) -> u64 {
        let total = self.total_count();
        if total == 0 {
            return 0;
        }
        let target = ((p.clamp(0.0, 100.0) / 100.0) * total as f64).ceil() as u64;
        let target = target.clamp(1, total);
        let mut seen = 0u64;
        for (index, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                // The top bucket's upper bound can exceed the true maximum;
                // the maximum itself is the tightest honest answer there.
                return bucket_upper_bound(index).min(self.max_us());
            }
        }
        self.max_us()
    }
}

/// Bucket index for a latency value in microseconds.
///
/// Values below `SUB_BUCKETS` land in exact unit buckets; above that, the
/// value's power-of-two range selects a group of 64 linear sub-buckets.
fn bucket_index(us: u64) -> usize {
    let us = us.min(MAX_LATENCY_US);
    if us < SUB_BUCKETS {
        return us as usize;
    }
    let msb = 63 - us.leading_zeros();
    let shift = msb - SUB_BUCKET_BITS;
    let offset = (us >> shift) - SUB_BUCKETS;
    ((msb - SUB_BUCKET_BITS + 1) as u64 * SUB_BUCKETS + offset) as usize
}

/// Highest latency value (µs) mapped to `index`.
fn bucket_upper_bound(index: usize) -> u64 {
    let index = index as u64;
    if index < SUB_BUCKETS {
        return index;
    }
    let scale = index >> SUB_BUCKET_BITS;
    let offset = index & (SUB_BUCKETS - 1);
    let shift = (scale - 1) as u32;
    ((SUB_BUCKETS + offset) << shift) + (1u64 << shift) - 1
}
