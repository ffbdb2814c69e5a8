use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dispatch::run_dispatcher;
use crate::histogram::{AggregatorClosed, ErrorKind, LatencyHistogram, RequestOutcome};
use crate::pool::WorkerPool;
use crate::runner::CancelSignal;
use crate::series::{percentile_series, PercentileSample};
use crate::spec::EndpointSpec;

#[derive(Error, Debug)]
pub enum AttackError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    /// Internal invariant break: the histogram refused a record while open
    #[error(transparent)]
    Aggregator(#[from] AggregatorClosed),
}

/// Everything one attack produced, read-only. Owned by the orchestrator and
/// handed to reporting collaborators as-is; they do no aggregation of their
/// own.
pub struct EndpointResult {
    pub spec: EndpointSpec,
    /// Closed histogram; queries are valid, recording is not
    pub histogram: Arc<LatencyHistogram>,
    /// Ordered nines-scale percentile curve for plotting
    pub series: Vec<PercentileSample>,
    /// 99th-percentile latency in milliseconds
    pub p99_ms: f64,
}

impl EndpointResult {
    pub fn url(&self) -> &str {
        &self.spec.url
    }

    pub fn total_count(&self) -> u64 {
        self.histogram.total_count()
    }

    pub fn success_count(&self) -> u64 {
        self.histogram.success_count()
    }

    pub fn error_count(&self) -> u64 {
        self.histogram.error_count()
    }

    /// Whether this endpoint's P99 clears the given real-time bar
    pub fn is_realtime(&self, threshold_ms: f64) -> bool {
        self.p99_ms <= threshold_ms
    }
}

/// Run one bounded-duration attack against a single endpoint: dispatch ticks
/// at the configured rate, execute them on the elastic worker pool, drain,
/// and freeze the histogram into an [`EndpointResult`].
///
/// Per-request failures are absorbed into the histogram; only failing to
/// construct the HTTP client propagates as an error.
pub async fn run_attack(
    spec: &EndpointSpec,
    cancel: CancelSignal,
) -> Result<EndpointResult, AttackError> {
    let client = Client::builder()
        .timeout(spec.timeout)
        .connect_timeout(spec.timeout)
        .pool_max_idle_per_host(spec.connections)
        .build()?;

    let histogram = Arc::new(LatencyHistogram::new());
    let (tick_tx, tick_rx) = async_channel::unbounded();

    let pool = WorkerPool::new(
        client,
        spec.clone(),
        Arc::clone(&histogram),
        tick_rx,
        cancel.clone(),
    );
    let mut pool_task = tokio::spawn(pool.run());

    // The dispatcher owns the only sender; the channel closes when it stops,
    // which is what tells the workers to drain and exit.
    let dispatched = run_dispatcher(spec.request_rate, spec.duration, tick_tx, cancel.clone()).await;

    // Drain: in-flight requests may finish, bounded by one request timeout
    if timeout(spec.timeout, &mut pool_task).await.is_err() {
        warn!(url = %spec.url, "drain deadline exceeded, aborting remaining requests");
        pool_task.abort();
        let _ = pool_task.await;
    }

    let recorded = histogram.total_count();
    if cancel.is_cancelled() {
        // Abandoned ticks were never sent on the wire; they are not failures
        debug!(
            url = %spec.url,
            dispatched,
            recorded,
            "attack cancelled, abandoning unexecuted ticks"
        );
    } else {
        // Every dispatched tick still unaccounted for at the drain deadline
        // becomes one timeout-error outcome; the timeout is the tightest
        // latency bound known for a request that never completed.
        let missing = dispatched.saturating_sub(recorded);
        if missing > 0 {
            warn!(url = %spec.url, missing, "recording drain-timeout outcomes");
        }
        for _ in 0..missing {
            histogram.record(&RequestOutcome::failure(spec.timeout, ErrorKind::Timeout))?;
        }
    }

    histogram.close();
    let series = percentile_series(&histogram);
    let p99_ms = histogram.percentile(99.0) as f64 / 1_000.0;

    info!(
        url = %spec.url,
        requests = histogram.total_count(),
        errors = histogram.error_count(),
        p99_ms,
        "attack complete"
    );

    Ok(EndpointResult {
        spec: spec.clone(),
        histogram,
        series,
        p99_ms,
    })
}
