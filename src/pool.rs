use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::dispatch::Tick;
use crate::histogram::{ErrorKind, LatencyHistogram, RequestOutcome};
use crate::runner::CancelSignal;
use crate::spec::EndpointSpec;

/// An idle worker above the minimum retires after this long without a tick
const IDLE_GRACE: Duration = Duration::from_millis(500);

/// How often the supervisor re-evaluates the backlog
const SCALE_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// A worker is added when the backlog exceeds this multiple of the active
/// worker count (and the pool is below its maximum)
const SCALE_BACKLOG_FACTOR: usize = 2;

/// Elastic pool of workers consuming dispatch ticks and executing HTTP
/// requests against one endpoint.
///
/// The pool starts at `spec.threads` workers and may grow to
/// `spec.max_threads` when the tick backlog outruns current capacity; idle
/// workers above the minimum retire after a grace period. A semaphore caps
/// concurrent connections at `spec.connections`. Every consumed tick records
/// exactly one outcome to the histogram at its own completion time; workers
/// are never killed mid-request by the pool itself.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    client: Client,
    spec: EndpointSpec,
    histogram: Arc<LatencyHistogram>,
    ticks: async_channel::Receiver<Tick>,
    conn_permits: Semaphore,
    active: AtomicUsize,
    cancel: CancelSignal,
}

impl WorkerPool {
    pub fn new(
        client: Client,
        spec: EndpointSpec,
        histogram: Arc<LatencyHistogram>,
        ticks: async_channel::Receiver<Tick>,
        cancel: CancelSignal,
    ) -> Self {
        let conn_permits = Semaphore::new(spec.connections);
        WorkerPool {
            shared: Arc::new(PoolShared {
                client,
                spec,
                histogram,
                ticks,
                conn_permits,
                active: AtomicUsize::new(0),
                cancel,
            }),
        }
    }

    /// Run the pool until the tick channel is closed and drained and every
    /// worker has exited. The caller bounds this with the drain deadline.
    pub async fn run(self) {
        let shared = self.shared;
        let mut workers = JoinSet::new();
        for worker_id in 0..shared.spec.threads {
            shared.active.fetch_add(1, Ordering::AcqRel);
            workers.spawn(worker_loop(Arc::clone(&shared), worker_id));
        }
        let mut next_id = shared.spec.threads;

        let mut sweep = tokio::time::interval(SCALE_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    match joined {
                        Some(Ok(())) => {}
                        Some(Err(e)) => warn!("worker task failed: {e}"),
                        None => break, // all workers gone
                    }
                }
                _ = sweep.tick() => {
                    let backlog = shared.ticks.len();
                    let active = shared.active.load(Ordering::Acquire);
                    if active < shared.spec.max_threads
                        && backlog > SCALE_BACKLOG_FACTOR * active.max(1)
                    {
                        debug!(backlog, active, "backlog outran capacity, adding worker");
                        shared.active.fetch_add(1, Ordering::AcqRel);
                        workers.spawn(worker_loop(Arc::clone(&shared), next_id));
                        next_id += 1;
                    }
                }
            }
        }
        debug!(workers = next_id, "worker pool drained");
    }
}

impl PoolShared {
    /// Retire one idle worker, never shrinking below the minimum. CAS loop so
    /// two simultaneously idle workers cannot both take the last slot above
    /// the floor.
    fn try_retire(&self) -> bool {
        loop {
            let current = self.active.load(Ordering::Acquire);
            if current <= self.spec.threads {
                return false;
            }
            if self
                .active
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn worker_exited(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn worker_loop(shared: Arc<PoolShared>, worker_id: usize) {
    trace!(worker = worker_id, "worker started");
    loop {
        let tick = match timeout(IDLE_GRACE, shared.ticks.recv()).await {
            Ok(Ok(tick)) => tick,
            // Dispatcher finished and the queue is drained
            Ok(Err(_)) => break,
            Err(_) => {
                if shared.try_retire() {
                    trace!(worker = worker_id, "idle worker retired");
                    return;
                }
                continue;
            }
        };
        // Queued ticks are abandoned on cancellation, not executed
        if shared.cancel.is_cancelled() {
            break;
        }
        let Ok(permit) = shared.conn_permits.acquire().await else {
            break;
        };
        let outcome = execute_request(&shared).await;
        drop(permit);
        trace!(worker = worker_id, tick = tick.0, latency_us = outcome.latency.as_micros() as u64);
        if shared.histogram.record(&outcome).is_err() {
            // Only possible if the attack closed the histogram early
            warn!(worker = worker_id, "outcome dropped: histogram already closed");
            break;
        }
    }
    shared.worker_exited();
}

/// Issue one HTTP request and classify the result. Latency is measured to
/// response headers, matching the time-to-first-byte the SLA cares about; the
/// body is consumed afterwards to return the connection to the pool.
async fn execute_request(shared: &PoolShared) -> RequestOutcome {
    let spec = &shared.spec;
    let start = Instant::now();
    let mut request = shared
        .client
        .request(spec.method.clone(), &spec.url)
        .headers(spec.headers.clone());
    if !spec.body.is_empty() {
        request = request.body(spec.body.clone());
    }
    match request.send().await {
        Ok(response) => {
            let latency = start.elapsed();
            let status = response.status().as_u16();
            let _ = response.bytes().await;
            RequestOutcome::success(latency, status)
        }
        Err(e) => RequestOutcome::failure(start.elapsed(), ErrorKind::from(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::cancel_pair;

    fn test_spec(threads: usize, max_threads: usize) -> EndpointSpec {
        EndpointSpec::from_raw(crate::spec::RawEndpoint {
            target: crate::spec::RawTarget {
                method: Some("GET".to_string()),
                url: Some("http://127.0.0.1:9".to_string()),
                body: None,
                header: None,
            },
            query: crate::spec::RawQuery {
                threads: Some(threads),
                max_threads: Some(max_threads),
                connections: Some(10),
                duration: Some("1s".to_string()),
                request_rate: Some(100),
                timeout: Some("250ms".to_string()),
            },
        })
        .unwrap()
    }

    fn test_client(spec: &EndpointSpec) -> Client {
        Client::builder().timeout(spec.timeout).build().unwrap()
    }

    /// Accepts connections but never answers, so every request runs for the
    /// full client timeout.
    async fn spawn_stalled_server() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_pool_exits_when_channel_closes_empty() {
        let spec = test_spec(2, 2);
        let histogram = Arc::new(LatencyHistogram::new());
        let (tx, rx) = async_channel::unbounded();
        let (_handle, cancel) = cancel_pair();
        let pool = WorkerPool::new(test_client(&spec), spec, histogram, rx, cancel);
        drop(tx);
        timeout(Duration::from_secs(2), pool.run())
            .await
            .expect("pool must exit once the tick channel closes");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_records_errors() {
        // Port 9 (discard) refuses connections; every tick must still yield
        // exactly one recorded outcome, all of them errors.
        let spec = test_spec(2, 2);
        let histogram = Arc::new(LatencyHistogram::new());
        let (tx, rx) = async_channel::unbounded();
        let (_handle, cancel) = cancel_pair();
        let pool = WorkerPool::new(
            test_client(&spec),
            spec,
            Arc::clone(&histogram),
            rx,
            cancel,
        );
        for i in 0..5 {
            tx.send(Tick(i)).await.unwrap();
        }
        drop(tx);
        timeout(Duration::from_secs(10), pool.run()).await.unwrap();
        assert_eq!(histogram.total_count(), 5);
        assert_eq!(histogram.error_count(), 5);
        assert_eq!(histogram.success_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_pool_abandons_queued_ticks() {
        let spec = test_spec(2, 2);
        let histogram = Arc::new(LatencyHistogram::new());
        let (tx, rx) = async_channel::unbounded();
        let (handle, cancel) = cancel_pair();
        handle.cancel();
        let pool = WorkerPool::new(
            test_client(&spec),
            spec,
            Arc::clone(&histogram),
            rx,
            cancel,
        );
        for i in 0..50 {
            tx.send(Tick(i)).await.unwrap();
        }
        drop(tx);
        timeout(Duration::from_secs(2), pool.run()).await.unwrap();
        // Workers observed the cancellation before executing anything
        assert_eq!(histogram.total_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_scales_up_under_backlog() {
        let addr = spawn_stalled_server().await;
        let mut spec = test_spec(1, 4);
        spec.url = format!("http://{addr}/");
        let histogram = Arc::new(LatencyHistogram::new());
        let (tx, rx) = async_channel::unbounded();
        let (_handle, cancel) = cancel_pair();
        let client = test_client(&spec);
        let pool = WorkerPool::new(client, spec, Arc::clone(&histogram), rx, cancel);
        let shared = Arc::clone(&pool.shared);

        for i in 0..16 {
            tx.send(Tick(i)).await.unwrap();
        }
        drop(tx);
        let run = tokio::spawn(pool.run());

        // A backlog of 16 against one stalled worker must grow the pool to
        // its cap, and never past it.
        let mut peak = 0;
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            let active = shared.active.load(Ordering::Acquire);
            assert!(active <= 4, "pool grew past max_threads: {active}");
            peak = peak.max(active);
            if peak == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(peak, 4, "backlog never triggered scale-up to max_threads");

        timeout(Duration::from_secs(10), run).await.unwrap().unwrap();
        assert_eq!(histogram.total_count(), 16);
        assert_eq!(histogram.error_count(), 16);
    }

    #[tokio::test]
    async fn test_idle_workers_retire_to_minimum() {
        let addr = spawn_stalled_server().await;
        let mut spec = test_spec(1, 4);
        spec.url = format!("http://{addr}/");
        let histogram = Arc::new(LatencyHistogram::new());
        let (tx, rx) = async_channel::unbounded();
        let (_handle, cancel) = cancel_pair();
        let client = test_client(&spec);
        let pool = WorkerPool::new(client, spec, Arc::clone(&histogram), rx, cancel);
        let shared = Arc::clone(&pool.shared);

        for i in 0..12 {
            tx.send(Tick(i)).await.unwrap();
        }
        // Channel stays open so workers idle out instead of exiting
        let run = tokio::spawn(pool.run());

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline && histogram.total_count() < 12 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(histogram.total_count(), 12);

        // Once the queue is drained, workers above the minimum retire after
        // the grace period while the floor holds.
        let deadline = Instant::now() + IDLE_GRACE * 6;
        loop {
            let active = shared.active.load(Ordering::Acquire);
            assert!(active >= 1, "pool shrank below threads");
            if active == 1 {
                break;
            }
            assert!(
                Instant::now() < deadline,
                "idle workers never retired, still {active} active"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(IDLE_GRACE * 2).await;
        assert_eq!(shared.active.load(Ordering::Acquire), 1);

        drop(tx);
        timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
    }
}
