use tokio::sync::watch;
use tracing::info;

use crate::attack::{run_attack, AttackError, EndpointResult};
use crate::spec::EndpointSpec;

/// Create a linked cancellation pair. The handle flips the signal once; every
/// cloned [`CancelSignal`] observes it.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Requests a run-wide stop. Held by whoever owns the run (the binary wires
/// it to Ctrl-C).
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side of the top-level cancellation signal.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. If the handle is dropped
    /// without cancelling, this pends forever — the run simply completes.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run one attack per spec, strictly sequentially and in input order, and
/// collect the results in that same order.
///
/// Pools run one endpoint at a time because connection and rate budgets are
/// per endpoint; overlapping attacks would conflate their resource usage. An
/// endpoint that fails every request still yields its result (a histogram of
/// 100% errors) — only malformed specifications abort a run, and those are
/// rejected before this function is ever called. On cancellation the current
/// attack drains and no further endpoints start.
pub async fn run_all(
    specs: &[EndpointSpec],
    cancel: CancelSignal,
) -> Result<Vec<EndpointResult>, AttackError> {
    let mut results = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(remaining = specs.len() - index, "run cancelled, skipping remaining endpoints");
            break;
        }
        info!(
            endpoint = index + 1,
            of = specs.len(),
            url = %spec.url,
            rate = spec.request_rate,
            duration_s = spec.duration.as_secs_f64(),
            "starting attack"
        );
        results.push(run_attack(spec, cancel.clone()).await?);
    }
    Ok(results)
}
