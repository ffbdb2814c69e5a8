use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::runner::CancelSignal;

/// One "send now" event. Carries its sequence number for tracing.
#[derive(Debug, Clone, Copy)]
pub struct Tick(pub u64);

/// Emit evenly spaced ticks at `request_rate` per second for exactly
/// `duration`, then stop. Returns the number of ticks issued.
///
/// Sending and completion are decoupled: the dispatcher never waits for a
/// request to finish, so a slow endpoint cannot silently throttle the offered
/// load. When the pool lags, ticks queue in the channel (burst catch-up)
/// instead of being dropped; backpressure is the pool's problem. The tick
/// sequence ends at the duration deadline regardless of in-flight requests,
/// or immediately on cancellation.
pub async fn run_dispatcher(
    request_rate: u64,
    duration: Duration,
    ticks: async_channel::Sender<Tick>,
    mut cancel: CancelSignal,
) -> u64 {
    let period = Duration::from_secs_f64(1.0 / request_rate as f64);
    let deadline = tokio::time::Instant::now() + duration;
    let mut ticker = tokio::time::interval(period);
    // Queue missed ticks rather than skipping them
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                if ticks.send(Tick(sent)).await.is_err() {
                    // No workers left to receive; nothing useful to offer
                    break;
                }
                sent += 1;
            }
            _ = tokio::time::sleep_until(deadline) => break,
            _ = cancel.cancelled() => {
                debug!(sent, "dispatcher stopping on cancellation");
                break;
            }
        }
    }
    debug!(sent, "dispatcher finished");
    sent
}
