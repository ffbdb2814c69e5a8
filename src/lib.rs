pub mod attack;
pub mod config;
pub mod dispatch;
pub mod histogram;
pub mod pool;
pub mod report;
pub mod runner;
pub mod series;
pub mod spec;

pub use attack::{run_attack, AttackError, EndpointResult};
pub use histogram::{AggregatorClosed, ErrorKind, LatencyHistogram, RequestOutcome};
pub use report::REALTIME_THRESHOLD_MS;
pub use runner::{cancel_pair, run_all, CancelHandle, CancelSignal};
pub use series::{percentile_series, PercentileSample};
pub use spec::{EndpointSpec, RawEndpoint, SpecError};
