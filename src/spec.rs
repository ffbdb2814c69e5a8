use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;

/// Default worker count when `threads` is not specified
pub const DEFAULT_THREADS: usize = 2;

/// Default upper bound on elastic workers
pub const DEFAULT_MAX_THREADS: usize = 2;

/// Default cap on concurrent TCP connections
pub const DEFAULT_CONNECTIONS: usize = 10;

/// Default attack duration
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// Default offered load in requests per second
pub const DEFAULT_REQUEST_RATE: u64 = 500;

/// Default per-request timeout, also the hard bound on the drain phase
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("endpoint has no HTTP method")]
    MissingMethod,
    #[error("endpoint has no URL")]
    MissingUrl,
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },
    #[error("duration must be positive")]
    NonPositiveDuration,
    #[error("request_rate must be positive")]
    ZeroRequestRate,
    #[error("threads and connections must be positive")]
    ZeroThreads,
    #[error("threads ({threads}) exceeds max_threads ({max_threads})")]
    ThreadsAboveMax { threads: usize, max_threads: usize },
}

/// Serde-facing record mirroring the JSON/YAML input shape. Every query
/// parameter is optional; defaulting happens in [`EndpointSpec::from_raw`],
/// uniformly across encodings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEndpoint {
    #[serde(default)]
    pub target: RawTarget,
    #[serde(default, rename = "query_parameters")]
    pub query: RawQuery,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTarget {
    pub method: Option<String>,
    pub url: Option<String>,
    pub body: Option<String>,
    /// Multimap, one list of values per header name
    pub header: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuery {
    pub threads: Option<usize>,
    pub max_threads: Option<usize>,
    pub connections: Option<usize>,
    /// Human-readable span, e.g. "10s" or "1m 30s"
    pub duration: Option<String>,
    pub request_rate: Option<u64>,
    /// Per-request timeout; also bounds the post-attack drain
    pub timeout: Option<String>,
}

/// Immutable description of one target endpoint and its load parameters.
///
/// Built once from a [`RawEndpoint`] before any network activity; a malformed
/// record aborts the whole run.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub method: Method,
    pub url: String,
    pub body: Vec<u8>,
    pub headers: HeaderMap,
    /// Minimum (and initial) worker count
    pub threads: usize,
    /// Upper bound the pool may elastically grow to
    pub max_threads: usize,
    /// Cap on concurrent TCP connections
    pub connections: usize,
    pub duration: Duration,
    /// Offered load in requests per second
    pub request_rate: u64,
    /// Per-request timeout and hard drain deadline
    pub timeout: Duration,
}

impl EndpointSpec {
    /// Validate a raw record and fill unset query parameters with defaults,
    /// never overwriting explicitly supplied values. Pure transform: no I/O.
    pub fn from_raw(raw: RawEndpoint) -> Result<Self, SpecError> {
        let method_str = raw.target.method.ok_or(SpecError::MissingMethod)?;
        if method_str.is_empty() {
            return Err(SpecError::MissingMethod);
        }
        let method = Method::from_bytes(method_str.to_ascii_uppercase().as_bytes())
            .map_err(|_| SpecError::InvalidMethod(method_str))?;

        let url = raw.target.url.ok_or(SpecError::MissingUrl)?;
        if url.is_empty() {
            return Err(SpecError::MissingUrl);
        }

        let headers = build_headers(raw.target.header.unwrap_or_default())?;

        let threads = raw.query.threads.unwrap_or(DEFAULT_THREADS);
        // An explicit `threads` without `max_threads` lifts the cap to match,
        // so asking for more workers than the default cap is not an error.
        let max_threads = raw
            .query
            .max_threads
            .unwrap_or_else(|| threads.max(DEFAULT_MAX_THREADS));
        let connections = raw.query.connections.unwrap_or(DEFAULT_CONNECTIONS);
        if threads == 0 || connections == 0 {
            return Err(SpecError::ZeroThreads);
        }
        if threads > max_threads {
            return Err(SpecError::ThreadsAboveMax {
                threads,
                max_threads,
            });
        }

        let duration = match raw.query.duration {
            Some(value) => parse_span(&value)?,
            None => DEFAULT_DURATION,
        };
        if duration.is_zero() {
            return Err(SpecError::NonPositiveDuration);
        }

        let request_rate = raw.query.request_rate.unwrap_or(DEFAULT_REQUEST_RATE);
        if request_rate == 0 {
            return Err(SpecError::ZeroRequestRate);
        }

        let timeout = match raw.query.timeout {
            Some(value) => parse_span(&value)?,
            None => DEFAULT_TIMEOUT,
        };
        if timeout.is_zero() {
            return Err(SpecError::NonPositiveDuration);
        }

        Ok(EndpointSpec {
            method,
            url,
            body: raw.target.body.unwrap_or_default().into_bytes(),
            headers,
            threads,
            max_threads,
            connections,
            duration,
            request_rate,
            timeout,
        })
    }
}

fn parse_span(value: &str) -> Result<Duration, SpecError> {
    humantime::parse_duration(value).map_err(|e| SpecError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn build_headers(raw: HashMap<String, Vec<String>>) -> Result<HeaderMap, SpecError> {
    let mut headers = HeaderMap::new();
    for (name, values) in raw {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| SpecError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        for value in values {
            let header_value =
                HeaderValue::from_str(&value).map_err(|e| SpecError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.append(header_name.clone(), header_value);
        }
    }
    Ok(headers)
}
