use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::spec::{EndpointSpec, RawEndpoint, SpecError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config extension {0:?} (expected .json, .yml or .yaml)")]
    UnsupportedFormat(String),
    #[error("endpoint {index}: {source}")]
    Spec { index: usize, source: SpecError },
}

/// Load an ordered endpoint list from a JSON or YAML file, selected by
/// extension. Order in the file is preserved; it drives attack order and
/// report layout.
pub fn load_file(path: &Path) -> Result<Vec<EndpointSpec>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let raw: Vec<RawEndpoint> = match ext {
        "json" => serde_json::from_str(&contents)?,
        "yml" | "yaml" => serde_yaml::from_str(&contents)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };
    debug!(path = %path.display(), endpoints = raw.len(), "loaded endpoint file");
    validate(raw)
}

/// Load the endpoint list from an inline JSON string (the `--data` flag).
pub fn load_inline(data: &str) -> Result<Vec<EndpointSpec>, ConfigError> {
    let raw: Vec<RawEndpoint> = serde_json::from_str(data)?;
    validate(raw)
}

fn validate(raw: Vec<RawEndpoint>) -> Result<Vec<EndpointSpec>, ConfigError> {
    raw.into_iter()
        .enumerate()
        .map(|(index, r)| {
            EndpointSpec::from_raw(r).map_err(|source| ConfigError::Spec { index, source })
        })
        .collect()
}
