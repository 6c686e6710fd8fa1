use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(String),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error("failed to read config file {path}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse config file {path}: {error}")]
    Parse {
        path: PathBuf,
        #[source]
        error: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("source returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("feed parsing error: {0}")]
    Parse(String),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl DeliveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            DeliveryError::Network(err) => err.status().map(|s| s.as_u16()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write marker {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to serialize marker: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("git {command} failed: {detail}")]
    Git { command: String, detail: String },
}

/// Fatal outcome of a pipeline run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("source {name} failed: {error}")]
    Fetch {
        name: String,
        #[source]
        error: FetchError,
    },
    #[error("notification delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}
