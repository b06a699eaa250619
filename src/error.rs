// src/error.rs

//! Typed errors for every layer of the sweep.
//!
//! Each component owns a small error enum; [`SweepError`] aggregates them for
//! the orchestration layer and the binary.

use std::time::Duration;

use thiserror::Error;

/// Failures of a single HTTP fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {}ms: {url}", .after.as_millis())]
    Timeout { url: String, after: Duration },

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Response from {url} was {status}")]
    Status { url: String, status: u16 },

    #[error("Transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Wraps a reqwest error, classifying timeouts separately.
    pub fn from_reqwest(url: &str, timeout: Option<Duration>, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after: timeout.unwrap_or_default(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// Failures while streaming a gzip archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to decompress {path}: {source}")]
    Decompress {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Common Crawl catalog could not be parsed: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("Common Crawl catalog is empty")]
    EmptyCatalog,

    #[error("Unknown Common Crawl dataset: {0}")]
    UnknownDataset(String),
}

/// Failures of the isolated target generator.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Invalid address range: {from} is greater than {to}")]
    InvalidRange { from: String, to: String },

    #[error("Failed to spawn the generator thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Generator thread crashed: {0}")]
    Crashed(String),

    #[error("Generator control channel is closed")]
    ControlClosed,
}

/// Failure reported by a checker plugin.
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("Checker {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Unknown checker: {0}")]
    Unknown(String),
}

/// Failures of result sinks and target stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("The store {0} is not available")]
    UnknownStore(String),

    #[error("Invalid store URI: {0}")]
    InvalidUri(String),

    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures reading or writing batch descriptor files.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to read batch file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write batch file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed batch file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Batch id {id} requested but the file holds a flat list")]
    NotBatched { id: usize },

    #[error("Batch id {id} out of range (file holds {len} batches)")]
    OutOfRange { id: usize, len: usize },

    #[error("Batch count must be greater than zero")]
    ZeroBatches,
}

/// Configuration problems detected before any scanning starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("The value {0} is not a valid IPv4 address")]
    InvalidAddress(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

/// Top-level error for a scan or import run.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Checker error: {0}")]
    Checker(#[from] CheckerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
}
