//! Error types for the YATCO sync job
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures they care about:
//!
//! - [`FetchError`]: one upstream API call (or one vessel's fetch protocol)
//! - [`LockError`]: acquiring the single-flight file lock
//! - [`ImportError`]: a whole coordinator run
//! - [`ConfigError`]: loading [`crate::config::SyncConfig`]

use std::time::Duration;
use thiserror::Error;
use yatco_common::KvError;

/// Failure of a single upstream fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network, DNS or timeout failure. Not retried here.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream answered with a non-200 status
    #[error("HTTP {status} from upstream API")]
    Http { status: u16, body: String },

    /// Body was not the JSON shape the endpoint promises
    #[error("Failed to parse API response: {0}")]
    Parse(String),

    /// Valid but empty payload
    #[error("No data: {0}")]
    NoData(String),

    /// Cooperative cancellation was observed at a checkpoint
    #[error("Import stopped by request")]
    Stopped,
}

impl FetchError {
    pub fn no_data(msg: impl Into<String>) -> Self {
        Self::NoData(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether this error ends the whole import loop rather than one vessel
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Failure to obtain the single-flight lock
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock '{lock_name}' is held by another process (gave up after {waited:?})")]
    Timeout { lock_name: String, waited: Duration },

    #[error("Lock '{lock_name}' cannot be taken: advisory file locks are unsupported on this platform")]
    Unsupported { lock_name: String },
}

/// Failure of a coordinator run
#[derive(Error, Debug)]
pub enum ImportError {
    /// Another run holds the lock; this run must be skipped, not queued
    #[error("Another {job} import is already running: {source}")]
    LockTimeout {
        job: String,
        #[source]
        source: LockError,
    },

    #[error("Failed to acquire {job} lock: {source}")]
    Lock {
        job: String,
        #[source]
        source: LockError,
    },

    #[error("No YATCO API token configured. Set YATCO_API_TOKEN or store it under '{0}'.")]
    MissingToken(String),

    #[error("Failed to list active vessels: {0}")]
    Fetch(#[from] FetchError),

    /// Status persistence failed; never swallowed
    #[error("Failed to persist job status: {0}")]
    Status(#[from] KvError),

    #[error("Record store error: {0}")]
    Records(#[from] anyhow::Error),
}

/// Invalid environment configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
