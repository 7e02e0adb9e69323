//! Configuration for the sync job
//!
//! Values come from the environment (a `.env` file is loaded by the binary
//! before this runs). Every variable is optional.
//!
//! | Variable | Default |
//! |---|---|
//! | `YATCO_API_BASE_URL` | `https://api.yatcoboss.com` |
//! | `YATCO_API_TOKEN` | unset |
//! | `YATCO_STATE_DIR` | `./.yatco-state` |
//! | `YATCO_OUTPUT_DIR` | `./data/vessels` |
//! | `YATCO_LOCK_DIR` | system temp dir |
//! | `YATCO_MAX_RECORDS` | `50` (`0` = unlimited) |
//! | `YATCO_LOCK_TIMEOUT_SECS` | `30` |

use crate::api::endpoints::DEFAULT_BASE_URL;
use crate::coordinator::{ImportOptions, DEFAULT_MAX_RECORDS};
use crate::error::ConfigError;
use crate::lock::DEFAULT_LOCK_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the CLI and coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// YATCO API host
    pub base_url: String,

    /// Token seeded into the option store when set
    pub api_token: Option<String>,

    /// Root of the option stores
    pub state_dir: PathBuf,

    /// Where vessel records are written
    pub output_dir: PathBuf,

    /// Where lock files live
    pub lock_dir: PathBuf,

    /// Cap on vessels per full import, `0` for unlimited
    pub max_records: usize,

    /// How long a run waits for a held lock
    pub lock_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            state_dir: PathBuf::from("./.yatco-state"),
            output_dir: PathBuf::from("./data/vessels"),
            lock_dir: std::env::temp_dir(),
            max_records: DEFAULT_MAX_RECORDS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Load from `YATCO_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("YATCO_API_BASE_URL") {
            config.base_url = url;
        }

        if let Ok(token) = std::env::var("YATCO_API_TOKEN") {
            let token = token.trim();
            if !token.is_empty() {
                config.api_token = Some(token.to_string());
            }
        }

        if let Ok(dir) = std::env::var("YATCO_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("YATCO_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("YATCO_LOCK_DIR") {
            config.lock_dir = PathBuf::from(dir);
        }

        if let Ok(value) = std::env::var("YATCO_MAX_RECORDS") {
            config.max_records = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    var: "YATCO_MAX_RECORDS",
                    value,
                })?;
        }

        if let Ok(value) = std::env::var("YATCO_LOCK_TIMEOUT_SECS") {
            let secs: u64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    var: "YATCO_LOCK_TIMEOUT_SECS",
                    value,
                })?;
            config.lock_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("API base URL must not be empty".to_string()));
        }

        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid("Lock timeout must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// Directory of the durable option store
    pub fn options_dir(&self) -> PathBuf {
        self.state_dir.join("options")
    }

    /// Directory of the transient (expiring) store
    pub fn transient_dir(&self) -> PathBuf {
        self.state_dir.join("transient")
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            max_records: self.max_records,
            lock_timeout: self.lock_timeout,
        }
    }
}
