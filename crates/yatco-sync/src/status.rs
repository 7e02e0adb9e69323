//! Job status persistence
//!
//! Structured job status lives in the durable store, one slot per job type.
//! A short human-readable progress message lives separately in the transient
//! store with its own expiry: it is rewritten far more often than the
//! structured record and losing it costs nothing.
//!
//! Staleness is detected lazily: a `running` record that has not been
//! updated for [`STALE_STATUS_AFTER`] is reported as `stalled` when read,
//! while the stored record stays untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use yatco_common::{KvStore, Result};

/// A running status older than this is reported as stalled
pub const STALE_STATUS_AFTER: Duration = Duration::from_secs(300);

/// Transient key for the human-readable progress message
pub const STATUS_MESSAGE_KEY: &str = "yatco_cache_warming_status";

/// Default expiry of the progress message
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(600);

/// Maximum number of per-vessel errors kept in a status record
pub const MAX_RECORDED_ERRORS: usize = 50;

/// Kind of import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full catalog import
    Full,
    /// Incremental daily sync of new and removed listings
    DailySync,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Full => "full",
            JobType::DailySync => "daily_sync",
        }
    }

    /// Durable key holding this job's [`JobStatus`]
    pub fn status_key(&self) -> &'static str {
        match self {
            JobType::Full => "yatco_import_status",
            JobType::DailySync => "yatco_daily_sync_status",
        }
    }

    /// Name of the file lock serializing runs of this job
    pub fn lock_name(&self) -> &'static str {
        match self {
            JobType::Full => "import",
            JobType::DailySync => "daily_sync",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Running,
    Completed,
    Failed,
    Stalled,
    Stopped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stalled => "stalled",
            JobState::Stopped => "stopped",
        }
    }

    /// Whether the job has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Stopped
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status of an import run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub status: JobState,

    /// Refreshed on every save
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,

    /// Set only on a read-time stalled reclassification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stalled_since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Vessels scheduled for this run
    #[serde(default)]
    pub total: u64,

    /// Vessels fetched and stored
    #[serde(default)]
    pub processed: u64,

    /// Stored vessels built from the basic-details fallback
    #[serde(default)]
    pub partial: u64,

    #[serde(default)]
    pub failed: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_vessel_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    /// Daily sync only: active IDs not seen before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_ids: Option<u64>,

    /// Daily sync only: known IDs no longer active upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_ids: Option<u64>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            status: JobState::Running,
            updated: Utc::now(),
            stalled_since: None,
            started_at: None,
            completed_at: None,
            total: 0,
            processed: 0,
            partial: 0,
            failed: 0,
            current_vessel_id: None,
            last_error: None,
            errors: Vec::new(),
            new_ids: None,
            removed_ids: None,
        }
    }
}

impl JobStatus {
    /// Fresh `running` status stamped with a start time
    pub fn started() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Record a per-vessel failure, keeping only the most recent entries
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.failed += 1;
        self.last_error = Some(message.clone());
        self.errors.push(message);
        if self.errors.len() > MAX_RECORDED_ERRORS {
            let excess = self.errors.len() - MAX_RECORDED_ERRORS;
            self.errors.drain(..excess);
        }
    }

    /// Move to a terminal state
    pub fn finish(&mut self, state: JobState) {
        self.status = state;
        self.current_vessel_id = None;
        self.completed_at = Some(Utc::now());
    }

    /// Copy of `self` reclassified to `stalled` if it is a running status
    /// whose last update is older than `stale_after`
    pub fn reclassified(mut self, now: DateTime<Utc>, stale_after: Duration) -> Self {
        let threshold = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(3650));
        if self.status == JobState::Running && now - self.updated > threshold {
            self.status = JobState::Stalled;
            self.stalled_since = Some(self.updated);
        }
        self
    }
}

/// Reads and writes job status records
#[derive(Clone)]
pub struct StatusStore {
    durable: Arc<dyn KvStore>,
    transient: Arc<dyn KvStore>,
    stale_after: Duration,
}

impl StatusStore {
    pub fn new(durable: Arc<dyn KvStore>, transient: Arc<dyn KvStore>) -> Self {
        Self {
            durable,
            transient,
            stale_after: STALE_STATUS_AFTER,
        }
    }

    /// Override the stalled-detection threshold
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Persist `status` for `job`, stamping `updated`.
    ///
    /// The read cache for the key is evicted so the next load sees this
    /// write. Store errors are returned to the caller.
    pub fn save_status(&self, job: JobType, status: &mut JobStatus) -> Result<()> {
        status.updated = Utc::now();
        let key = job.status_key();

        self.durable.set(key, serde_json::to_value(&*status)?)?;
        self.durable.evict(key);

        debug!(
            job = %job,
            status = %status.status,
            processed = status.processed,
            total = status.total,
            "Saved job status"
        );
        Ok(())
    }

    /// Load the status for `job`, bypassing any cache.
    ///
    /// A stale `running` record comes back as `stalled`; the stored value is
    /// not rewritten.
    pub fn load_status(&self, job: JobType) -> Result<Option<JobStatus>> {
        let key = job.status_key();
        self.durable.evict(key);

        let Some(value) = self.durable.get(key)? else {
            return Ok(None);
        };

        let stored: JobStatus = serde_json::from_value(value)?;
        let was_running = stored.status == JobState::Running;
        let status = stored.reclassified(Utc::now(), self.stale_after);
        if was_running && status.status == JobState::Stalled {
            warn!(job = %job, updated = %status.updated, "Running job has stopped reporting progress");
        }

        Ok(Some(status))
    }

    /// Delete the status record for `job`
    pub fn clear_status(&self, job: JobType) -> Result<()> {
        let key = job.status_key();
        self.durable.delete(key)?;
        self.durable.evict(key);
        Ok(())
    }

    /// Write the progress message with the default expiry
    pub fn save_status_message(&self, message: &str) -> Result<()> {
        self.save_status_message_with_ttl(message, DEFAULT_MESSAGE_TTL)
    }

    /// Write the progress message with an explicit expiry
    pub fn save_status_message_with_ttl(&self, message: &str, ttl: Duration) -> Result<()> {
        self.transient
            .set_with_ttl(STATUS_MESSAGE_KEY, message.into(), ttl)
    }

    /// Current progress message, if it has not expired
    pub fn load_status_message(&self) -> Result<Option<String>> {
        Ok(self
            .transient
            .get(STATUS_MESSAGE_KEY)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }
}
