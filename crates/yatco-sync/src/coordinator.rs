//! Import coordinator
//!
//! Drives one import run for a [`JobType`]:
//!
//! 1. Take the single-flight lock for the job (skip the run if it is held)
//! 2. Clear leftover stop flags and resolve the API token
//! 3. Plan the vessel IDs (all active IDs, or only new ones for a daily sync)
//! 4. Fetch and store each vessel sequentially, saving status after each one
//! 5. Finish as `completed` or `stopped` and release the lock
//!
//! Per-vessel failures are counted and the run carries on. Failures to
//! persist status abort the run.

use crate::api::fetcher::VesselFetcher;
use crate::error::{FetchError, ImportError, LockError};
use crate::lock::{FileLock, DEFAULT_LOCK_TIMEOUT};
use crate::records::RecordStore;
use crate::signal::StopSignal;
use crate::status::{JobState, JobStatus, JobType, StatusStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use yatco_common::KvStore;

/// Durable store key holding the API token
pub const API_TOKEN_KEY: &str = "yatco_api_token";

/// Default cap on vessels per full import
pub const DEFAULT_MAX_RECORDS: usize = 50;

/// Tunables for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Cap on vessels for a full import; `0` means unlimited
    pub max_records: usize,
    pub lock_timeout: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Outcome of a finished (or stopped) run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub job: JobType,
    pub total: u64,
    pub processed: u64,
    pub partial: u64,
    pub failed: u64,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_ids: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_ids: Option<u64>,
}

impl ImportSummary {
    fn from_status(job: JobType, status: &JobStatus) -> Self {
        Self {
            job,
            total: status.total,
            processed: status.processed,
            partial: status.partial,
            failed: status.failed,
            stopped: status.status == JobState::Stopped,
            new_ids: status.new_ids,
            removed_ids: status.removed_ids,
        }
    }
}

/// Runs imports against one set of collaborators
pub struct ImportCoordinator {
    fetcher: VesselFetcher,
    records: Arc<dyn RecordStore>,
    lock: FileLock,
    durable: Arc<dyn KvStore>,
    status: StatusStore,
    stop: StopSignal,
    options: ImportOptions,
}

impl ImportCoordinator {
    pub fn new(
        fetcher: VesselFetcher,
        records: Arc<dyn RecordStore>,
        lock: FileLock,
        durable: Arc<dyn KvStore>,
        transient: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            fetcher,
            records,
            lock,
            status: StatusStore::new(durable.clone(), transient.clone()),
            stop: StopSignal::new(durable.clone(), transient),
            durable,
            options: ImportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Run `job` to completion, failure or stop.
    ///
    /// Returns [`ImportError::LockTimeout`] without touching the network or
    /// the status record when another run holds the job's lock, and
    /// [`ImportError::Lock`] when the lock cannot be taken at all.
    pub async fn run(&self, job: JobType) -> Result<ImportSummary, ImportError> {
        let handle = self
            .lock
            .acquire(job.lock_name(), self.options.lock_timeout)
            .await
            .map_err(|source| match source {
                LockError::Timeout { .. } => ImportError::LockTimeout {
                    job: job.to_string(),
                    source,
                },
                LockError::Unsupported { .. } => ImportError::Lock {
                    job: job.to_string(),
                    source,
                },
            })?;

        let result = self.run_locked(job).await;

        if !self.lock.release(handle) {
            warn!(job = %job, "Lock release reported failure");
        }

        match &result {
            Ok(summary) => info!(
                job = %job,
                total = summary.total,
                processed = summary.processed,
                partial = summary.partial,
                failed = summary.failed,
                stopped = summary.stopped,
                "Import finished"
            ),
            Err(e) => warn!(job = %job, error = %e, "Import failed"),
        }

        result
    }

    async fn run_locked(&self, job: JobType) -> Result<ImportSummary, ImportError> {
        self.stop.clear()?;

        let mut status = JobStatus::started();

        let Some(token) = self.resolve_token()? else {
            let err = ImportError::MissingToken(API_TOKEN_KEY.to_string());
            status.last_error = Some(err.to_string());
            status.finish(JobState::Failed);
            self.status.save_status(job, &mut status)?;
            return Err(err);
        };

        self.status.save_status(job, &mut status)?;
        self.announce(&format!("Starting {job} import"));
        info!(job = %job, max_records = self.options.max_records, "Import started");

        let ids = match self.plan(job, &token, &mut status).await {
            Ok(ids) => ids,
            Err(e) => {
                status.last_error = Some(e.to_string());
                status.finish(JobState::Failed);
                self.status.save_status(job, &mut status)?;
                self.announce(&format!("{job} import failed: {e}"));
                return Err(e);
            },
        };

        status.total = ids.len() as u64;
        self.status.save_status(job, &mut status)?;

        let total = ids.len();
        let mut stopped = false;

        for (index, vessel_id) in ids.into_iter().enumerate() {
            status.current_vessel_id = Some(vessel_id);
            self.status.save_status(job, &mut status)?;
            self.announce(&format!(
                "Processing vessel {}/{} (ID {vessel_id})",
                index + 1,
                total
            ));

            match self
                .fetcher
                .fetch_full_specs(&token, vessel_id, &self.stop)
                .await
            {
                Ok(record) => match self.records.store(vessel_id, &record).await {
                    Ok(()) => {
                        status.processed += 1;
                        if record.is_partial() {
                            status.partial += 1;
                        }
                    },
                    Err(e) => {
                        warn!(vessel_id, error = %e, "Failed to store vessel record");
                        status.record_error(format!("Vessel {vessel_id}: failed to store record: {e:#}"));
                    },
                },
                Err(FetchError::Stopped) => {
                    info!(job = %job, vessel_id, processed = status.processed, "Import stopped by request");
                    stopped = true;
                    break;
                },
                Err(e) => {
                    warn!(vessel_id, error = %e, "Failed to fetch vessel");
                    status.record_error(format!("Vessel {vessel_id}: {e}"));
                },
            }

            self.status.save_status(job, &mut status)?;
        }

        if stopped {
            status.finish(JobState::Stopped);
            self.status.save_status(job, &mut status)?;
            self.stop.clear()?;
            self.announce(&format!(
                "{job} import stopped after {} of {total} vessels",
                status.processed
            ));
        } else {
            status.finish(JobState::Completed);
            self.status.save_status(job, &mut status)?;
            self.announce(&format!(
                "{job} import completed: {} processed, {} partial, {} failed",
                status.processed, status.partial, status.failed
            ));
        }

        Ok(ImportSummary::from_status(job, &status))
    }

    /// Vessel IDs this run should fetch
    async fn plan(&self, job: JobType, token: &str, status: &mut JobStatus) -> Result<Vec<i64>, ImportError> {
        match job {
            JobType::Full => Ok(self
                .fetcher
                .list_active_ids(token, self.options.max_records)
                .await?),
            JobType::DailySync => {
                let active = self.fetcher.list_active_ids(token, 0).await?;
                let known: HashSet<i64> = self.records.known_ids().await?.into_iter().collect();
                let active_set: HashSet<i64> = active.iter().copied().collect();

                let mut seen = HashSet::new();
                let new_ids: Vec<i64> = active
                    .into_iter()
                    .filter(|id| !known.contains(id) && seen.insert(*id))
                    .collect();

                let mut removed: Vec<i64> = known.difference(&active_set).copied().collect();
                removed.sort_unstable();

                if active_set.is_empty() && !removed.is_empty() {
                    // Never retire every record on an empty active list.
                    warn!(known = known.len(), "Upstream reported no active vessels, keeping existing records");
                    removed.clear();
                }

                if !removed.is_empty() {
                    self.records.mark_removed(&removed).await?;
                }

                info!(
                    active = active_set.len(),
                    known = known.len(),
                    new = new_ids.len(),
                    removed = removed.len(),
                    "Daily sync planned"
                );

                status.new_ids = Some(new_ids.len() as u64);
                status.removed_ids = Some(removed.len() as u64);
                Ok(new_ids)
            },
        }
    }

    fn resolve_token(&self) -> Result<Option<String>, ImportError> {
        self.durable.evict(API_TOKEN_KEY);
        let token = match self.durable.get(API_TOKEN_KEY)? {
            Some(Value::String(token)) => Some(token.trim().to_string()),
            _ => None,
        };
        Ok(token.filter(|t| !t.is_empty()))
    }

    /// Best-effort human-readable progress message
    fn announce(&self, message: &str) {
        if let Err(e) = self.status.save_status_message(message) {
            warn!(error = %e, "Failed to save status message");
        }
    }
}
