//! Sink for imported vessel records
//!
//! The coordinator hands every fetched record to a [`RecordStore`]. How a
//! record is mapped into the downstream catalog is the store's business.

use crate::api::types::VesselRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, info};

/// Destination of imported records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record for `vessel_id`
    async fn store(&self, vessel_id: i64, record: &VesselRecord) -> Result<()>;

    /// IDs of every record currently held
    async fn known_ids(&self) -> Result<Vec<i64>>;

    /// Retire records for listings that are no longer active.
    ///
    /// Returns how many records were retired.
    async fn mark_removed(&self, vessel_ids: &[i64]) -> Result<usize>;
}

/// One pretty-printed JSON file per vessel: `<dir>/<id>.json`.
///
/// Removed listings are moved to `<dir>/removed/` rather than deleted.
#[derive(Debug, Clone)]
pub struct JsonDirRecordStore {
    dir: PathBuf,
}

impl JsonDirRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, vessel_id: i64) -> PathBuf {
        self.dir.join(format!("{vessel_id}.json"))
    }

    pub fn removed_dir(&self) -> PathBuf {
        self.dir.join("removed")
    }
}

#[async_trait]
impl RecordStore for JsonDirRecordStore {
    async fn store(&self, vessel_id: i64, record: &VesselRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", self.dir.display()))?;

        let path = self.record_path(vessel_id);
        let tmp = self.dir.join(format!(".{vessel_id}.json.tmp"));
        let json = serde_json::to_vec_pretty(&record.to_value())?;

        fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move record into {}", path.display()))?;

        debug!(vessel_id, path = %path.display(), partial = record.is_partial(), "Stored vessel record");
        Ok(())
    }

    async fn known_ids(&self) -> Result<Vec<i64>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", self.dir.display()));
            },
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<i64>().ok())
            else {
                continue;
            };
            if entry.file_type().await?.is_file() {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    async fn mark_removed(&self, vessel_ids: &[i64]) -> Result<usize> {
        if vessel_ids.is_empty() {
            return Ok(0);
        }

        let removed_dir = self.removed_dir();
        fs::create_dir_all(&removed_dir)
            .await
            .with_context(|| format!("Failed to create {}", removed_dir.display()))?;

        let mut moved = 0;
        for &vessel_id in vessel_ids {
            let from = self.record_path(vessel_id);
            let to = removed_dir.join(format!("{vessel_id}.json"));
            match fs::rename(&from, &to).await {
                Ok(()) => moved += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(vessel_id, "No record to retire");
                },
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to retire {}", from.display()));
                },
            }
        }

        info!(count = moved, "Retired removed vessels");
        Ok(moved)
    }
}

/// In-process store, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<i64, VesselRecord>>,
    removed: Mutex<Vec<i64>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with records that count as already imported
    pub fn with_records(records: impl IntoIterator<Item = (i64, VesselRecord)>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, vessel_id: i64) -> Option<VesselRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(&vessel_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs passed to `mark_removed`, in call order
    pub fn removed(&self) -> Vec<i64> {
        self.removed.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn store(&self, vessel_id: i64, record: &VesselRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("record map poisoned"))?
            .insert(vessel_id, record.clone());
        Ok(())
    }

    async fn known_ids(&self) -> Result<Vec<i64>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("record map poisoned"))?;
        Ok(records.keys().copied().collect())
    }

    async fn mark_removed(&self, vessel_ids: &[i64]) -> Result<usize> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("record map poisoned"))?;
        let mut removed = self
            .removed
            .lock()
            .map_err(|_| anyhow::anyhow!("removed list poisoned"))?;

        let mut count = 0;
        for id in vessel_ids {
            if records.remove(id).is_some() {
                count += 1;
            }
            removed.push(*id);
        }
        Ok(count)
    }
}
