//! End-to-end tests for import runs
//!
//! Each test drives an [`ImportCoordinator`] against a mock YATCO API with
//! in-memory option stores and a lock directory in a temp dir.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};
use yatco_common::{KvError, KvStore, MemoryKvStore};
use yatco_sync::api::{ReqwestHttpClient, VesselFetcher, VesselRecord};
use yatco_sync::signal::STOP_FLAG_KEY;
use yatco_sync::status::STATUS_MESSAGE_KEY;
use yatco_sync::{
    FetchError, FileLock, ImportCoordinator, ImportError, ImportOptions, JobState, JobType,
    MemoryRecordStore, RecordStore, StatusStore, StopSignal, API_TOKEN_KEY,
};

const ACTIVE_IDS: &str = "/api/v1/ForSale/vessel/activevesselmlsid";

struct Harness {
    server: MockServer,
    durable: Arc<MemoryKvStore>,
    transient: Arc<MemoryKvStore>,
    lock_dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let durable = Arc::new(MemoryKvStore::new());
        durable.set(API_TOKEN_KEY, json!("secret-token")).unwrap();

        Self {
            server: MockServer::start().await,
            durable,
            transient: Arc::new(MemoryKvStore::new()),
            lock_dir: TempDir::new().unwrap(),
        }
    }

    fn lock(&self) -> FileLock {
        FileLock::new(self.lock_dir.path()).with_backoff_unit(Duration::from_millis(10))
    }

    fn coordinator(&self, records: Arc<dyn RecordStore>) -> ImportCoordinator {
        let fetcher = VesselFetcher::new(Arc::new(ReqwestHttpClient::new()), self.server.uri());
        ImportCoordinator::new(
            fetcher,
            records,
            self.lock(),
            self.durable.clone(),
            self.transient.clone(),
        )
        .with_options(ImportOptions {
            max_records: 50,
            lock_timeout: Duration::from_millis(100),
        })
    }

    fn status(&self) -> StatusStore {
        StatusStore::new(self.durable.clone(), self.transient.clone())
    }

    fn stop(&self) -> StopSignal {
        StopSignal::new(self.durable.clone(), self.transient.clone())
    }

    async fn active_ids(&self, ids: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(ACTIVE_IDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(ids))
            .mount(&self.server)
            .await;
    }

    async fn full_specs(&self, id: i64, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/ForSale/Vessel/{id}/Details/FullSpecsAll")))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    async fn details(&self, id: i64, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/ForSale/Vessel/{id}/Details")))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    async fn full_specs_ok(&self, id: i64) {
        self.full_specs(
            id,
            ResponseTemplate::new(200).set_body_json(json!({"BasicInfo": {"VesselID": id}})),
        )
        .await;
    }
}

#[tokio::test]
async fn test_full_import_counts_full_partial_and_failed() {
    let h = Harness::new().await;
    h.active_ids(json!([1, 2, 3])).await;
    h.full_specs_ok(1).await;
    h.full_specs(2, ResponseTemplate::new(200).set_body_string("null")).await;
    h.details(2, ResponseTemplate::new(200).set_body_json(json!({"Result": {"Name": "Nomad"}})))
        .await;
    h.full_specs(3, ResponseTemplate::new(500)).await;

    let records = Arc::new(MemoryRecordStore::new());
    let summary = h.coordinator(records.clone()).run(JobType::Full).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.partial, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.stopped);

    assert!(matches!(records.get(1), Some(VesselRecord::Full(_))));
    assert!(records.get(2).unwrap().is_partial());
    assert!(records.get(3).is_none());

    let status = h.status().load_status(JobType::Full).unwrap().unwrap();
    assert_eq!(status.status, JobState::Completed);
    assert!(status.started_at.is_some());
    assert!(status.completed_at.is_some());
    assert_eq!(status.current_vessel_id, None);
    assert_eq!(status.errors.len(), 1);
    assert!(status.last_error.unwrap().contains("Vessel 3"));

    assert!(h.transient.get(STATUS_MESSAGE_KEY).unwrap().is_some());
    assert!(h.lock().check_lock("import").is_none());
}

#[tokio::test]
async fn test_max_records_limits_full_import() {
    let h = Harness::new().await;
    h.active_ids(json!([1, 2, 3, 4])).await;
    for id in 1..=4 {
        h.full_specs_ok(id).await;
    }

    let records = Arc::new(MemoryRecordStore::new());
    let summary = h
        .coordinator(records.clone())
        .with_options(ImportOptions {
            max_records: 2,
            lock_timeout: Duration::from_millis(100),
        })
        .run(JobType::Full)
        .await
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(records.len(), 2);
    assert!(records.get(3).is_none());
}

#[tokio::test]
async fn test_missing_token_fails_without_network() {
    let h = Harness::new().await;
    h.durable.delete(API_TOKEN_KEY).unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&h.server)
        .await;

    let err = h
        .coordinator(Arc::new(MemoryRecordStore::new()))
        .run(JobType::Full)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::MissingToken(_)), "got {err:?}");
    let status = h.status().load_status(JobType::Full).unwrap().unwrap();
    assert_eq!(status.status, JobState::Failed);
    assert!(status.last_error.is_some());
    assert!(h.lock().check_lock("import").is_none());
}

#[tokio::test]
async fn test_held_lock_skips_run_without_side_effects() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&h.server)
        .await;

    let holder = h.lock();
    let _held = holder.acquire("import", Duration::from_secs(1)).await.unwrap();

    let err = h
        .coordinator(Arc::new(MemoryRecordStore::new()))
        .run(JobType::Full)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::LockTimeout { .. }), "got {err:?}");
    assert!(h.status().load_status(JobType::Full).unwrap().is_none());
}

#[tokio::test]
async fn test_full_and_daily_jobs_use_separate_locks() {
    let h = Harness::new().await;
    h.active_ids(json!([])).await;

    let holder = h.lock();
    let _held = holder.acquire("import", Duration::from_secs(1)).await.unwrap();

    let summary = h
        .coordinator(Arc::new(MemoryRecordStore::new()))
        .run(JobType::DailySync)
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_listing_failure_marks_status_failed() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .and(path(ACTIVE_IDS))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&h.server)
        .await;

    let err = h
        .coordinator(Arc::new(MemoryRecordStore::new()))
        .run(JobType::Full)
        .await
        .unwrap_err();

    assert!(
        matches!(err, ImportError::Fetch(FetchError::Http { status: 502, .. })),
        "got {err:?}"
    );
    let status = h.status().load_status(JobType::Full).unwrap().unwrap();
    assert_eq!(status.status, JobState::Failed);
    assert!(status.last_error.unwrap().contains("502"));
    assert!(h.lock().check_lock("import").is_none());
}

/// Record store that requests a stop once it has stored `after` records
struct StopAfter {
    inner: MemoryRecordStore,
    stop: StopSignal,
    after: usize,
}

#[async_trait]
impl RecordStore for StopAfter {
    async fn store(&self, vessel_id: i64, record: &VesselRecord) -> anyhow::Result<()> {
        self.inner.store(vessel_id, record).await?;
        if self.inner.len() >= self.after {
            self.stop.request_stop()?;
        }
        Ok(())
    }

    async fn known_ids(&self) -> anyhow::Result<Vec<i64>> {
        self.inner.known_ids().await
    }

    async fn mark_removed(&self, vessel_ids: &[i64]) -> anyhow::Result<usize> {
        self.inner.mark_removed(vessel_ids).await
    }
}

#[tokio::test]
async fn test_stop_request_ends_run_and_clears_flag() {
    let h = Harness::new().await;
    h.active_ids(json!([1, 2, 3, 4])).await;
    for id in 1..=2 {
        h.full_specs_ok(id).await;
    }
    for id in 3..=4 {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/ForSale/Vessel/{id}/Details/FullSpecsAll")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1})))
            .expect(0)
            .mount(&h.server)
            .await;
    }

    let records = Arc::new(StopAfter {
        inner: MemoryRecordStore::new(),
        stop: h.stop(),
        after: 2,
    });
    let summary = h.coordinator(records.clone()).run(JobType::Full).await.unwrap();

    assert!(summary.stopped);
    assert_eq!(summary.processed, 2);
    assert_eq!(records.inner.len(), 2);

    let status = h.status().load_status(JobType::Full).unwrap().unwrap();
    assert_eq!(status.status, JobState::Stopped);
    assert!(status.completed_at.is_some());

    assert!(!h.stop().is_set());
    assert!(h.durable.get(STOP_FLAG_KEY).unwrap().is_none());
    assert!(h.lock().check_lock("import").is_none());
}

#[tokio::test]
async fn test_leftover_stop_flag_is_cleared_at_start() {
    let h = Harness::new().await;
    h.active_ids(json!([8])).await;
    h.full_specs_ok(8).await;
    h.stop().request_stop().unwrap();

    let summary = h
        .coordinator(Arc::new(MemoryRecordStore::new()))
        .run(JobType::Full)
        .await
        .unwrap();

    assert!(!summary.stopped);
    assert_eq!(summary.processed, 1);
}

#[tokio::test]
async fn test_daily_sync_fetches_new_and_retires_removed() {
    let h = Harness::new().await;
    h.active_ids(json!([1, 2, 3, 4])).await;
    for id in 3..=4 {
        h.full_specs_ok(id).await;
    }
    for id in 1..=2 {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/ForSale/Vessel/{id}/Details/FullSpecsAll")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1})))
            .expect(0)
            .mount(&h.server)
            .await;
    }

    let existing = [1, 2, 9].map(|id| (id, VesselRecord::Full(json!({"VesselID": id}))));
    let records = Arc::new(MemoryRecordStore::with_records(existing));

    let summary = h
        .coordinator(records.clone())
        .with_options(ImportOptions {
            max_records: 1,
            lock_timeout: Duration::from_millis(100),
        })
        .run(JobType::DailySync)
        .await
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.new_ids, Some(2));
    assert_eq!(summary.removed_ids, Some(1));
    assert_eq!(records.removed(), vec![9]);
    assert_eq!(records.known_ids().await.unwrap(), vec![1, 2, 3, 4]);

    let status = h.status().load_status(JobType::DailySync).unwrap().unwrap();
    assert_eq!(status.status, JobState::Completed);
    assert!(h.status().load_status(JobType::Full).unwrap().is_none());
}

#[tokio::test]
async fn test_daily_sync_keeps_records_on_empty_listing() {
    let h = Harness::new().await;
    h.active_ids(json!([])).await;

    let records = Arc::new(MemoryRecordStore::with_records([(
        5,
        VesselRecord::Full(json!({"VesselID": 5})),
    )]));
    let summary = h.coordinator(records.clone()).run(JobType::DailySync).await.unwrap();

    assert_eq!(summary.removed_ids, Some(0));
    assert!(records.removed().is_empty());
    assert_eq!(records.len(), 1);
}

/// Option store whose writes always fail, as on a full disk
struct ReadOnlyKvStore {
    inner: MemoryKvStore,
}

impl KvStore for ReadOnlyKvStore {
    fn get(&self, key: &str) -> yatco_common::Result<Option<serde_json::Value>> {
        self.inner.get(key)
    }

    fn set(&self, _key: &str, _value: serde_json::Value) -> yatco_common::Result<()> {
        Err(KvError::backend("disk full"))
    }

    fn set_with_ttl(&self, _key: &str, _value: serde_json::Value, _ttl: Duration) -> yatco_common::Result<()> {
        Err(KvError::backend("disk full"))
    }

    fn delete(&self, key: &str) -> yatco_common::Result<()> {
        self.inner.delete(key)
    }
}

#[tokio::test]
async fn test_status_write_failure_fails_run_and_releases_lock() {
    let h = Harness::new().await;
    h.active_ids(json!([1])).await;
    h.full_specs_ok(1).await;

    let inner = MemoryKvStore::new();
    inner.set(API_TOKEN_KEY, json!("secret-token")).unwrap();
    let durable = Arc::new(ReadOnlyKvStore { inner });

    let records = Arc::new(MemoryRecordStore::new());
    let coordinator = ImportCoordinator::new(
        VesselFetcher::new(Arc::new(ReqwestHttpClient::new()), h.server.uri()),
        records.clone(),
        h.lock(),
        durable,
        h.transient.clone(),
    )
    .with_options(ImportOptions {
        max_records: 50,
        lock_timeout: Duration::from_millis(100),
    });

    let err = coordinator.run(JobType::Full).await.unwrap_err();

    assert!(matches!(err, ImportError::Status(_)), "got {err:?}");
    assert!(records.is_empty());
    assert!(h.lock().check_lock(JobType::Full.lock_name()).is_none());
    h.lock()
        .acquire(JobType::Full.lock_name(), Duration::from_millis(50))
        .await
        .unwrap();
}
