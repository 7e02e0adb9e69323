//! YATCO listing sync
//!
//! Pulls yacht listings from the YATCO REST API and hands them to a record
//! store, one vessel at a time. A run is:
//!
//! - single-flight across processes ([`lock::FileLock`])
//! - cancellable between network calls ([`signal::StopSignal`])
//! - observable through a persisted status record with staleness detection
//!   ([`status::StatusStore`])
//! - tolerant of missing full specifications, falling back to basic details
//!   ([`api::VesselFetcher`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use yatco_common::{KvStore, MemoryKvStore};
//! use yatco_sync::api::{ReqwestHttpClient, VesselFetcher};
//! use yatco_sync::{FileLock, ImportCoordinator, JobType, MemoryRecordStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let durable = Arc::new(MemoryKvStore::new());
//!     durable.set("yatco_api_token", serde_json::json!("token"))?;
//!
//!     let fetcher = VesselFetcher::new(Arc::new(ReqwestHttpClient::new()), "https://api.yatcoboss.com");
//!     let coordinator = ImportCoordinator::new(
//!         fetcher,
//!         Arc::new(MemoryRecordStore::new()),
//!         FileLock::in_temp_dir(),
//!         durable,
//!         Arc::new(MemoryKvStore::new()),
//!     );
//!
//!     let summary = coordinator.run(JobType::Full).await?;
//!     println!("{} vessels imported", summary.processed);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod records;
pub mod signal;
pub mod status;

pub use config::SyncConfig;
pub use coordinator::{ImportCoordinator, ImportOptions, ImportSummary, API_TOKEN_KEY};
pub use error::{ConfigError, FetchError, ImportError, LockError};
pub use lock::{FileLock, LockHandle, LockState};
pub use records::{JsonDirRecordStore, MemoryRecordStore, RecordStore};
pub use signal::StopSignal;
pub use status::{JobState, JobStatus, JobType, StatusStore};
