//! YATCO Common Library
//!
//! Shared infrastructure for the YATCO sync workspace.
//!
//! - **Key/value storage**: the [`kv::KvStore`] capability with in-memory,
//!   file-backed and cached implementations
//! - **Logging**: `tracing` subscriber setup driven by `YATCO_LOG_*`
//!   variables
//! - **Errors**: the [`KvError`] type shared by all store backends

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod kv;
pub mod logging;

// Re-export commonly used types
pub use error::{KvError, Result};
pub use kv::{CachedKvStore, FileKvStore, KvStore, MemoryKvStore};
