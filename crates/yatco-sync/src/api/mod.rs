//! YATCO API access
//!
//! Transport seam, endpoint URLs, payload types and the fetch-with-fallback
//! protocol used by the import coordinator.

pub mod client;
pub mod endpoints;
pub mod fetcher;
pub mod types;

pub use client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use fetcher::VesselFetcher;
pub use types::{ConnectionReport, VesselRecord};
