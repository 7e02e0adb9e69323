//! API endpoint URL builders and per-endpoint timeouts
//!
//! Helper functions to construct YATCO API endpoint URLs.

use std::time::Duration;

/// Default YATCO API host
pub const DEFAULT_BASE_URL: &str = "https://api.yatcoboss.com";

/// Request timeout for the active listing IDs
pub const ACTIVE_IDS_TIMEOUT: Duration = Duration::from_secs(30);

/// Request / connect timeouts for the full specifications endpoint
pub const FULL_SPECS_TIMEOUT: Duration = Duration::from_secs(20);
pub const FULL_SPECS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request / connect timeouts for the basic details endpoint
pub const DETAILS_TIMEOUT: Duration = Duration::from_secs(15);
pub const DETAILS_CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

/// Build active vessel IDs URL
pub fn active_ids_url(base_url: &str) -> String {
    format!("{}/api/v1/ForSale/vessel/activevesselmlsid", trim(base_url))
}

/// Build full specifications URL
pub fn full_specs_url(base_url: &str, vessel_id: i64) -> String {
    format!(
        "{}/api/v1/ForSale/Vessel/{}/Details/FullSpecsAll",
        trim(base_url),
        vessel_id
    )
}

/// Build basic details URL
pub fn details_url(base_url: &str, vessel_id: i64) -> String {
    format!("{}/api/v1/ForSale/Vessel/{}/Details", trim(base_url), vessel_id)
}

fn trim(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}
