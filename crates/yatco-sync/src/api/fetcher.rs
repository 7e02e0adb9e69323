//! Fetch-with-fallback retrieval of vessel data
//!
//! Every call carries `Authorization: Basic <token>`. Full specifications are
//! the primary source; when that endpoint answers with an empty payload the
//! smaller basic-details payload is fetched instead and marked partial.
//!
//! [`VesselFetcher::fetch_full_specs`] polls the [`StopSignal`] immediately
//! before and immediately after each network call. A stop observed after a
//! call discards whatever that call returned.

use crate::api::client::{HttpClient, HttpRequest};
use crate::api::endpoints;
use crate::api::types::{json_kind, ConnectionReport, VesselRecord};
use crate::error::FetchError;
use crate::signal::StopSignal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client for the YATCO listing endpoints
#[derive(Clone)]
pub struct VesselFetcher {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl VesselFetcher {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// IDs of all active listings, in upstream order.
    ///
    /// Non-numeric entries are dropped. `max_records == 0` means unlimited.
    pub async fn list_active_ids(&self, token: &str, max_records: usize) -> Result<Vec<i64>, FetchError> {
        let request = authorized(endpoints::active_ids_url(&self.base_url), token)
            .timeout(endpoints::ACTIVE_IDS_TIMEOUT);

        let body = self.get_json(request).await?;
        let mut ids = parse_id_list(body)?;

        if max_records > 0 && ids.len() > max_records {
            ids.truncate(max_records);
        }

        debug!(count = ids.len(), max_records, "Listed active vessel IDs");
        Ok(ids)
    }

    /// Full specifications for one vessel, falling back to basic details
    pub async fn fetch_full_specs(
        &self,
        token: &str,
        vessel_id: i64,
        stop: &StopSignal,
    ) -> Result<VesselRecord, FetchError> {
        checkpoint(stop, vessel_id, "before full specs request")?;

        let request = authorized(endpoints::full_specs_url(&self.base_url, vessel_id), token)
            .timeout(endpoints::FULL_SPECS_TIMEOUT)
            .connect_timeout(endpoints::FULL_SPECS_CONNECT_TIMEOUT);
        let result = self.get_json(request).await;

        checkpoint(stop, vessel_id, "after full specs request")?;

        match VesselRecord::from_full_specs(result?)? {
            VesselRecord::Empty => {},
            record => return Ok(record),
        }

        info!(vessel_id, "Full specs empty, falling back to basic details");
        checkpoint(stop, vessel_id, "before details request")?;
        let fallback = self.fetch_basic_details(token, vessel_id).await;
        checkpoint(stop, vessel_id, "after details request")?;

        fallback.map_err(|e| {
            FetchError::no_data(format!(
                "No full specs for vessel {vessel_id} and basic details failed: {e}"
            ))
        })
    }

    /// Basic details for one vessel, always returned as a partial record
    pub async fn fetch_basic_details(&self, token: &str, vessel_id: i64) -> Result<VesselRecord, FetchError> {
        let request = authorized(endpoints::details_url(&self.base_url, vessel_id), token)
            .timeout(endpoints::DETAILS_TIMEOUT)
            .connect_timeout(endpoints::DETAILS_CONNECT_TIMEOUT);

        let body = self.get_json(request).await?;
        match VesselRecord::from_basic_details(body) {
            VesselRecord::Empty => Err(FetchError::no_data(format!(
                "Details endpoint returned no data for vessel {vessel_id}"
            ))),
            record => Ok(record),
        }
    }

    /// Call the active IDs endpoint once and describe the outcome
    pub async fn test_connection(&self, token: &str) -> ConnectionReport {
        let request = authorized(endpoints::active_ids_url(&self.base_url), token)
            .timeout(endpoints::ACTIVE_IDS_TIMEOUT);

        let response = match self.http.get(request).await {
            Ok(response) => response,
            Err(e) => return ConnectionReport::Transport(e.to_string()),
        };

        if response.status != 200 {
            return ConnectionReport::http(response.status, &response.body);
        }

        let ids = parse_body(&response.body).and_then(parse_id_list);
        match ids {
            Ok(ids) => ConnectionReport::Connected {
                vessel_count: ids.len(),
            },
            Err(e) => ConnectionReport::InvalidResponse(e.to_string()),
        }
    }

    async fn get_json(&self, request: HttpRequest) -> Result<Value, FetchError> {
        let url = request.url.clone();
        let response = self.http.get(request).await?;

        if response.status != 200 {
            warn!(url = %url, status = response.status, "Upstream returned non-200");
            return Err(FetchError::Http {
                status: response.status,
                body: response.body,
            });
        }

        parse_body(&response.body)
    }
}

fn authorized(url: String, token: &str) -> HttpRequest {
    HttpRequest::get(url)
        .header("Authorization", format!("Basic {token}"))
        .header("Accept", "application/json")
}

fn checkpoint(stop: &StopSignal, vessel_id: i64, at: &str) -> Result<(), FetchError> {
    if stop.is_set() {
        info!(vessel_id, checkpoint = at, "Stop requested, abandoning vessel");
        return Err(FetchError::Stopped);
    }
    Ok(())
}

/// Parse a response body. A blank body counts as `null`.
fn parse_body(body: &str) -> Result<Value, FetchError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| FetchError::parse(e.to_string()))
}

fn parse_id_list(body: Value) -> Result<Vec<i64>, FetchError> {
    match body {
        Value::Array(items) => Ok(items.iter().filter_map(coerce_id).collect()),
        other => Err(FetchError::parse(format!(
            "Expected a JSON array of vessel IDs, got {}",
            json_kind(&other)
        ))),
    }
}

/// Numbers and numeric strings become IDs; fractions are truncated
fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        },
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_id() {
        assert_eq!(coerce_id(&json!(42)), Some(42));
        assert_eq!(coerce_id(&json!("17")), Some(17));
        assert_eq!(coerce_id(&json!(3.9)), Some(3));
        assert_eq!(coerce_id(&json!(" 8.2 ")), Some(8));
        assert_eq!(coerce_id(&json!("abc")), None);
        assert_eq!(coerce_id(&json!(null)), None);
        assert_eq!(coerce_id(&json!(true)), None);
        assert_eq!(coerce_id(&json!({"id": 1})), None);
    }

    #[test]
    fn test_parse_id_list_rejects_non_array() {
        let err = parse_id_list(json!({"ids": [1, 2]})).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_blank_body_is_null() {
        assert_eq!(parse_body("  \n").unwrap(), Value::Null);
        assert!(matches!(parse_body("<html>"), Err(FetchError::Parse(_))));
    }
}
