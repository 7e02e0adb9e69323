//! YATCO API payload types

use crate::error::FetchError;
use serde_json::{Map, Value};
use std::fmt;

/// Longest upstream body quoted in a [`ConnectionReport`]
pub const MAX_SNIPPET_CHARS: usize = 400;

/// Outcome of a vessel fetch, normalised right after parsing
#[derive(Debug, Clone, PartialEq)]
pub enum VesselRecord {
    /// Full specifications payload
    Full(Value),
    /// Basic details payload, always carrying `Result` and/or `BasicInfo`
    Partial(Map<String, Value>),
    /// `null`, `{}` or `[]`
    Empty,
}

impl VesselRecord {
    /// Classify a full-specifications body. Anything other than an object
    /// or an empty payload is malformed.
    pub fn from_full_specs(body: Value) -> Result<Self, FetchError> {
        if is_empty_payload(&body) {
            return Ok(Self::Empty);
        }

        match body {
            Value::Object(_) => Ok(Self::Full(body)),
            other => Err(FetchError::parse(format!(
                "Expected full specs object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Classify a basic-details body.
    ///
    /// Bodies without a `Result` or `BasicInfo` key are wrapped as
    /// `{ "Result": body, "BasicInfo": [] }`.
    pub fn from_basic_details(body: Value) -> Self {
        if is_empty_payload(&body) {
            return Self::Empty;
        }

        match body {
            Value::Object(map) if map.contains_key("Result") || map.contains_key("BasicInfo") => {
                Self::Partial(map)
            },
            other => {
                let mut map = Map::new();
                map.insert("Result".to_string(), other);
                map.insert("BasicInfo".to_string(), Value::Array(Vec::new()));
                Self::Partial(map)
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }

    /// JSON form handed to the record store. Partial records carry
    /// `"partial": true`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Full(value) => value.clone(),
            Self::Partial(map) => {
                let mut map = map.clone();
                map.insert("partial".to_string(), Value::Bool(true));
                Value::Object(map)
            },
            Self::Empty => Value::Null,
        }
    }
}

/// `null`, an empty object or an empty array
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Result of a connection diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionReport {
    Transport(String),
    Http { status: u16, snippet: String },
    InvalidResponse(String),
    Connected { vessel_count: usize },
}

impl ConnectionReport {
    /// Non-200 answer; the body is cut to [`MAX_SNIPPET_CHARS`]
    pub fn http(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            snippet: body.chars().take(MAX_SNIPPET_CHARS).collect(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

impl fmt::Display for ConnectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Connection failed: {msg}"),
            Self::Http { status, snippet } if snippet.is_empty() => {
                write!(f, "API returned HTTP {status}")
            },
            Self::Http { status, snippet } => write!(f, "API returned HTTP {status}: {snippet}"),
            Self::InvalidResponse(msg) => write!(f, "Invalid response from API: {msg}"),
            Self::Connected { vessel_count } => {
                write!(f, "Connected. API returned {vessel_count} active vessel IDs.")
            },
        }
    }
}

/// Article and kind of a JSON value, for error messages
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_payloads() {
        assert!(VesselRecord::from_full_specs(json!(null)).unwrap().is_empty());
        assert!(VesselRecord::from_full_specs(json!({})).unwrap().is_empty());
        assert!(VesselRecord::from_full_specs(json!([])).unwrap().is_empty());
        assert!(!VesselRecord::from_full_specs(json!({"VesselID": 1})).unwrap().is_empty());
        assert!(VesselRecord::from_basic_details(json!(null)).is_empty());
    }

    #[test]
    fn test_scalar_full_specs_are_malformed() {
        for body in [json!("n/a"), json!(42), json!(true), json!([{"VesselID": 1}])] {
            let err = VesselRecord::from_full_specs(body.clone()).unwrap_err();
            assert!(matches!(err, FetchError::Parse(_)), "{body} gave {err:?}");
        }
    }

    #[test]
    fn test_basic_details_kept_when_shaped() {
        let record = VesselRecord::from_basic_details(json!({"Result": {"Name": "Aurora"}}));
        assert_eq!(
            record.to_value(),
            json!({"Result": {"Name": "Aurora"}, "partial": true})
        );
    }

    #[test]
    fn test_basic_details_wrapped_when_unshaped() {
        let record = VesselRecord::from_basic_details(json!({"Name": "Aurora"}));
        assert!(record.is_partial());
        assert_eq!(
            record.to_value(),
            json!({"Result": {"Name": "Aurora"}, "BasicInfo": [], "partial": true})
        );
    }

    #[test]
    fn test_full_record_value_untouched() {
        let body = json!({"BasicInfo": {"LOA": 42}});
        assert_eq!(VesselRecord::Full(body.clone()).to_value(), body);
    }

    #[test]
    fn test_connection_report_snippet_truncated() {
        let body = "x".repeat(1000);
        let report = ConnectionReport::http(500, &body);
        let ConnectionReport::Http { snippet, .. } = &report else {
            panic!("expected HTTP report");
        };
        assert_eq!(snippet.chars().count(), MAX_SNIPPET_CHARS);
        assert!(report.to_string().starts_with("API returned HTTP 500: xxx"));
        assert!(!report.is_success());
    }

    #[test]
    fn test_connected_display() {
        let report = ConnectionReport::Connected { vessel_count: 12 };
        assert!(report.is_success());
        assert_eq!(report.to_string(), "Connected. API returned 12 active vessel IDs.");
    }
}
