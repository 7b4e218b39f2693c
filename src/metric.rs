//! The measurement record and its wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One probe outcome.
///
/// Created at the start of a probe cycle, fully populated (or short-circuited
/// on TCP failure) within that cycle, serialized once for the bus, and keyed
/// downstream by `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Creation time of the record; primary key downstream.
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Human-readable TCP failure description, if the connect failed.
    pub tcp_exception: Option<String>,
    /// TCP connect duration in milliseconds; 0 if connect failed.
    pub tcp_rt: f64,
    /// Duration of the first HTTP response in milliseconds.
    pub http_rt: f64,
    /// Status code of the first HTTP response.
    pub initial_response_code: Option<i16>,
    /// Redirects followed before the terminal response.
    pub num_redirects: i16,
    /// Cumulative duration across all HTTP hops in milliseconds.
    pub total_rt: f64,
    /// Status code of the terminal response.
    pub final_response_code: Option<i16>,
    /// Result of the content-regex match; None if no pattern was configured.
    pub content_found: Option<bool>,
}

impl Metric {
    /// Create an empty metric stamped with the current time.
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            tcp_exception: None,
            tcp_rt: 0.0,
            http_rt: 0.0,
            initial_response_code: None,
            num_redirects: 0,
            total_rt: 0.0,
            final_response_code: None,
            content_found: None,
        }
    }

    /// Serialize to the UTF-8 JSON bus payload.
    pub fn to_wire(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a bus payload.
    pub fn from_wire(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

impl Default for Metric {
    fn default() -> Self {
        Self::new()
    }
}

/// Serde adapter for the `%Y-%m-%d %H:%M:%S%z` timestamp pattern used on the
/// wire. Sub-second precision is intentionally dropped; cycles are seconds
/// apart, so the truncated timestamp stays unique per record.
mod wire_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_str(&s, FORMAT)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Metric {
        Metric {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            tcp_exception: None,
            tcp_rt: 12.5,
            http_rt: 40.25,
            initial_response_code: Some(301),
            num_redirects: 2,
            total_rt: 160.75,
            final_response_code: Some(200),
            content_found: Some(true),
        }
    }

    #[test]
    fn test_wire_round_trip() {
        let metric = sample();
        let bytes = metric.to_wire().unwrap();
        let decoded = Metric::from_wire(&bytes).unwrap();
        assert_eq!(decoded, metric);
    }

    #[test]
    fn test_timestamp_wire_pattern() {
        let value: serde_json::Value = serde_json::from_slice(&sample().to_wire().unwrap()).unwrap();
        assert_eq!(value["timestamp"], "2024-01-02 03:04:05+0000");
    }

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let metric = Metric {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            tcp_exception: Some("could not resolve host name: nope.invalid".to_string()),
            ..Metric::new()
        };
        let value: serde_json::Value = serde_json::from_slice(&metric.to_wire().unwrap()).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 9);
        assert!(value["initial_response_code"].is_null());
        assert!(value["final_response_code"].is_null());
        assert!(value["content_found"].is_null());
        assert_eq!(value["tcp_rt"], 0.0);
        assert_eq!(value["num_redirects"], 0);
    }

    #[test]
    fn test_tcp_failure_round_trip() {
        let metric = Metric {
            timestamp: Utc.with_ymd_and_hms(2023, 6, 30, 23, 59, 59).unwrap(),
            tcp_exception: Some("connection timed out after 1s".to_string()),
            ..Metric::new()
        };
        let decoded = Metric::from_wire(&metric.to_wire().unwrap()).unwrap();
        assert_eq!(decoded, metric);
    }
}
