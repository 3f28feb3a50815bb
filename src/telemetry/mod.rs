//! Best-effort mirroring of structured logs and numeric metrics to an
//! external telemetry backend.
//!
//! Callers never wait on the backend: entries are queued onto a background
//! exporter, every export runs under a timeout, and failures are logged
//! locally and counted, never returned.

pub mod backend;
pub mod forwarder;
pub mod sink;

pub use backend::{HttpTelemetryBackend, TelemetryBackend};
pub use forwarder::spawn_alert_forwarder;
pub use sink::{ApiRequestLog, SinkStatus, TelemetrySink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One structured log line as shipped to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub environment: String,
    pub service: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MetricUnit {
    #[default]
    Count,
    Milliseconds,
    Percent,
    Bytes,
    None,
}

pub type Dimensions = BTreeMap<String, String>;

/// A named numeric sample with its dimension tags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricDatum {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub timestamp: DateTime<Utc>,
    pub dimensions: Dimensions,
}

impl MetricDatum {
    pub fn count(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, MetricUnit::Count)
    }

    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            timestamp: Utc::now(),
            dimensions: Dimensions::new(),
        }
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.dimensions.insert(key.into(), value.to_string());
        self
    }
}

/// Flatten a JSON value into log metadata; non-objects land under `data`
pub(crate) fn into_metadata(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_entry_flattens_metadata() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Warn,
            message: "API Request".to_string(),
            environment: "test".to_string(),
            service: "svc".to_string(),
            metadata: into_metadata(json!({ "statusCode": 404 })),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["level"], "WARN");
        assert_eq!(value["statusCode"], 404);
    }

    #[test]
    fn test_metric_dimensions() {
        let datum = MetricDatum::count("APIRequest", 1.0)
            .with_dimension("method", "GET")
            .with_dimension("statusCode", 200);
        assert_eq!(datum.dimensions["statusCode"], "200");
        assert_eq!(datum.unit, MetricUnit::Count);
    }

    #[test]
    fn test_non_object_metadata() {
        assert!(into_metadata(Value::Null).is_empty());
        assert_eq!(into_metadata(json!(5))["data"], 5);
    }
}
