use crate::error::{FieldError, Result, TelemetryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

/// Correlation fields every beacon batch must carry
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngestContext {
    #[validate(
        required(message = "sessionId is required"),
        length(min = 1, message = "sessionId must not be empty")
    )]
    #[serde(default)]
    pub session_id: Option<String>,

    #[validate(
        required(message = "userId is required"),
        length(min = 1, message = "userId must not be empty")
    )]
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMetric {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /api/analytics`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestBatch {
    #[serde(default)]
    pub events: Vec<ClientEvent>,
    #[serde(default)]
    pub metrics: Vec<ClientMetric>,
    #[serde(default)]
    pub errors: Vec<ClientError>,
    #[serde(default)]
    pub context: IngestContext,
}

impl IngestBatch {
    /// Parse a raw request body. Malformed JSON is a validation failure.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| TelemetryError::Validation(vec![FieldError::new("body", e.to_string())]))
    }

    /// Reject the batch unless the context carries both correlation ids
    pub fn validate_context(&self) -> Result<()> {
        self.context
            .validate()
            .map_err(|errors| TelemetryError::Validation(context_field_errors(&errors)))
    }
}

fn context_field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            let name = match field.as_ref() {
                "session_id" | "sessionId" => "context.sessionId".to_string(),
                "user_id" | "userId" => "context.userId".to_string(),
                other => format!("context.{other}"),
            };
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                FieldError::new(name.clone(), message)
            })
        })
        .collect();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub server_timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsMetric {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub server_timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalyticsMetric {
    /// Numeric field of the payload, if present and finite
    pub fn number(&self, field: &str) -> Option<f64> {
        number_at(&self.data, field)
    }
}

pub(crate) fn number_at(data: &Value, field: &str) -> Option<f64> {
    let value = data.get(field)?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsError {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub source: Option<String>,
    pub line: Option<u64>,
    pub stack: Option<String>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub server_timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    pub resolved: bool,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
    pub user_id: String,
    pub page_views: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedCounts {
    pub events: usize,
    pub metrics: usize,
    pub errors: usize,
}
