use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// A single rejected field in an ingestion batch or request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Validation failed: {} field error(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    #[error("Telemetry export failed: {0}")]
    TelemetryExport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

impl TelemetryError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            TelemetryError::Validation(_) => StatusCode::BAD_REQUEST,
            TelemetryError::NotFound { .. } => StatusCode::NOT_FOUND,
            TelemetryError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            TelemetryError::TelemetryExport(_)
            | TelemetryError::Configuration(_)
            | TelemetryError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        TelemetryError::TelemetryExport(err.to_string())
    }
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            TelemetryError::Validation(fields) => json!({ "errors": fields }),
            TelemetryError::NotFound { kind, .. } => {
                json!({ "error": format!("{kind} not found") })
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                json!({ "error": other.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}
