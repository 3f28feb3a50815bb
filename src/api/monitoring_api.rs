use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::{ApiResult, AppState};
use crate::monitoring::{AlertOverview, ErrorsView, HealthReport, MonitoringDashboard};

const DEFAULT_ERROR_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub acknowledged_by: Option<String>,
    pub notes: Option<String>,
}

/// Load-balancer probe: 200 when healthy, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.monitoring.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let metrics = state.monitoring.metrics().await;
    let summary = state.monitoring.summary().await;
    Json(json!({
        "timestamp": Utc::now(),
        "metrics": metrics,
        "summary": summary,
    }))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match state.monitoring.prometheus().export() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to export Prometheus metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to export metrics" })),
            )
                .into_response()
        }
    }
}

pub async fn alerts(State(state): State<AppState>) -> Json<AlertOverview> {
    Json(state.monitoring.alerts_overview().await)
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<AcknowledgeRequest>>,
) -> ApiResult<Json<Value>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let alert = state
        .monitoring
        .acknowledge_alert(&id, request.acknowledged_by, request.notes)
        .await?;
    Ok(Json(json!({ "success": true, "alert": alert })))
}

pub async fn errors(
    State(state): State<AppState>,
    Query(query): Query<ErrorsQuery>,
) -> Json<ErrorsView> {
    let limit = query.limit.unwrap_or(DEFAULT_ERROR_LIMIT);
    Json(state.monitoring.errors_view(limit, query.since).await)
}

pub async fn performance(State(state): State<AppState>) -> Json<Value> {
    let performance = state.monitoring.performance_view().await;
    Json(json!({
        "timestamp": Utc::now(),
        "performance": performance,
    }))
}

pub async fn dashboard(State(state): State<AppState>) -> Json<MonitoringDashboard> {
    Json(state.monitoring.dashboard().await)
}

pub async fn telemetry_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "timestamp": Utc::now(),
        "telemetry": state.monitoring.sink().status(),
    }))
}
