use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::middleware::client_ip;
use super::{ApiResult, AppState};
use crate::analytics::{AnalyticsDashboard, ErrorAnalytics, EventPage, EventQuery, IngestBatch};

#[derive(Debug, Default, Deserialize)]
pub struct ErrorListQuery {
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub acknowledged_by: Option<String>,
    pub notes: Option<String>,
}

/// Beacon endpoint. The body is parsed by hand so malformed JSON maps to
/// the same 400 shape as a failed field check.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let batch = IngestBatch::from_slice(&body)?;
    let session_id = batch.context.session_id.clone();
    let processed = state.analytics.ingest(batch, client_ip(&headers)).await?;

    state.monitoring.sink().log_business_metric(
        "analytics_batch",
        (processed.events + processed.metrics + processed.errors) as f64,
        json!({ "sessionId": session_id }),
    );

    Ok(Json(json!({ "success": true, "processed": processed })))
}

pub async fn dashboard(State(state): State<AppState>) -> Json<AnalyticsDashboard> {
    Json(state.analytics.dashboard().await)
}

pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Json<EventPage> {
    Json(state.analytics.events(query).await)
}

pub async fn performance(State(state): State<AppState>) -> Json<Value> {
    match state.analytics.performance().await {
        Some(report) => Json(json!(report)),
        None => Json(json!({ "message": "No performance data available" })),
    }
}

pub async fn errors(
    State(state): State<AppState>,
    Query(query): Query<ErrorListQuery>,
) -> Json<ErrorAnalytics> {
    Json(state.analytics.error_analytics(query.resolved).await)
}

pub async fn resolve_error(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ResolveRequest>>,
) -> ApiResult<Json<Value>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let error = state
        .analytics
        .resolve_error(&id, request.acknowledged_by, request.notes)
        .await?;
    Ok(Json(json!({ "success": true, "error": error })))
}
