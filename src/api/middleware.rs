use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Instant;
use tracing::warn;

use super::AppState;
use crate::telemetry::ApiRequestLog;

/// Client address as reported by the proxy in front of the service
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub(crate) const HEALTH_ROUTE: &str = "/api/monitoring/health";

/// Feed every routed request into the metrics store and the telemetry sink
pub async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let user_agent = header_string(request.headers(), header::USER_AGENT);
    let ip = client_ip(request.headers());

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status = response.status().as_u16();
    // Health polls stay out of the request and error-rate counters
    if endpoint != HEALTH_ROUTE {
        state
            .monitoring
            .record_request(&method, &endpoint, status, duration_ms)
            .await;
    }
    state.monitoring.sink().log_api_request(&ApiRequestLog {
        method,
        endpoint,
        status,
        duration_ms,
        user_agent,
        ip,
        user_id: None,
    });

    response
}

/// Require `Authorization: Bearer <token>` when an admin token is configured
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let token_present = provided.is_some();

    if provided == Some(expected) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let ip = client_ip(request.headers());
    warn!(path = %path, "Rejected admin request without valid token");

    let sink = state.monitoring.sink();
    sink.log_auth_event(
        "admin_token",
        false,
        json!({ "path": path, "ip": ip, "tokenPresent": token_present }),
    );
    sink.log_security_event(
        "unauthorized_admin_access",
        "medium",
        json!({ "path": path, "ip": ip }),
    );

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}
