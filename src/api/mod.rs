pub mod analytics_api;
pub mod middleware;
pub mod monitoring_api;

use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::analytics::AnalyticsAggregator;
use crate::error::TelemetryError;
use crate::monitoring::MonitoringService;

pub type ApiResult<T> = std::result::Result<T, TelemetryError>;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub monitoring: Arc<MonitoringService>,
    pub analytics: Arc<AnalyticsAggregator>,
    /// Bearer token for admin routes; admin routes are open when unset
    pub admin_token: Option<Arc<str>>,
    pub request_timeout: Duration,
}

/// Create the main API router
pub fn create_api_router(state: AppState) -> Router {
    let public = Router::new()
        .route(middleware::HEALTH_ROUTE, get(monitoring_api::health))
        .route("/api/analytics", post(analytics_api::ingest));

    let admin = Router::new()
        // Monitoring
        .route("/api/monitoring/metrics", get(monitoring_api::metrics))
        .route(
            "/api/monitoring/metrics/prometheus",
            get(monitoring_api::prometheus_metrics),
        )
        .route("/api/monitoring/alerts", get(monitoring_api::alerts))
        .route(
            "/api/monitoring/alerts/:id/acknowledge",
            post(monitoring_api::acknowledge_alert),
        )
        .route("/api/monitoring/errors", get(monitoring_api::errors))
        .route("/api/monitoring/performance", get(monitoring_api::performance))
        .route("/api/monitoring/dashboard", get(monitoring_api::dashboard))
        .route(
            "/api/monitoring/telemetry/status",
            get(monitoring_api::telemetry_status),
        )
        // Analytics
        .route("/api/analytics/dashboard", get(analytics_api::dashboard))
        .route("/api/analytics/events", get(analytics_api::events))
        .route("/api/analytics/performance", get(analytics_api::performance))
        .route("/api/analytics/errors", get(analytics_api::errors))
        .route(
            "/api/analytics/errors/:id/resolve",
            post(analytics_api::resolve_error),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin));

    Router::new()
        .merge(public)
        .merge(admin)
        .route_layer(from_fn_with_state(state.clone(), middleware::track_requests))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    state.request_timeout,
                )),
        )
        .with_state(state)
}
