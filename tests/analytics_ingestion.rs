//! Ingestion and query behaviour of the analytics aggregator

use approx::assert_relative_eq;
use lightningtalk_telemetry::analytics::{AnalyticsAggregator, EventQuery, IngestBatch};
use lightningtalk_telemetry::config::AnalyticsConfig;
use lightningtalk_telemetry::TelemetryError;
use serde_json::{json, Value};

fn batch(value: Value) -> IngestBatch {
    IngestBatch::from_slice(value.to_string().as_bytes()).expect("valid json")
}

fn context(session: &str, user: &str) -> Value {
    json!({ "sessionId": session, "userId": user, "userAgent": "integration-test" })
}

#[tokio::test]
async fn batch_without_user_id_is_rejected_whole() {
    let aggregator = AnalyticsAggregator::new(AnalyticsConfig::default());

    let result = aggregator
        .ingest(
            batch(json!({
                "events": [{ "type": "pageView", "data": { "url": "/" } }],
                "metrics": [{ "type": "navigation", "data": { "totalTime": 1200 } }],
                "errors": [{ "type": "javascript", "message": "boom" }],
                "context": { "sessionId": "s-1" }
            })),
            None,
        )
        .await;

    match result {
        Err(TelemetryError::Validation(fields)) => {
            assert!(fields.iter().any(|f| f.field == "context.userId"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(aggregator.total_page_views().await, 0);
    assert_eq!(aggregator.unique_users().await, 0);
    assert_eq!(aggregator.events(EventQuery::default()).await.total, 0);
    assert_eq!(aggregator.error_analytics(false).await.total_errors, 0);
}

#[tokio::test]
async fn page_view_counts_once_and_tracks_user() {
    let aggregator = AnalyticsAggregator::new(AnalyticsConfig::default());

    let processed = aggregator
        .ingest(
            batch(json!({
                "events": [{ "type": "pageView", "data": { "url": "/talks" } }],
                "context": context("s-1", "u-1")
            })),
            Some("198.51.100.4".to_string()),
        )
        .await
        .expect("ingest");

    assert_eq!(processed.events, 1);
    assert_eq!(aggregator.total_page_views().await, 1);
    assert_eq!(aggregator.unique_users().await, 1);

    let session = aggregator.session("s-1").await.expect("session");
    assert_eq!(session.page_views, 1);
}

#[tokio::test]
async fn navigation_metrics_average_load_time() {
    let aggregator = AnalyticsAggregator::new(AnalyticsConfig::default());

    for total in [2000, 3000] {
        aggregator
            .ingest(
                batch(json!({
                    "metrics": [{ "type": "navigation", "data": { "totalTime": total } }],
                    "context": context("s-1", "u-1")
                })),
                None,
            )
            .await
            .expect("ingest");
    }

    assert_relative_eq!(aggregator.average_load_time().await, 2500.0);
}

#[tokio::test]
async fn errors_group_by_type_and_message() {
    let aggregator = AnalyticsAggregator::new(AnalyticsConfig::default());

    aggregator
        .ingest(
            batch(json!({
                "errors": [
                    { "type": "javascript", "message": "x is undefined" },
                    { "type": "promise", "message": "fetch failed" },
                    { "type": "javascript", "message": "x is undefined" }
                ],
                "context": context("s-1", "u-1")
            })),
            None,
        )
        .await
        .expect("ingest");

    let analytics = aggregator.error_analytics(false).await;
    assert_eq!(analytics.total_errors, 3);
    assert_eq!(analytics.error_groups.len(), 2);
    assert_eq!(analytics.error_groups[0].count, 2);
    assert_eq!(analytics.error_groups[0].message, "x is undefined");
    assert_eq!(analytics.error_groups[1].count, 1);
}

#[tokio::test]
async fn resolve_unknown_error_is_not_found() {
    let aggregator = AnalyticsAggregator::new(AnalyticsConfig::default());

    let missing = aggregator
        .resolve_error("3f2b8c1e-0000-4000-8000-000000000000", None, None)
        .await;
    assert!(matches!(missing, Err(TelemetryError::NotFound { .. })));

    let garbage = aggregator.resolve_error("not-a-uuid", None, None).await;
    assert!(matches!(garbage, Err(TelemetryError::NotFound { .. })));
}

#[tokio::test]
async fn resolved_errors_move_to_resolved_view() {
    let aggregator = AnalyticsAggregator::new(AnalyticsConfig::default());
    aggregator
        .ingest(
            batch(json!({
                "errors": [{ "type": "javascript", "message": "boom" }],
                "context": context("s-1", "u-1")
            })),
            None,
        )
        .await
        .expect("ingest");

    let open = aggregator.error_analytics(false).await;
    let id = open.error_groups[0].examples[0].id.to_string();

    let resolved = aggregator
        .resolve_error(&id, Some("ops@lightningtalk".into()), Some("fixed in 1.2".into()))
        .await
        .expect("resolve");
    assert!(resolved.resolved);
    assert!(resolved.resolved_at.is_some());

    assert_eq!(aggregator.error_analytics(false).await.total_errors, 0);
    assert_eq!(aggregator.error_analytics(true).await.total_errors, 1);
}
