use super::TelemetrySink;
use crate::monitoring::Alert;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Mirror every alert published by the engine to the telemetry sink.
/// Ends when the engine's sender is dropped.
pub fn spawn_alert_forwarder(
    mut alerts: broadcast::Receiver<Alert>,
    sink: TelemetrySink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(alert) => sink.log_alert(&alert),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Alert forwarder lagged, some alerts were not mirrored");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Alert forwarder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertThresholds, TelemetryConfig};
    use crate::monitoring::{AlertEngine, AlertKind};
    use crate::telemetry::sink::tests::RecordingBackend;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_alerts_are_mirrored() {
        let backend = Arc::new(RecordingBackend::default());
        let config = TelemetryConfig {
            enabled: true,
            endpoint: Some("http://collector".into()),
            ..TelemetryConfig::default()
        };
        let (sink, exporter) = TelemetrySink::spawn(config, backend.clone());

        let mut engine = AlertEngine::new(AlertThresholds::default(), Duration::minutes(5), 50);
        let forwarder = spawn_alert_forwarder(engine.subscribe(), sink.clone());

        engine.raise(AlertKind::DatabaseFailure, json!({ "error": "refused" }), Utc::now());
        engine.raise(AlertKind::HighCpu, json!({}), Utc::now());
        drop(engine);

        forwarder.await.unwrap();
        drop(sink);
        exporter.await.unwrap();

        let logs = backend.logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "Alert: Database connection failed");

        let metrics = backend.metrics.lock().unwrap();
        let severities: Vec<_> = metrics
            .iter()
            .filter(|m| m.name == "Alert")
            .map(|m| m.dimensions["severity"].clone())
            .collect();
        assert_eq!(severities, vec!["critical", "medium"]);
    }
}
