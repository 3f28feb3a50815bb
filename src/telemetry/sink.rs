use super::backend::{HttpTelemetryBackend, TelemetryBackend};
use super::{into_metadata, Dimensions, LogEntry, LogLevel, MetricDatum, MetricUnit};
use crate::config::TelemetryConfig;
use crate::monitoring::Alert;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum Export {
    Logs(Vec<LogEntry>),
    Metrics(Vec<MetricDatum>),
}

#[derive(Debug, Default)]
struct SinkStats {
    exported: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

struct SinkInner {
    config: TelemetryConfig,
    queue: Option<mpsc::Sender<Export>>,
    stats: Arc<SinkStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SinkStatus {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub environment: String,
    pub log_group: String,
    pub status: String,
    pub exported: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Fields of a finished HTTP request as mirrored to the backend
#[derive(Debug, Clone, Default)]
pub struct ApiRequestLog {
    pub method: String,
    pub endpoint: String,
    pub status: u16,
    pub duration_ms: f64,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub user_id: Option<String>,
}

/// Fail-open adapter over a [`TelemetryBackend`].
///
/// Every method returns immediately. Entries go to a bounded queue drained by
/// a background exporter; a full queue drops the entry with a warning.
#[derive(Clone)]
pub struct TelemetrySink {
    inner: Arc<SinkInner>,
}

impl TelemetrySink {
    /// Local logging only; nothing is exported
    pub fn disabled(config: TelemetryConfig) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                config: TelemetryConfig {
                    enabled: false,
                    ..config
                },
                queue: None,
                stats: Arc::new(SinkStats::default()),
            }),
        }
    }

    /// Start the exporter task for `backend`. The task ends once every clone
    /// of the returned sink is dropped.
    pub fn spawn(
        config: TelemetryConfig,
        backend: Arc<dyn TelemetryBackend>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(SinkStats::default());
        let timeout = Duration::from_millis(config.export_timeout_ms);

        info!(
            backend = backend.name(),
            endpoint = ?config.endpoint,
            log_group = %config.log_group,
            "Telemetry sink initialized"
        );

        let handle = tokio::spawn(export_loop(rx, backend, timeout, stats.clone()));
        let sink = Self {
            inner: Arc::new(SinkInner {
                config,
                queue: Some(tx),
                stats,
            }),
        };
        (sink, handle)
    }

    /// Build from configuration: an HTTP exporter when enabled, otherwise a
    /// disabled sink. A broken backend configuration degrades to disabled.
    pub fn from_config(config: &TelemetryConfig) -> (Self, Option<JoinHandle<()>>) {
        if !config.enabled {
            return (Self::disabled(config.clone()), None);
        }
        match HttpTelemetryBackend::new(config) {
            Ok(backend) => {
                let (sink, handle) = Self::spawn(config.clone(), Arc::new(backend));
                (sink, Some(handle))
            }
            Err(e) => {
                warn!("Telemetry backend unavailable, using local logging only: {}", e);
                (Self::disabled(config.clone()), None)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.queue.is_some()
    }

    pub fn status(&self) -> SinkStatus {
        let config = &self.inner.config;
        let stats = &self.inner.stats;
        SinkStatus {
            enabled: self.is_enabled(),
            endpoint: config.endpoint.clone(),
            environment: config.environment.clone(),
            log_group: config.log_group.clone(),
            status: if self.is_enabled() { "healthy" } else { "disabled" }.to_string(),
            exported: stats.exported.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Log locally, then mirror the structured entry
    pub fn log_event(&self, level: LogLevel, message: &str, metadata: Value) {
        let metadata = into_metadata(metadata);
        let fields = Value::Object(metadata.clone());
        match level {
            LogLevel::Debug => debug!(metadata = %fields, "{}", message),
            LogLevel::Info => info!(metadata = %fields, "{}", message),
            LogLevel::Warn => warn!(metadata = %fields, "{}", message),
            LogLevel::Error => error!(metadata = %fields, "{}", message),
        }

        if !self.is_enabled() {
            return;
        }

        let config = &self.inner.config;
        self.enqueue(Export::Logs(vec![LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            environment: config.environment.clone(),
            service: config.service.clone(),
            metadata,
        }]));
    }

    pub fn send_metric(&self, name: &str, value: f64, unit: MetricUnit, dimensions: Dimensions) {
        self.send_metrics_batch(vec![MetricDatum {
            name: name.to_string(),
            value,
            unit,
            timestamp: Utc::now(),
            dimensions,
        }]);
    }

    /// Ship several metrics in one backend call
    pub fn send_metrics_batch(&self, metrics: Vec<MetricDatum>) {
        if metrics.is_empty() {
            return;
        }
        if !self.is_enabled() {
            debug!(count = metrics.len(), "Telemetry disabled, metrics not sent");
            return;
        }
        self.enqueue(Export::Metrics(metrics));
    }

    pub fn log_api_request(&self, request: &ApiRequestLog) {
        let level = if request.status >= 500 {
            LogLevel::Error
        } else if request.status >= 400 {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };

        self.log_event(
            level,
            "API Request",
            json!({
                "method": request.method,
                "endpoint": request.endpoint,
                "statusCode": request.status,
                "duration": request.duration_ms,
                "userAgent": request.user_agent,
                "ip": request.ip,
                "userId": request.user_id.as_deref().unwrap_or("anonymous"),
            }),
        );

        let mut metrics = vec![
            MetricDatum::count("APIRequest", 1.0)
                .with_dimension("method", &request.method)
                .with_dimension("endpoint", &request.endpoint)
                .with_dimension("statusCode", request.status),
            MetricDatum::new("ResponseTime", request.duration_ms, MetricUnit::Milliseconds)
                .with_dimension("endpoint", &request.endpoint),
        ];
        if request.status >= 400 {
            metrics.push(
                MetricDatum::count("APIError", 1.0)
                    .with_dimension("statusCode", request.status)
                    .with_dimension("endpoint", &request.endpoint),
            );
        }
        self.send_metrics_batch(metrics);
    }

    pub fn log_auth_event(&self, auth_type: &str, success: bool, metadata: Value) {
        let level = if success { LogLevel::Info } else { LogLevel::Warn };
        let mut fields = into_metadata(metadata);
        fields.insert("success".to_string(), json!(success));
        fields.insert("authType".to_string(), json!(auth_type));
        self.log_event(level, &format!("Authentication {auth_type}"), Value::Object(fields));

        self.send_metrics_batch(vec![MetricDatum::count("AuthEvent", 1.0)
            .with_dimension("type", auth_type)
            .with_dimension("success", success)]);
    }

    pub fn log_security_event(&self, event_type: &str, severity: &str, details: Value) {
        let level = if severity == "critical" {
            LogLevel::Error
        } else {
            LogLevel::Warn
        };
        let mut fields = into_metadata(details);
        fields.insert("eventType".to_string(), json!(event_type));
        fields.insert("severity".to_string(), json!(severity));
        self.log_event(level, &format!("Security Event: {event_type}"), Value::Object(fields));

        self.send_metrics_batch(vec![MetricDatum::count("SecurityEvent", 1.0)
            .with_dimension("eventType", event_type)
            .with_dimension("severity", severity)]);
    }

    pub fn log_business_metric(&self, event_type: &str, value: f64, metadata: Value) {
        let mut fields = into_metadata(metadata);
        fields.insert("eventType".to_string(), json!(event_type));
        fields.insert("value".to_string(), json!(value));
        self.log_event(
            LogLevel::Info,
            &format!("Business Metric: {event_type}"),
            Value::Object(fields),
        );

        self.send_metrics_batch(vec![
            MetricDatum::count("BusinessMetric", value).with_dimension("eventType", event_type)
        ]);
    }

    pub fn log_performance_metric(
        &self,
        operation: &str,
        duration_ms: f64,
        success: bool,
        metadata: Value,
    ) {
        let level = if success { LogLevel::Info } else { LogLevel::Warn };
        let mut fields = into_metadata(metadata);
        fields.insert("operation".to_string(), json!(operation));
        fields.insert("duration".to_string(), json!(duration_ms));
        fields.insert("success".to_string(), json!(success));
        self.log_event(level, &format!("Performance: {operation}"), Value::Object(fields));

        let mut metrics = vec![
            MetricDatum::new("OperationDuration", duration_ms, MetricUnit::Milliseconds)
                .with_dimension("operation", operation),
        ];
        if !success {
            metrics.push(
                MetricDatum::count("OperationFailure", 1.0).with_dimension("operation", operation),
            );
        }
        self.send_metrics_batch(metrics);
    }

    /// Mirror a freshly created alert
    pub fn log_alert(&self, alert: &Alert) {
        let level = match alert.severity {
            crate::monitoring::AlertSeverity::Critical | crate::monitoring::AlertSeverity::High => {
                LogLevel::Error
            }
            _ => LogLevel::Warn,
        };
        self.log_event(
            level,
            &format!("Alert: {}", alert.message),
            json!({
                "alertId": alert.id,
                "severity": alert.severity,
                "kind": alert.kind,
                "details": alert.details,
            }),
        );
        self.send_metrics_batch(vec![
            MetricDatum::count("Alert", 1.0).with_dimension("severity", alert.severity)
        ]);
    }

    pub fn log_alert_acknowledged(&self, alert: &Alert) {
        self.log_event(
            LogLevel::Info,
            "Alert Acknowledged",
            json!({
                "alertId": alert.id,
                "alertMessage": alert.message,
                "acknowledgedBy": alert.acknowledged_by,
                "notes": alert.notes,
            }),
        );
    }

    fn enqueue(&self, export: Export) {
        let Some(queue) = &self.inner.queue else {
            return;
        };
        if let Err(e) = queue.try_send(export) {
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Telemetry queue full, dropping entry")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("Telemetry exporter stopped, dropping entry")
                }
            }
        }
    }
}

async fn export_loop(
    mut rx: mpsc::Receiver<Export>,
    backend: Arc<dyn TelemetryBackend>,
    timeout: Duration,
    stats: Arc<SinkStats>,
) {
    while let Some(export) = rx.recv().await {
        let (kind, result) = match &export {
            Export::Logs(entries) => (
                "log",
                tokio::time::timeout(timeout, backend.put_log_events(entries)).await,
            ),
            Export::Metrics(metrics) => (
                "metrics",
                tokio::time::timeout(timeout, backend.put_metric_data(metrics)).await,
            ),
        };

        match result {
            Ok(Ok(())) => {
                stats.exported.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(kind, "Telemetry submission failed: {}", e);
            }
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(kind, "Telemetry submission timed out after {:?}", timeout);
            }
        }
    }
    debug!("Telemetry exporter stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{Result, TelemetryError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend that records everything it receives
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub logs: Mutex<Vec<LogEntry>>,
        pub metrics: Mutex<Vec<MetricDatum>>,
    }

    #[async_trait]
    impl TelemetryBackend for RecordingBackend {
        async fn put_log_events(&self, entries: &[LogEntry]) -> Result<()> {
            self.logs.lock().unwrap().extend_from_slice(entries);
            Ok(())
        }

        async fn put_metric_data(&self, metrics: &[MetricDatum]) -> Result<()> {
            self.metrics.lock().unwrap().extend_from_slice(metrics);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl TelemetryBackend for FailingBackend {
        async fn put_log_events(&self, _entries: &[LogEntry]) -> Result<()> {
            Err(TelemetryError::TelemetryExport("rejected".into()))
        }

        async fn put_metric_data(&self, _metrics: &[MetricDatum]) -> Result<()> {
            Err(TelemetryError::TelemetryExport("rejected".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn enabled_config() -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            endpoint: Some("http://collector".to_string()),
            environment: "test".to_string(),
            ..TelemetryConfig::default()
        }
    }

    /// Drop the sink and wait for the exporter to drain its queue
    async fn drain(sink: TelemetrySink, handle: JoinHandle<()>) {
        drop(sink);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_api_request_mirrors_log_and_metrics() {
        let backend = Arc::new(RecordingBackend::default());
        let (sink, handle) = TelemetrySink::spawn(enabled_config(), backend.clone());

        sink.log_api_request(&ApiRequestLog {
            method: "GET".into(),
            endpoint: "/api/events".into(),
            status: 503,
            duration_ms: 42.0,
            ..ApiRequestLog::default()
        });
        drain(sink, handle).await;

        let logs = backend.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(logs[0].environment, "test");
        assert_eq!(logs[0].metadata["userId"], "anonymous");

        let names: Vec<_> = backend
            .metrics
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.name.clone())
            .collect();
        assert_eq!(names, vec!["APIRequest", "ResponseTime", "APIError"]);
    }

    #[tokio::test]
    async fn test_performance_failure_adds_metric() {
        let backend = Arc::new(RecordingBackend::default());
        let (sink, handle) = TelemetrySink::spawn(enabled_config(), backend.clone());
        sink.log_performance_metric("render", 12.5, false, json!({}));
        sink.log_auth_event("login", true, json!({ "ip": "10.0.0.1" }));
        drain(sink, handle).await;

        let metrics = backend.metrics.lock().unwrap();
        assert!(metrics.iter().any(|m| m.name == "OperationFailure"));
        let auth = metrics.iter().find(|m| m.name == "AuthEvent").unwrap();
        assert_eq!(auth.dimensions["success"], "true");
    }

    #[tokio::test]
    async fn test_backend_failures_are_swallowed() {
        let (sink, handle) = TelemetrySink::spawn(enabled_config(), Arc::new(FailingBackend));
        sink.log_event(LogLevel::Info, "hello", json!({}));
        sink.send_metric("X", 1.0, MetricUnit::Count, Dimensions::new());
        let probe = sink.clone();
        assert_eq!(probe.status().status, "healthy");
        drop(probe);
        drain(sink, handle).await;
    }

    #[tokio::test]
    async fn test_failures_counted() {
        let (sink, handle) = TelemetrySink::spawn(enabled_config(), Arc::new(FailingBackend));
        let stats = sink.inner.stats.clone();
        sink.log_security_event("csrf", "critical", json!({}));
        drain(sink, handle).await;
        // log + metric batch
        assert_eq!(stats.failed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.exported.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let config = TelemetryConfig {
            queue_capacity: 1,
            ..enabled_config()
        };
        let (tx, _rx) = mpsc::channel(config.queue_capacity);
        let sink = TelemetrySink {
            inner: Arc::new(SinkInner {
                config,
                queue: Some(tx),
                stats: Arc::new(SinkStats::default()),
            }),
        };
        for _ in 0..5 {
            sink.send_metric("Burst", 1.0, MetricUnit::Count, Dimensions::new());
        }
        assert_eq!(sink.status().dropped, 4);
    }

    #[test]
    fn test_disabled_sink_status() {
        let sink = TelemetrySink::disabled(TelemetryConfig::default());
        sink.log_business_metric("registration", 1.0, json!({}));
        let status = sink.status();
        assert!(!status.enabled);
        assert_eq!(status.status, "disabled");
        assert_eq!(status.dropped, 0);
    }

    #[test]
    fn test_from_config_disabled_without_runtime() {
        let (sink, handle) = TelemetrySink::from_config(&TelemetryConfig::default());
        assert!(!sink.is_enabled());
        assert!(handle.is_none());
    }
}
