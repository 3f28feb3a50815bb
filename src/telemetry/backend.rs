use super::{LogEntry, MetricDatum};
use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Destination for mirrored logs and metrics
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    async fn put_log_events(&self, entries: &[LogEntry]) -> Result<()>;

    async fn put_metric_data(&self, metrics: &[MetricDatum]) -> Result<()>;

    fn name(&self) -> &str;
}

/// JSON-over-HTTP collector client
pub struct HttpTelemetryBackend {
    client: Client,
    endpoint: String,
    log_group: String,
    namespace: String,
    environment: String,
}

impl HttpTelemetryBackend {
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| TelemetryError::Configuration("telemetry endpoint not set".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.export_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            log_group: config.log_group.clone(),
            namespace: config.namespace.clone(),
            environment: config.environment.clone(),
        })
    }

    fn log_stream(&self) -> String {
        format!(
            "{}-{}",
            self.environment,
            chrono::Utc::now().format("%Y-%m-%d")
        )
    }
}

#[async_trait]
impl TelemetryBackend for HttpTelemetryBackend {
    async fn put_log_events(&self, entries: &[LogEntry]) -> Result<()> {
        let body = json!({
            "logGroupName": self.log_group,
            "logStreamName": self.log_stream(),
            "logEvents": entries,
        });

        self.client
            .post(format!("{}/v1/logs", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        debug!(count = entries.len(), "Log events sent to telemetry backend");
        Ok(())
    }

    async fn put_metric_data(&self, metrics: &[MetricDatum]) -> Result<()> {
        let body = json!({
            "namespace": self.namespace,
            "metricData": metrics,
        });

        self.client
            .post(format!("{}/v1/metrics", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        debug!(count = metrics.len(), "Metrics sent to telemetry backend");
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
