use super::alerts::{Alert, AlertEngine, AlertOverview, ProbeOutcome, ThresholdInputs};
use super::health::{probe_with_timeout, DatabaseProbe, HealthEvaluator, HealthInputs, HealthReport};
use super::metrics::{EndpointStats, ErrorRecord, MetricsStore, PrometheusMirror, RequestCounters};
use super::percentile::PercentileSummary;
use super::system::{ProcessMemory, SystemSampler, SystemSnapshot};
use super::{format_uptime, ConnectionStatus};
use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::telemetry::{MetricDatum, MetricUnit, SinkStatus, TelemetrySink};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Last observed state of the event store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    pub connection_status: ConnectionStatus,
    pub query_count: u64,
    pub error_count: u64,
    pub last_latency_ms: Option<u64>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Everything request-driven and timer-driven code mutates, behind one lock
#[derive(Debug)]
struct MonitorState {
    metrics: MetricsStore,
    snapshot: SystemSnapshot,
    engine: AlertEngine,
    database: DatabaseStatus,
}

impl MonitorState {
    fn threshold_inputs(&self) -> ThresholdInputs {
        let requests = self.metrics.requests();
        ThresholdInputs {
            total_requests: requests.total,
            error_requests: requests.error,
            p95_response_ms: self.metrics.performance().p95,
            memory_fraction: self.snapshot.memory.percentage,
            cpu_fraction: self.snapshot.cpu,
        }
    }
}

/// Raw aggregates as held in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorMetrics {
    pub requests: RequestCounters,
    pub by_endpoint: BTreeMap<String, EndpointStats>,
    pub by_status: BTreeMap<u16, u64>,
    pub performance: PercentileSummary,
    pub system: SystemSnapshot,
    pub database: DatabaseStatus,
    pub error_count: usize,
    pub alert_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub total: u64,
    pub success_rate: String,
    pub error_rate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySummary {
    pub average: String,
    pub p95: String,
    pub p99: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSummary {
    pub cpu: String,
    pub memory: String,
    pub uptime: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlertCounts {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
}

/// Human-readable roll-up for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub requests: RequestSummary,
    pub performance: LatencySummary,
    pub system: SystemSummary,
    pub alerts: AlertCounts,
    pub health: HealthReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceView {
    pub requests: RequestBreakdown,
    pub response: ResponseBreakdown,
    pub system: SystemDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBreakdown {
    pub total: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub by_endpoint: BTreeMap<String, EndpointStats>,
    pub by_status: BTreeMap<u16, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBreakdown {
    pub average: f64,
    pub p95: f64,
    pub p99: f64,
    /// Most recent response times, oldest first
    pub distribution: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemDetail {
    pub cpu: f64,
    pub memory: MemoryDetail,
    pub uptime: u64,
    pub process_memory: ProcessMemory,
}

/// Memory in whole megabytes, percentage in [0, 100]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryDetail {
    pub percentage: f64,
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub recent_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorsView {
    pub errors: Vec<ErrorRecord>,
    pub summary: ErrorSummary,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringDashboard {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub uptime: String,
    pub overview: DashboardOverview,
    pub services: DashboardServices,
    pub checks: BTreeMap<String, bool>,
    pub recent_alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardOverview {
    pub requests: RequestSummary,
    pub performance: LatencySummary,
    pub system: SystemSummary,
    pub alerts: AlertCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardServices {
    pub telemetry: SinkStatus,
    pub monitoring: Value,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Owns the monitor state and its timers.
///
/// Request-driven calls and the sampler/publisher timers serialize on a
/// single mutex. Timers are started together by [`MonitoringService::start`]
/// and stopped together by [`MonitoringService::stop`].
pub struct MonitoringService {
    config: MonitoringConfig,
    state: Mutex<MonitorState>,
    sampler: Mutex<SystemSampler>,
    probe: Arc<dyn DatabaseProbe>,
    probe_timeout: Duration,
    evaluator: HealthEvaluator,
    prometheus: Arc<PrometheusMirror>,
    sink: TelemetrySink,
    started: Instant,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitoringService {
    pub fn new(
        config: MonitoringConfig,
        probe: Arc<dyn DatabaseProbe>,
        probe_timeout: Duration,
        sink: TelemetrySink,
    ) -> anyhow::Result<Self> {
        let prometheus = Arc::new(PrometheusMirror::new()?);
        let metrics = MetricsStore::new(&config).with_prometheus(prometheus.clone());
        let engine = AlertEngine::new(
            config.thresholds.clone(),
            config.alert_cooldown(),
            config.alert_history_cap,
        );
        let (shutdown, _) = watch::channel(false);

        info!(
            probe = probe.name(),
            sample_interval = config.sample_interval_seconds,
            publish_interval = config.publish_interval_seconds,
            "Monitoring service initialized"
        );

        Ok(Self {
            evaluator: HealthEvaluator::new(config.thresholds.clone()),
            state: Mutex::new(MonitorState {
                metrics,
                snapshot: SystemSnapshot::default(),
                engine,
                database: DatabaseStatus::default(),
            }),
            sampler: Mutex::new(SystemSampler::new()),
            probe,
            probe_timeout,
            prometheus,
            sink,
            started: Instant::now(),
            running: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn sink(&self) -> &TelemetrySink {
        &self.sink
    }

    pub fn prometheus(&self) -> &Arc<PrometheusMirror> {
        &self.prometheus
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.state.lock().await.engine.subscribe()
    }

    /// Record one finished request and re-check thresholds
    pub async fn record_request(
        &self,
        method: &str,
        endpoint: &str,
        status: u16,
        duration_ms: f64,
    ) -> Vec<Alert> {
        let alerts = {
            let mut state = self.state.lock().await;
            state.metrics.record_request(method, endpoint, status, duration_ms);
            let inputs = state.threshold_inputs();
            state.engine.evaluate(&inputs, Utc::now())
        };
        self.count_alerts(&alerts);
        alerts
    }

    /// Record an application error and re-check the error frequency
    pub async fn record_error(
        &self,
        error_type: &str,
        message: &str,
        stack: Option<String>,
        context: Value,
    ) -> (ErrorRecord, Option<Alert>) {
        let now = Utc::now();
        let (record, alert) = {
            let mut state = self.state.lock().await;
            let record = state.metrics.record_error(error_type, message, stack, context, now);
            let window = self.config.thresholds.error_window();
            let recent = state.metrics.recent_error_count(window, now);
            let alert = state.engine.evaluate_error_frequency(recent, now);
            (record, alert)
        };
        if let Some(alert) = &alert {
            self.count_alerts(std::slice::from_ref(alert));
        }
        (record, alert)
    }

    /// Take a fresh system snapshot and run the threshold sweep
    pub async fn sample_now(&self) -> Vec<Alert> {
        let snapshot = self.sampler.lock().await.sample();
        self.prometheus.cpu_usage_ratio.set(snapshot.cpu);
        self.prometheus.memory_usage_ratio.set(snapshot.memory.percentage);

        let alerts = {
            let mut state = self.state.lock().await;
            state.snapshot = snapshot;
            let now = Utc::now();
            state.engine.prune_throttle(now);
            let inputs = state.threshold_inputs();
            state.engine.evaluate(&inputs, now)
        };
        self.count_alerts(&alerts);
        alerts
    }

    /// Ping the event store, record the outcome and raise database alerts
    pub async fn database_sweep(&self) -> ProbeOutcome {
        let outcome = probe_with_timeout(self.probe.as_ref(), self.probe_timeout).await;
        let alert = {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            let db = &mut state.database;
            db.last_checked = Some(now);
            match &outcome {
                ProbeOutcome::Reachable { latency_ms } => {
                    db.connection_status = ConnectionStatus::Healthy;
                    db.query_count += 1;
                    db.last_latency_ms = Some(*latency_ms);
                }
                ProbeOutcome::Unreachable { .. } => {
                    db.connection_status = ConnectionStatus::Unhealthy;
                    db.error_count += 1;
                    db.last_latency_ms = None;
                }
            }
            state.engine.evaluate_database(&outcome, now)
        };
        if let Some(alert) = &alert {
            self.count_alerts(std::slice::from_ref(alert));
        }
        match &outcome {
            ProbeOutcome::Reachable { latency_ms } => {
                self.sink
                    .log_performance_metric("database_probe", *latency_ms as f64, true, Value::Null)
            }
            ProbeOutcome::Unreachable { error } => self.sink.log_performance_metric(
                "database_probe",
                self.probe_timeout.as_secs_f64() * 1000.0,
                false,
                serde_json::json!({ "error": error }),
            ),
        }
        outcome
    }

    /// On-demand health verdict. Pings the database under its own timeout;
    /// everything else comes from cached state. Raises no alerts.
    pub async fn health(&self) -> HealthReport {
        let outcome = probe_with_timeout(self.probe.as_ref(), self.probe_timeout).await;
        let reachable = matches!(outcome, ProbeOutcome::Reachable { .. });
        let state = self.state.lock().await;
        self.evaluate_health(&state, reachable)
    }

    fn evaluate_health(&self, state: &MonitorState, database_reachable: bool) -> HealthReport {
        let now = Utc::now();
        let inputs = HealthInputs {
            database_reachable,
            error_rate: state.metrics.error_rate(),
            p95_response_ms: state.metrics.performance().p95,
            memory_fraction: state.snapshot.memory.percentage,
            recent_errors: state
                .metrics
                .recent_error_count(self.config.thresholds.error_window(), now),
            uptime_ms: self.uptime_ms(),
        };
        self.evaluator.evaluate(&inputs, now)
    }

    /// Health from cached state only; the database check uses the last sweep
    fn cached_health(&self, state: &MonitorState) -> HealthReport {
        let reachable = state.database.connection_status == ConnectionStatus::Healthy;
        self.evaluate_health(state, reachable)
    }

    pub async fn metrics(&self) -> MonitorMetrics {
        let state = self.state.lock().await;
        MonitorMetrics {
            requests: state.metrics.requests(),
            by_endpoint: state.metrics.endpoints().clone(),
            by_status: state.metrics.status_counts().clone(),
            performance: state.metrics.performance(),
            system: state.snapshot.clone(),
            database: state.database.clone(),
            error_count: state.metrics.errors().count(),
            alert_count: state.engine.history().count(),
        }
    }

    pub async fn summary(&self) -> MetricsSummary {
        let state = self.state.lock().await;
        let health = self.cached_health(&state);
        self.summarize(&state, health)
    }

    fn summarize(&self, state: &MonitorState, health: HealthReport) -> MetricsSummary {
        let requests = state.metrics.requests();
        let error_pct = round2(state.metrics.error_rate() * 100.0);
        let performance = state.metrics.performance();
        let counts = state.engine.severity_counts();

        MetricsSummary {
            requests: RequestSummary {
                total: requests.total,
                success_rate: format!("{:.2}%", 100.0 - error_pct),
                error_rate: format!("{error_pct:.2}%"),
            },
            performance: LatencySummary {
                average: format!("{}ms", performance.average.round()),
                p95: format!("{}ms", performance.p95.round()),
                p99: format!("{}ms", performance.p99.round()),
            },
            system: SystemSummary {
                cpu: format!("{:.2}%", state.snapshot.cpu * 100.0),
                memory: format!("{:.2}%", state.snapshot.memory.percentage * 100.0),
                uptime: format_uptime(self.uptime_ms()),
            },
            alerts: AlertCounts {
                total: counts.total,
                critical: counts.critical,
                high: counts.high,
            },
            health,
        }
    }

    pub async fn performance_view(&self) -> PerformanceView {
        let state = self.state.lock().await;
        let requests = state.metrics.requests();
        let pct = |part: u64| {
            if requests.total == 0 {
                0.0
            } else {
                round2(part as f64 / requests.total as f64 * 100.0)
            }
        };
        let performance = state.metrics.performance();
        let snapshot = &state.snapshot;

        PerformanceView {
            requests: RequestBreakdown {
                total: requests.total,
                success_rate: pct(requests.success),
                error_rate: pct(requests.error),
                by_endpoint: state.metrics.endpoints().clone(),
                by_status: state.metrics.status_counts().clone(),
            },
            response: ResponseBreakdown {
                average: performance.average.round(),
                p95: performance.p95.round(),
                p99: performance.p99.round(),
                distribution: state.metrics.recent_response_times(100),
            },
            system: SystemDetail {
                cpu: round2(snapshot.cpu * 100.0),
                memory: MemoryDetail {
                    percentage: round2(snapshot.memory.percentage * 100.0),
                    used: (snapshot.memory.used as f64 / BYTES_PER_MB).round() as u64,
                    total: (snapshot.memory.total as f64 / BYTES_PER_MB).round() as u64,
                },
                uptime: self.uptime_ms(),
                process_memory: snapshot.process_memory,
            },
        }
    }

    /// Most recent errors (oldest first), optionally only those after `since`
    pub async fn errors_view(&self, limit: usize, since: Option<DateTime<Utc>>) -> ErrorsView {
        let now = Utc::now();
        let state = self.state.lock().await;
        let filtered: Vec<&ErrorRecord> = state
            .metrics
            .errors()
            .filter(|e| since.map_or(true, |s| e.timestamp > s))
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        let errors: Vec<ErrorRecord> = filtered.into_iter().skip(skip).cloned().collect();

        let hour_ago = now - ChronoDuration::hours(1);
        let mut by_type = BTreeMap::new();
        for error in &errors {
            *by_type.entry(error.error_type.clone()).or_insert(0) += 1;
        }
        let summary = ErrorSummary {
            total: errors.len(),
            by_type,
            recent_count: errors.iter().filter(|e| e.timestamp > hour_ago).count(),
        };

        ErrorsView {
            errors,
            summary,
            timestamp: now,
        }
    }

    pub async fn alerts_overview(&self) -> AlertOverview {
        self.state.lock().await.engine.overview(Utc::now())
    }

    /// Acknowledge an alert and mirror the acknowledgement on first success
    pub async fn acknowledge_alert(
        &self,
        id: &str,
        acknowledged_by: Option<String>,
        notes: Option<String>,
    ) -> Result<Alert> {
        let (alert, changed) = self
            .state
            .lock()
            .await
            .engine
            .acknowledge(id, acknowledged_by, notes, Utc::now())?;
        if changed {
            self.sink.log_alert_acknowledged(&alert);
        }
        Ok(alert)
    }

    pub async fn dashboard(&self) -> MonitoringDashboard {
        let state = self.state.lock().await;
        let health = self.cached_health(&state);
        let summary = self.summarize(&state, health);
        let recent_alerts = state.engine.latest(5);
        drop(state);

        MonitoringDashboard {
            timestamp: Utc::now(),
            status: if summary.health.healthy { "healthy" } else { "unhealthy" }.to_string(),
            uptime: summary.system.uptime.clone(),
            checks: summary.health.checks.clone(),
            overview: DashboardOverview {
                requests: summary.requests,
                performance: summary.performance,
                system: summary.system,
                alerts: summary.alerts,
            },
            services: DashboardServices {
                telemetry: self.sink.status(),
                monitoring: serde_json::json!({
                    "status": if self.is_running() { "healthy" } else { "stopped" },
                    "metricsCollected": true,
                }),
            },
            recent_alerts,
        }
    }

    /// Ship the periodic gauge batch through the sink
    pub async fn publish_metrics(&self) {
        let batch = {
            let state = self.state.lock().await;
            let requests = state.metrics.requests();
            vec![
                MetricDatum::count("RequestCount", requests.total as f64),
                MetricDatum::new(
                    "ErrorRate",
                    state.metrics.error_rate() * 100.0,
                    MetricUnit::Percent,
                ),
                MetricDatum::new(
                    "ResponseTimeP95",
                    state.metrics.performance().p95,
                    MetricUnit::Milliseconds,
                ),
                MetricDatum::new("CpuUtilization", state.snapshot.cpu * 100.0, MetricUnit::Percent),
                MetricDatum::new(
                    "MemoryUtilization",
                    state.snapshot.memory.percentage * 100.0,
                    MetricUnit::Percent,
                ),
            ]
        };
        debug!(count = batch.len(), "Publishing metrics batch");
        self.sink.send_metrics_batch(batch);
    }

    fn count_alerts(&self, alerts: &[Alert]) {
        for alert in alerts {
            self.prometheus
                .alerts_total
                .with_label_values(&[alert.severity.as_str()])
                .inc();
        }
    }

    /// Start the sampler and publish timers. Both fire once immediately.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Monitoring service is already running");
            return;
        }
        self.shutdown.send_replace(false);

        info!(
            "Starting monitoring timers: sample every {}s, publish every {}s",
            self.config.sample_interval_seconds, self.config.publish_interval_seconds
        );

        let sampler = {
            let service = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(service.config.sample_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            service.sample_now().await;
                            service.database_sweep().await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("Sampler timer stopped");
            })
        };

        let publisher = {
            let service = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(service.config.publish_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => service.publish_metrics().await,
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("Publish timer stopped");
            })
        };

        self.tasks.lock().await.extend([sampler, publisher]);
    }

    /// Cancel both timers and wait for them to finish
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("Monitoring timer ended abnormally: {}", e);
            }
        }
        info!("Monitoring timers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::monitoring::health::StaticProbe;
    use crate::monitoring::{AlertKind, AlertSeverity};
    use crate::error::TelemetryError;
    use serde_json::json;

    fn service_with(config: MonitoringConfig, probe: StaticProbe) -> Arc<MonitoringService> {
        Arc::new(
            MonitoringService::new(
                config,
                Arc::new(probe),
                Duration::from_millis(200),
                TelemetrySink::disabled(TelemetryConfig::default()),
            )
            .unwrap(),
        )
    }

    fn service() -> Arc<MonitoringService> {
        service_with(MonitoringConfig::default(), StaticProbe::reachable())
    }

    #[tokio::test]
    async fn test_record_request_updates_summary() {
        let service = service();
        service.record_request("GET", "/api/events", 200, 100.0).await;
        service.record_request("GET", "/api/events", 500, 300.0).await;

        let summary = service.summary().await;
        assert_eq!(summary.requests.total, 2);
        assert_eq!(summary.requests.error_rate, "50.00%");
        assert_eq!(summary.requests.success_rate, "50.00%");
        assert_eq!(summary.performance.p99, "300ms");
    }

    #[tokio::test]
    async fn test_error_rate_alert_after_warmup() {
        let mut config = MonitoringConfig::default();
        config.thresholds.warmup_requests = 3;
        let service = service_with(config, StaticProbe::reachable());

        for _ in 0..3 {
            assert!(service.record_request("GET", "/", 500, 1.0).await.is_empty());
        }
        let alerts = service.record_request("GET", "/", 500, 1.0).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HighErrorRate);

        let exported = service.prometheus().export().unwrap();
        assert!(exported.contains("alerts_total{severity=\"high\"} 1"));
    }

    #[tokio::test]
    async fn test_error_frequency_alert() {
        let service = service();
        for i in 0..10 {
            let (_, alert) = service
                .record_error("TypeError", &format!("boom {i}"), None, json!({}))
                .await;
            assert!(alert.is_none());
        }
        let (_, alert) = service
            .record_error("TypeError", "boom 10", None, json!({}))
            .await;
        assert_eq!(alert.unwrap().kind, AlertKind::ErrorFrequency);
    }

    #[tokio::test]
    async fn test_database_sweep_failure() {
        let service =
            service_with(MonitoringConfig::default(), StaticProbe::unreachable("refused"));
        let outcome = service.database_sweep().await;
        assert!(matches!(outcome, ProbeOutcome::Unreachable { .. }));

        let metrics = service.metrics().await;
        assert_eq!(metrics.database.connection_status, ConnectionStatus::Unhealthy);
        assert_eq!(metrics.database.error_count, 1);

        let overview = service.alerts_overview().await;
        assert_eq!(overview.summary.critical, 1);
        assert_eq!(overview.active[0].kind, AlertKind::DatabaseFailure);
    }

    #[tokio::test]
    async fn test_health_probe_has_no_side_effects() {
        let service = service_with(MonitoringConfig::default(), StaticProbe::unreachable("down"));
        let report = service.health().await;
        assert!(!report.healthy);
        assert_eq!(report.checks["database"], false);
        assert_eq!(service.alerts_overview().await.summary.total, 0);
        assert_eq!(service.metrics().await.database.error_count, 0);
    }

    #[tokio::test]
    async fn test_health_reachable() {
        let service = service();
        let report = service.health().await;
        assert!(report.checks["database"]);
        assert!(report.checks["errorRate"]);
        assert!(report.checks["recentErrors"]);
    }

    #[tokio::test]
    async fn test_acknowledge_alert() {
        let service = service_with(MonitoringConfig::default(), StaticProbe::unreachable("down"));
        service.database_sweep().await;
        let id = service.alerts_overview().await.recent[0].id.clone();

        let alert = service
            .acknowledge_alert(&id, Some("ops".into()), None)
            .await
            .unwrap();
        assert!(alert.acknowledged);
        assert_eq!(alert.severity, AlertSeverity::Critical);

        let missing = service.acknowledge_alert("alert-0-missing", None, None).await;
        assert!(matches!(missing, Err(TelemetryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_errors_view_limit_and_types() {
        let service = service();
        service.record_error("TypeError", "a", None, json!({})).await;
        service.record_error("RangeError", "b", None, json!({})).await;
        service.record_error("TypeError", "c", None, json!({})).await;

        let view = service.errors_view(2, None).await;
        let messages: Vec<_> = view.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["b", "c"]);
        assert_eq!(view.summary.by_type["TypeError"], 1);
        assert_eq!(view.summary.recent_count, 2);

        let future = Utc::now() + ChronoDuration::minutes(1);
        assert!(service.errors_view(50, Some(future)).await.errors.is_empty());
    }

    #[tokio::test]
    async fn test_performance_view_without_traffic() {
        let view = service().performance_view().await;
        assert_eq!(view.requests.total, 0);
        assert_eq!(view.requests.error_rate, 0.0);
        assert!(view.response.distribution.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_timers() {
        let mut config = MonitoringConfig::default();
        config.sample_interval_seconds = 1;
        config.publish_interval_seconds = 1;
        let service = service_with(config, StaticProbe::reachable());

        service.start().await;
        assert!(service.is_running());
        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.stop().await;
        assert!(!service.is_running());
        assert!(service.tasks.lock().await.is_empty());

        let metrics = service.metrics().await;
        assert_eq!(metrics.database.connection_status, ConnectionStatus::Healthy);

        let dashboard = service.dashboard().await;
        assert_eq!(dashboard.services.monitoring["status"], "stopped");
    }
}
