use super::throttle::AlertThrottle;
use super::AlertSeverity;
use crate::config::AlertThresholds;
use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Which threshold produced an alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighErrorRate,
    SlowResponse,
    HighMemory,
    HighCpu,
    ErrorFrequency,
    DatabaseFailure,
    SlowDatabase,
}

impl AlertKind {
    /// Static severity mapping per threshold type
    pub fn severity(&self) -> AlertSeverity {
        match self {
            AlertKind::DatabaseFailure => AlertSeverity::Critical,
            AlertKind::HighErrorRate | AlertKind::HighMemory | AlertKind::ErrorFrequency => {
                AlertSeverity::High
            }
            AlertKind::SlowResponse | AlertKind::HighCpu | AlertKind::SlowDatabase => {
                AlertSeverity::Medium
            }
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AlertKind::HighErrorRate => "High error rate detected",
            AlertKind::SlowResponse => "Slow response times",
            AlertKind::HighMemory => "High memory usage",
            AlertKind::HighCpu => "High CPU usage",
            AlertKind::ErrorFrequency => "High error frequency",
            AlertKind::DatabaseFailure => "Database connection failed",
            AlertKind::SlowDatabase => "Slow database query",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub details: Value,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub notes: Option<String>,
}

impl Alert {
    fn new(kind: AlertKind, details: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_alert_id(now),
            timestamp: now,
            severity: kind.severity(),
            kind,
            message: kind.message().to_string(),
            details,
            acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
            notes: None,
        }
    }

    /// Throttle key: severity plus message
    pub fn throttle_key(severity: AlertSeverity, message: &str) -> String {
        format!("{severity}-{message}")
    }
}

/// `alert-<epoch millis>-<9 random chars>`
fn generate_alert_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("alert-{}-{}", now.timestamp_millis(), suffix)
}

/// Live values the threshold table is evaluated against
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdInputs {
    pub total_requests: u64,
    pub error_requests: u64,
    pub p95_response_ms: f64,
    pub memory_fraction: f64,
    pub cpu_fraction: f64,
}

/// Result of one database reachability ping
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Reachable { latency_ms: u64 },
    Unreachable { error: String },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCounts {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertOverview {
    pub active: Vec<Alert>,
    pub recent: Vec<Alert>,
    pub summary: SeverityCounts,
}

/// Evaluates the threshold table, throttles duplicates and keeps a bounded
/// alert history. Every created alert is published to subscribers.
#[derive(Debug)]
pub struct AlertEngine {
    thresholds: AlertThresholds,
    throttle: AlertThrottle,
    history: VecDeque<Alert>,
    history_cap: usize,
    notifier: broadcast::Sender<Alert>,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds, cooldown: Duration, history_cap: usize) -> Self {
        let (notifier, _) = broadcast::channel(256);
        Self {
            thresholds,
            throttle: AlertThrottle::new(cooldown),
            history: VecDeque::new(),
            history_cap: history_cap.max(1),
            notifier,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.notifier.subscribe()
    }

    /// Check error rate, p95 latency, memory and CPU. Each breach is
    /// evaluated independently, so one call may create several alerts.
    pub fn evaluate(&mut self, inputs: &ThresholdInputs, now: DateTime<Utc>) -> Vec<Alert> {
        let t = self.thresholds.clone();
        let mut raised = Vec::new();

        // Error rate only arms after the warm-up volume; zero traffic never alerts
        if inputs.total_requests > t.warmup_requests && inputs.total_requests > 0 {
            let error_rate = inputs.error_requests as f64 / inputs.total_requests as f64;
            if error_rate > t.error_rate {
                raised.extend(self.raise(
                    AlertKind::HighErrorRate,
                    json!({
                        "errorRate": format!("{:.2}%", error_rate * 100.0),
                        "threshold": format!("{}%", t.error_rate * 100.0),
                    }),
                    now,
                ));
            }
        }

        if inputs.p95_response_ms > t.response_time_ms {
            raised.extend(self.raise(
                AlertKind::SlowResponse,
                json!({
                    "p95": format!("{}ms", inputs.p95_response_ms.round()),
                    "threshold": format!("{}ms", t.response_time_ms),
                }),
                now,
            ));
        }

        if inputs.memory_fraction > t.memory_usage {
            raised.extend(self.raise(
                AlertKind::HighMemory,
                json!({
                    "usage": format!("{:.2}%", inputs.memory_fraction * 100.0),
                    "threshold": format!("{}%", t.memory_usage * 100.0),
                }),
                now,
            ));
        }

        if inputs.cpu_fraction > t.cpu_usage {
            raised.extend(self.raise(
                AlertKind::HighCpu,
                json!({
                    "usage": format!("{:.2}%", inputs.cpu_fraction * 100.0),
                    "threshold": format!("{}%", t.cpu_usage * 100.0),
                }),
                now,
            ));
        }

        raised
    }

    /// Alert when more than the tolerated number of errors landed in the window
    pub fn evaluate_error_frequency(
        &mut self,
        recent_errors: usize,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        if recent_errors <= self.thresholds.error_frequency {
            return None;
        }
        let window = format!("{} minutes", self.thresholds.error_window_seconds / 60);
        self.raise(
            AlertKind::ErrorFrequency,
            json!({ "errorCount": recent_errors, "timeWindow": window }),
            now,
        )
    }

    pub fn evaluate_database(
        &mut self,
        outcome: &ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        match outcome {
            ProbeOutcome::Unreachable { error } => {
                self.raise(AlertKind::DatabaseFailure, json!({ "error": error }), now)
            }
            ProbeOutcome::Reachable { latency_ms }
                if *latency_ms > self.thresholds.slow_query_ms =>
            {
                self.raise(
                    AlertKind::SlowDatabase,
                    json!({ "duration": latency_ms, "threshold": self.thresholds.slow_query_ms }),
                    now,
                )
            }
            ProbeOutcome::Reachable { .. } => None,
        }
    }

    /// Create an alert unless the same severity+message fired within the cooldown
    pub fn raise(&mut self, kind: AlertKind, details: Value, now: DateTime<Utc>) -> Option<Alert> {
        let key = Alert::throttle_key(kind.severity(), kind.message());
        if !self.throttle.should_emit_at(&key, now) {
            return None;
        }

        let alert = Alert::new(kind, details, now);
        self.history.push_back(alert.clone());
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }

        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::High => {
                error!(
                    alert_id = %alert.id,
                    details = %alert.details,
                    "ALERT [{}]: {}",
                    alert.severity,
                    alert.message
                )
            }
            AlertSeverity::Medium | AlertSeverity::Low => {
                warn!(
                    alert_id = %alert.id,
                    details = %alert.details,
                    "ALERT [{}]: {}",
                    alert.severity,
                    alert.message
                )
            }
        }

        // No subscribers is fine
        let _ = self.notifier.send(alert.clone());
        Some(alert)
    }

    /// Mark an alert acknowledged. The first acknowledgement wins; repeating
    /// it returns the alert unchanged.
    pub fn acknowledge(
        &mut self,
        id: &str,
        acknowledged_by: Option<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(Alert, bool)> {
        let alert = self
            .history
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| TelemetryError::not_found("Alert", id))?;

        if alert.acknowledged {
            return Ok((alert.clone(), false));
        }

        alert.acknowledged = true;
        alert.acknowledged_at = Some(now);
        alert.acknowledged_by = Some(acknowledged_by.unwrap_or_else(|| "unknown".to_string()));
        alert.notes = notes;
        info!(alert_id = %id, "Alert acknowledged");
        Ok((alert.clone(), true))
    }

    pub fn history(&self) -> impl DoubleEndedIterator<Item = &Alert> {
        self.history.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.history.iter().find(|a| a.id == id)
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts {
            total: self.history.len(),
            ..SeverityCounts::default()
        };
        for alert in &self.history {
            match alert.severity {
                AlertSeverity::Critical => counts.critical += 1,
                AlertSeverity::High => counts.high += 1,
                AlertSeverity::Medium => counts.medium += 1,
                AlertSeverity::Low => counts.low += 1,
            }
        }
        counts
    }

    /// Alerts from the last hour, the 20 most recent, and per-severity counts
    pub fn overview(&self, now: DateTime<Utc>) -> AlertOverview {
        let hour_ago = now - Duration::hours(1);
        let skip = self.history.len().saturating_sub(20);
        AlertOverview {
            active: self
                .history
                .iter()
                .filter(|a| a.timestamp > hour_ago)
                .cloned()
                .collect(),
            recent: self.history.iter().skip(skip).cloned().collect(),
            summary: self.severity_counts(),
        }
    }

    /// The `n` most recent alerts, oldest first
    pub fn latest(&self, n: usize) -> Vec<Alert> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn prune_throttle(&mut self, now: DateTime<Utc>) {
        self.throttle.prune(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AlertEngine {
        AlertEngine::new(AlertThresholds::default(), Duration::minutes(5), 50)
    }

    fn failing_traffic(total: u64) -> ThresholdInputs {
        ThresholdInputs {
            total_requests: total,
            error_requests: total / 2,
            ..ThresholdInputs::default()
        }
    }

    #[test]
    fn test_error_rate_needs_warmup() {
        let mut engine = engine();
        let now = Utc::now();
        assert!(engine.evaluate(&failing_traffic(100), now).is_empty());
        let raised = engine.evaluate(&failing_traffic(101), now);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, AlertKind::HighErrorRate);
        assert_eq!(raised[0].severity, AlertSeverity::High);
    }

    #[test]
    fn test_zero_traffic_never_alerts() {
        let mut thresholds = AlertThresholds::default();
        thresholds.warmup_requests = 0;
        let mut engine = AlertEngine::new(thresholds, Duration::minutes(5), 50);
        assert!(engine
            .evaluate(&ThresholdInputs::default(), Utc::now())
            .is_empty());
    }

    #[test]
    fn test_independent_breaches() {
        let mut engine = engine();
        let inputs = ThresholdInputs {
            total_requests: 10,
            error_requests: 0,
            p95_response_ms: 2500.0,
            memory_fraction: 0.95,
            cpu_fraction: 0.9,
        };
        let raised = engine.evaluate(&inputs, Utc::now());
        let kinds: Vec<_> = raised.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![AlertKind::SlowResponse, AlertKind::HighMemory, AlertKind::HighCpu]
        );
    }

    #[test]
    fn test_cooldown_suppresses_duplicates() {
        let mut engine = engine();
        let t0 = Utc::now();
        let slow = ThresholdInputs {
            p95_response_ms: 5000.0,
            ..ThresholdInputs::default()
        };

        assert_eq!(engine.evaluate(&slow, t0).len(), 1);
        assert!(engine.evaluate(&slow, t0 + Duration::minutes(2)).is_empty());
        assert_eq!(engine.evaluate(&slow, t0 + Duration::minutes(6)).len(), 1);
        assert_eq!(engine.history().count(), 2);
    }

    #[test]
    fn test_database_outcomes() {
        let mut engine = engine();
        let now = Utc::now();
        let failed = engine
            .evaluate_database(
                &ProbeOutcome::Unreachable {
                    error: "connection refused".into(),
                },
                now,
            )
            .unwrap();
        assert_eq!(failed.severity, AlertSeverity::Critical);

        let slow = engine
            .evaluate_database(&ProbeOutcome::Reachable { latency_ms: 1500 }, now)
            .unwrap();
        assert_eq!(slow.kind, AlertKind::SlowDatabase);
        assert_eq!(slow.severity, AlertSeverity::Medium);

        assert!(engine
            .evaluate_database(&ProbeOutcome::Reachable { latency_ms: 3 }, now)
            .is_none());
    }

    #[test]
    fn test_error_frequency() {
        let mut engine = engine();
        let now = Utc::now();
        assert!(engine.evaluate_error_frequency(10, now).is_none());
        let alert = engine.evaluate_error_frequency(11, now).unwrap();
        assert_eq!(alert.details["errorCount"], 11);
        assert_eq!(alert.details["timeWindow"], "5 minutes");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut engine = AlertEngine::new(AlertThresholds::default(), Duration::zero(), 3);
        let t0 = Utc::now();
        for i in 0..5 {
            engine.raise(AlertKind::HighCpu, json!({ "i": i }), t0 + Duration::seconds(i));
        }
        let kept: Vec<_> = engine.history().map(|a| a.details["i"].clone()).collect();
        assert_eq!(kept, vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_acknowledge_once() {
        let mut engine = engine();
        let now = Utc::now();
        let alert = engine.raise(AlertKind::HighCpu, json!({}), now).unwrap();

        let (acked, changed) = engine
            .acknowledge(&alert.id, Some("ops".into()), Some("scaling up".into()), now)
            .unwrap();
        assert!(changed);
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("ops"));

        let (again, changed) = engine
            .acknowledge(&alert.id, Some("someone-else".into()), None, now)
            .unwrap();
        assert!(!changed);
        assert_eq!(again.acknowledged_by.as_deref(), Some("ops"));
        assert_eq!(again.notes.as_deref(), Some("scaling up"));

        assert!(matches!(
            engine.acknowledge("alert-missing", None, None, now),
            Err(TelemetryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_alert_id_shape() {
        let now = Utc::now();
        let id = generate_alert_id(now);
        let parts: Vec<_> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "alert");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
    }

    #[tokio::test]
    async fn test_subscribers_receive_alerts() {
        let mut engine = engine();
        let mut rx = engine.subscribe();
        engine.raise(AlertKind::DatabaseFailure, json!({}), Utc::now());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, AlertKind::DatabaseFailure);
    }

    #[test]
    fn test_overview_counts() {
        let mut engine = engine();
        let now = Utc::now();
        engine.raise(AlertKind::DatabaseFailure, json!({}), now - Duration::hours(2));
        engine.raise(AlertKind::HighCpu, json!({}), now);
        let overview = engine.overview(now);
        assert_eq!(overview.active.len(), 1);
        assert_eq!(overview.recent.len(), 2);
        assert_eq!(overview.summary.critical, 1);
        assert_eq!(overview.summary.medium, 1);
        assert_eq!(overview.summary.total, 2);
    }
}
