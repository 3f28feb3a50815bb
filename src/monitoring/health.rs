use super::alerts::ProbeOutcome;
use crate::config::AlertThresholds;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Reachability check against the event store
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> std::result::Result<(), String>;

    fn name(&self) -> &str;
}

/// Run a probe under a hard timeout and time it
pub async fn probe_with_timeout(probe: &dyn DatabaseProbe, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    match tokio::time::timeout(timeout, probe.ping()).await {
        Ok(Ok(())) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            debug!(probe = probe.name(), latency_ms, "Database probe succeeded");
            ProbeOutcome::Reachable { latency_ms }
        }
        Ok(Err(error)) => {
            warn!(probe = probe.name(), "Database probe failed: {}", error);
            ProbeOutcome::Unreachable { error }
        }
        Err(_) => {
            warn!(probe = probe.name(), "Database probe timed out after {:?}", timeout);
            ProbeOutcome::Unreachable {
                error: format!("probe timed out after {}ms", timeout.as_millis()),
            }
        }
    }
}

/// `SELECT 1` against a lazily connected PostgreSQL pool
pub struct PostgresProbe {
    pool: PgPool,
}

impl PostgresProbe {
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabaseProbe for PostgresProbe {
    async fn ping(&self) -> std::result::Result<(), String> {
        sqlx::query("SELECT 1 as health_check")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| format!("Database connection failed: {e}"))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// Probe used when no event store is configured, or in tests
pub struct StaticProbe {
    result: std::result::Result<(), String>,
}

impl StaticProbe {
    pub fn reachable() -> Self {
        Self { result: Ok(()) }
    }

    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            result: Err(error.into()),
        }
    }
}

#[async_trait]
impl DatabaseProbe for StaticProbe {
    async fn ping(&self) -> std::result::Result<(), String> {
        self.result.clone()
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub checks: BTreeMap<String, bool>,
}

impl HealthReport {
    /// `healthy` is the conjunction of every check
    pub fn from_checks(
        checks: BTreeMap<String, bool>,
        uptime: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            healthy: checks.values().all(|ok| *ok),
            timestamp,
            uptime,
            checks,
        }
    }
}

/// Values the health checks read; assembled from cached state only
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthInputs {
    pub database_reachable: bool,
    pub error_rate: f64,
    pub p95_response_ms: f64,
    pub memory_fraction: f64,
    pub recent_errors: usize,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HealthEvaluator {
    thresholds: AlertThresholds,
}

impl HealthEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, inputs: &HealthInputs, now: DateTime<Utc>) -> HealthReport {
        let t = &self.thresholds;
        let mut checks = BTreeMap::new();
        checks.insert("database".to_string(), inputs.database_reachable);
        checks.insert("errorRate".to_string(), inputs.error_rate < t.error_rate);
        checks.insert(
            "responseTime".to_string(),
            inputs.p95_response_ms < t.response_time_ms,
        );
        checks.insert("memory".to_string(), inputs.memory_fraction < t.memory_usage);
        checks.insert(
            "recentErrors".to_string(),
            inputs.recent_errors < t.error_frequency,
        );
        HealthReport::from_checks(checks, inputs.uptime_ms, now)
    }
}
