use super::percentile::{self, PercentileSummary};
use crate::config::MonitoringConfig;
use chrono::{DateTime, Duration, Utc};
use prometheus::{
    exponential_buckets, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec,
    Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestCounters {
    pub total: u64,
    pub success: u64,
    pub error: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub avg_duration: f64,
    #[serde(skip)]
    durations: VecDeque<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub stack: Option<String>,
    pub context: Value,
}

/// In-memory request, latency and error aggregates.
///
/// Response-time samples, per-endpoint durations and the error log are FIFO
/// ring buffers; their lengths never exceed the configured caps.
#[derive(Debug)]
pub struct MetricsStore {
    requests: RequestCounters,
    by_endpoint: BTreeMap<String, EndpointStats>,
    by_status: BTreeMap<u16, u64>,
    response_times: VecDeque<f64>,
    response_cap: usize,
    endpoint_cap: usize,
    performance: PercentileSummary,
    errors: VecDeque<ErrorRecord>,
    error_cap: usize,
    prometheus: Option<Arc<PrometheusMirror>>,
}

impl MetricsStore {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self::with_caps(
            config.response_sample_cap,
            config.endpoint_sample_cap,
            config.error_history_cap,
        )
    }

    pub fn with_caps(response_cap: usize, endpoint_cap: usize, error_cap: usize) -> Self {
        Self {
            requests: RequestCounters::default(),
            by_endpoint: BTreeMap::new(),
            by_status: BTreeMap::new(),
            response_times: VecDeque::with_capacity(response_cap.max(1)),
            response_cap: response_cap.max(1),
            endpoint_cap: endpoint_cap.max(1),
            performance: PercentileSummary::default(),
            errors: VecDeque::new(),
            error_cap: error_cap.max(1),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, mirror: Arc<PrometheusMirror>) -> Self {
        self.prometheus = Some(mirror);
        self
    }

    /// Fold one finished request into the aggregates.
    ///
    /// Never fails: a blank method or endpoint is labelled, a negative or
    /// non-finite duration is recorded as 0.
    pub fn record_request(&mut self, method: &str, endpoint: &str, status: u16, duration_ms: f64) {
        let duration_ms = if duration_ms.is_finite() && duration_ms > 0.0 {
            duration_ms
        } else {
            0.0
        };
        let succeeded = (200..400).contains(&status);
        let failed = status >= 400;

        self.requests.total += 1;
        if succeeded {
            self.requests.success += 1;
        } else if failed {
            self.requests.error += 1;
        }

        let method = if method.trim().is_empty() { "UNKNOWN" } else { method.trim() };
        let endpoint = if endpoint.trim().is_empty() { "/" } else { endpoint.trim() };
        let key = format!("{} {}", method.to_ascii_uppercase(), endpoint);

        let endpoint_cap = self.endpoint_cap;
        let stats = self.by_endpoint.entry(key).or_default();
        stats.total += 1;
        if failed {
            stats.error += 1;
        } else {
            stats.success += 1;
        }
        stats.durations.push_back(duration_ms);
        while stats.durations.len() > endpoint_cap {
            stats.durations.pop_front();
        }
        stats.avg_duration = percentile::average(stats.durations.make_contiguous());

        *self.by_status.entry(status).or_insert(0) += 1;

        self.response_times.push_back(duration_ms);
        while self.response_times.len() > self.response_cap {
            self.response_times.pop_front();
        }
        self.performance = percentile::summarize(self.response_times.iter());

        if let Some(prom) = &self.prometheus {
            prom.observe_request(duration_ms, failed);
            prom.set_latency(&self.performance);
            prom.error_rate_ratio.set(self.error_rate());
        }
    }

    /// Append to the bounded error log. A blank message or type is labelled.
    pub fn record_error(
        &mut self,
        error_type: &str,
        message: &str,
        stack: Option<String>,
        context: Value,
        now: DateTime<Utc>,
    ) -> ErrorRecord {
        let record = ErrorRecord {
            timestamp: now,
            message: if message.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                message.to_string()
            },
            error_type: if error_type.trim().is_empty() {
                "Error".to_string()
            } else {
                error_type.to_string()
            },
            stack,
            context,
        };

        self.errors.push_back(record.clone());
        while self.errors.len() > self.error_cap {
            self.errors.pop_front();
        }

        if let Some(prom) = &self.prometheus {
            prom.errors_recorded_total.inc();
        }

        error!(
            error_type = %record.error_type,
            context = %record.context,
            "Monitored error: {}",
            record.message
        );
        record
    }

    pub fn requests(&self) -> RequestCounters {
        self.requests
    }

    /// Fraction of requests with status >= 400; 0 before any traffic
    pub fn error_rate(&self) -> f64 {
        if self.requests.total == 0 {
            return 0.0;
        }
        self.requests.error as f64 / self.requests.total as f64
    }

    pub fn performance(&self) -> PercentileSummary {
        self.performance
    }

    pub fn endpoints(&self) -> &BTreeMap<String, EndpointStats> {
        &self.by_endpoint
    }

    pub fn status_counts(&self) -> &BTreeMap<u16, u64> {
        &self.by_status
    }

    pub fn response_times(&self) -> impl Iterator<Item = &f64> {
        self.response_times.iter()
    }

    pub fn response_sample_len(&self) -> usize {
        self.response_times.len()
    }

    /// The `n` most recent response times, oldest first
    pub fn recent_response_times(&self, n: usize) -> Vec<f64> {
        let skip = self.response_times.len().saturating_sub(n);
        self.response_times.iter().skip(skip).copied().collect()
    }

    pub fn errors(&self) -> impl DoubleEndedIterator<Item = &ErrorRecord> {
        self.errors.iter()
    }

    pub fn recent_error_count(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        self.errors.iter().filter(|e| e.timestamp > cutoff).count()
    }

    pub fn prometheus(&self) -> Option<&Arc<PrometheusMirror>> {
        self.prometheus.as_ref()
    }
}

/// Prometheus view of the monitoring aggregates, rendered in text format
pub struct PrometheusMirror {
    registry: Registry,
    pub requests_total: IntCounter,
    pub request_errors_total: IntCounter,
    pub request_duration_seconds: Histogram,
    pub errors_recorded_total: IntCounter,
    pub alerts_total: IntCounterVec,
    pub response_time_p95_seconds: Gauge,
    pub response_time_p99_seconds: Gauge,
    pub error_rate_ratio: Gauge,
    pub cpu_usage_ratio: Gauge,
    pub memory_usage_ratio: Gauge,
}

impl std::fmt::Debug for PrometheusMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMirror").finish_non_exhaustive()
    }
}

impl PrometheusMirror {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "http_requests_total",
            "Total number of HTTP requests observed",
        ))?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_errors_total = IntCounter::with_opts(Opts::new(
            "http_request_errors_total",
            "Total number of HTTP requests with status >= 400",
        ))?;
        registry.register(Box::new(request_errors_total.clone()))?;

        let request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(exponential_buckets(0.001, 2.0, 15)?),
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let errors_recorded_total = IntCounter::with_opts(Opts::new(
            "application_errors_total",
            "Total number of recorded application errors",
        ))?;
        registry.register(Box::new(errors_recorded_total.clone()))?;

        let alerts_total = IntCounterVec::new(
            Opts::new("alerts_total", "Alerts emitted by severity"),
            &["severity"],
        )?;
        registry.register(Box::new(alerts_total.clone()))?;

        let response_time_p95_seconds = Gauge::with_opts(Opts::new(
            "response_time_p95_seconds",
            "95th percentile response time in seconds",
        ))?;
        registry.register(Box::new(response_time_p95_seconds.clone()))?;

        let response_time_p99_seconds = Gauge::with_opts(Opts::new(
            "response_time_p99_seconds",
            "99th percentile response time in seconds",
        ))?;
        registry.register(Box::new(response_time_p99_seconds.clone()))?;

        let error_rate_ratio = Gauge::with_opts(Opts::new(
            "error_rate_ratio",
            "Fraction of requests that failed (0-1)",
        ))?;
        registry.register(Box::new(error_rate_ratio.clone()))?;

        let cpu_usage_ratio = Gauge::with_opts(Opts::new(
            "cpu_usage_ratio",
            "Host CPU utilization (0-1)",
        ))?;
        registry.register(Box::new(cpu_usage_ratio.clone()))?;

        let memory_usage_ratio = Gauge::with_opts(Opts::new(
            "memory_usage_ratio",
            "Host memory utilization (0-1)",
        ))?;
        registry.register(Box::new(memory_usage_ratio.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        info!("Initialized Prometheus metrics mirror");

        Ok(Self {
            registry,
            requests_total,
            request_errors_total,
            request_duration_seconds,
            errors_recorded_total,
            alerts_total,
            response_time_p95_seconds,
            response_time_p99_seconds,
            error_rate_ratio,
            cpu_usage_ratio,
            memory_usage_ratio,
        })
    }

    fn observe_request(&self, duration_ms: f64, failed: bool) {
        self.requests_total.inc();
        if failed {
            self.request_errors_total.inc();
        }
        self.request_duration_seconds.observe(duration_ms / 1000.0);
    }

    fn set_latency(&self, summary: &PercentileSummary) {
        self.response_time_p95_seconds.set(summary.p95 / 1000.0);
        self.response_time_p99_seconds.set(summary.p99 / 1000.0);
    }

    /// Render all registered metrics in the Prometheus text format
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
