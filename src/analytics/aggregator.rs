use super::models::{
    number_at, AnalyticsError, AnalyticsEvent, AnalyticsMetric, IngestBatch, ProcessedCounts,
    Session,
};
use crate::config::AnalyticsConfig;
use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Running aggregates. Maintained on ingestion and never rewound by
/// ring-buffer eviction.
#[derive(Debug, Default)]
pub(crate) struct RunningTotals {
    pub page_views: u64,
    pub unique_users: HashSet<String>,
    pub average_load_time: f64,
    pub navigation_samples: u64,
    pub errors_ingested: u64,
    /// Page views plus API events; the error-rate denominator
    pub request_events: u64,
}

/// Retained analytics records. Events, metrics and errors are FIFO ring
/// buffers; sessions are capped by evicting the least recently active one.
#[derive(Debug)]
pub(crate) struct AnalyticsStore {
    pub config: AnalyticsConfig,
    pub events: VecDeque<AnalyticsEvent>,
    pub metrics: VecDeque<AnalyticsMetric>,
    pub errors: VecDeque<AnalyticsError>,
    pub sessions: HashMap<String, Session>,
    pub totals: RunningTotals,
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, cap: usize) {
    buffer.push_back(item);
    while buffer.len() > cap.max(1) {
        buffer.pop_front();
    }
}

impl AnalyticsStore {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            events: VecDeque::new(),
            metrics: VecDeque::new(),
            errors: VecDeque::new(),
            sessions: HashMap::new(),
            totals: RunningTotals::default(),
        }
    }

    /// Validate then fold one beacon batch. A rejected batch leaves every
    /// collection and aggregate untouched.
    pub fn ingest(
        &mut self,
        batch: IngestBatch,
        ip: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ProcessedCounts> {
        batch.validate_context()?;

        let IngestBatch {
            events,
            metrics,
            errors,
            context,
        } = batch;
        // Present and non-empty after validation
        let (Some(session_id), Some(user_id)) = (context.session_id, context.user_id) else {
            return Err(TelemetryError::Validation(Vec::new()));
        };

        let processed = ProcessedCounts {
            events: events.len(),
            metrics: metrics.len(),
            errors: errors.len(),
        };
        let mut batch_page_views = 0u64;

        for event in events {
            match event.kind.as_str() {
                "pageView" => {
                    batch_page_views += 1;
                    self.totals.page_views += 1;
                    self.totals.request_events += 1;
                    self.totals.unique_users.insert(user_id.clone());
                }
                "api" => self.totals.request_events += 1,
                _ => {}
            }

            push_bounded(
                &mut self.events,
                AnalyticsEvent {
                    id: Uuid::new_v4(),
                    kind: event.kind,
                    data: event.data,
                    server_timestamp: now,
                    session_id: session_id.clone(),
                    user_id: user_id.clone(),
                    user_agent: context.user_agent.clone(),
                    ip: ip.clone(),
                    extra: event.extra,
                },
                self.config.max_events,
            );
        }

        for metric in metrics {
            if metric.kind == "navigation" {
                let total_time = number_at(&metric.data, "totalTime").filter(|t| *t > 0.0);
                if let Some(total_time) = total_time {
                    let totals = &mut self.totals;
                    totals.navigation_samples += 1;
                    let n = totals.navigation_samples as f64;
                    totals.average_load_time =
                        (totals.average_load_time * (n - 1.0) + total_time) / n;
                }
            }

            push_bounded(
                &mut self.metrics,
                AnalyticsMetric {
                    id: Uuid::new_v4(),
                    kind: metric.kind,
                    data: metric.data,
                    server_timestamp: now,
                    session_id: session_id.clone(),
                    user_id: user_id.clone(),
                    extra: metric.extra,
                },
                self.config.max_metrics,
            );
        }

        for client_error in errors {
            if client_error.kind == "javascript" {
                error!(
                    url = client_error.source.as_deref().unwrap_or("unknown"),
                    line = client_error.line.unwrap_or(0),
                    user_agent = context.user_agent.as_deref().unwrap_or("unknown"),
                    session_id = %session_id,
                    "Client JavaScript Error: {}",
                    client_error.message
                );
            }
            self.totals.errors_ingested += 1;

            push_bounded(
                &mut self.errors,
                AnalyticsError {
                    id: Uuid::new_v4(),
                    kind: client_error.kind,
                    message: client_error.message,
                    source: client_error.source,
                    line: client_error.line,
                    stack: client_error.stack,
                    url: client_error.url.or_else(|| context.url.clone()),
                    user_agent: context.user_agent.clone(),
                    server_timestamp: now,
                    session_id: session_id.clone(),
                    user_id: user_id.clone(),
                    resolved: false,
                    resolved_at: None,
                    resolved_by: None,
                    resolution_notes: None,
                    extra: client_error.extra,
                },
                self.config.max_errors,
            );
        }

        self.upsert_session(&session_id, &user_id, batch_page_views, processed.errors as u64, now);

        debug!(
            session_id = %session_id,
            events = processed.events,
            metrics = processed.metrics,
            errors = processed.errors,
            "Analytics batch ingested"
        );
        Ok(processed)
    }

    fn upsert_session(
        &mut self,
        session_id: &str,
        user_id: &str,
        page_views: u64,
        errors: u64,
        now: DateTime<Utc>,
    ) {
        if !self.sessions.contains_key(session_id)
            && self.sessions.len() >= self.config.max_sessions.max(1)
        {
            self.evict_idle_session();
        }

        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                id: session_id.to_string(),
                start_time: now,
                last_activity: now,
                user_id: user_id.to_string(),
                page_views: 0,
                errors: 0,
            });
        session.last_activity = now;
        session.user_id = user_id.to_string();
        session.page_views += page_views;
        session.errors += errors;
    }

    fn evict_idle_session(&mut self) {
        let oldest = self
            .sessions
            .values()
            .min_by_key(|s| s.last_activity)
            .map(|s| s.id.clone());
        if let Some(id) = oldest {
            self.sessions.remove(&id);
            debug!(session_id = %id, "Evicted least recently active session");
        }
    }

    /// Mark a stored error resolved. Resolving twice keeps the first resolution.
    pub fn resolve(
        &mut self,
        id: &str,
        resolved_by: Option<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsError> {
        let error = Uuid::parse_str(id)
            .ok()
            .and_then(|uuid| self.errors.iter_mut().find(|e| e.id == uuid))
            .ok_or_else(|| TelemetryError::not_found("Error", id))?;

        if !error.resolved {
            error.resolved = true;
            error.resolved_at = Some(now);
            error.resolved_by = Some(resolved_by.unwrap_or_else(|| "system".to_string()));
            error.resolution_notes = notes;
            info!(error_id = %id, "Client error resolved");
        }
        Ok(error.clone())
    }
}

/// Client analytics ingestion and query front, safe to share across handlers
pub struct AnalyticsAggregator {
    pub(crate) store: RwLock<AnalyticsStore>,
}

impl AnalyticsAggregator {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            store: RwLock::new(AnalyticsStore::new(config)),
        }
    }

    pub async fn ingest(&self, batch: IngestBatch, ip: Option<String>) -> Result<ProcessedCounts> {
        self.store.write().await.ingest(batch, ip, Utc::now())
    }

    pub async fn resolve_error(
        &self,
        id: &str,
        resolved_by: Option<String>,
        notes: Option<String>,
    ) -> Result<AnalyticsError> {
        self.store
            .write()
            .await
            .resolve(id, resolved_by, notes, Utc::now())
    }

    pub async fn total_page_views(&self) -> u64 {
        self.store.read().await.totals.page_views
    }

    pub async fn unique_users(&self) -> usize {
        self.store.read().await.totals.unique_users.len()
    }

    pub async fn average_load_time(&self) -> f64 {
        self.store.read().await.totals.average_load_time
    }

    pub async fn session(&self, id: &str) -> Option<Session> {
        self.store.read().await.sessions.get(id).cloned()
    }
}
