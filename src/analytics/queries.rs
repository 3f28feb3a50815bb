use super::aggregator::{AnalyticsAggregator, AnalyticsStore};
use super::models::{number_at, AnalyticsError, AnalyticsEvent, AnalyticsMetric};
use crate::monitoring::percentile::{average, percentile, sorted_copy};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

const DEFAULT_EVENT_LIMIT: usize = 100;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub total_page_views: u64,
    pub unique_users: usize,
    pub active_sessions: usize,
    pub average_load_time: f64,
    /// Errors per hundred page views and API events
    pub error_rate: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageCount {
    pub url: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    pub active_users: usize,
    pub page_views_last_hour: usize,
    pub errors_last_hour: usize,
    pub top_pages: Vec<PageCount>,
}

/// Averages of the navigation timing breakdown, whole milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTimings {
    pub dns: f64,
    pub tcp: f64,
    pub ttfb: f64,
    pub download: f64,
    pub dom_parsing: f64,
    pub dom_complete: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBreakdown {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Newest first
    pub recent: Vec<AnalyticsError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBehavior {
    pub total_interactions: usize,
    pub clicks_by_category: BTreeMap<String, usize>,
    pub average_scroll_depth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsDashboard {
    pub overview: DashboardOverview,
    pub realtime: RealtimeStats,
    pub performance: Option<NavigationTimings>,
    pub errors: ErrorBreakdown,
    pub user_behavior: UserBehavior,
}

/// Query string of `GET /api/analytics/events`; times are epoch milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub events: Vec<AnalyticsEvent>,
    pub total: usize,
    pub query: EventQuery,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LoadPercentiles {
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub sample_size: usize,
    pub average_load_time: f64,
    pub median_load_time: f64,
    pub percentiles: LoadPercentiles,
}

/// Share of samples per bucket, in percent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VitalScore {
    pub value: f64,
    pub good: f64,
    pub needs_improvement: f64,
    pub poor: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WebVitals {
    pub lcp: Option<VitalScore>,
    pub fid: Option<VitalScore>,
    pub cls: Option<VitalScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub count: u64,
    pub average_duration: f64,
    pub total_size: Value,
    pub slow_resources: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourlyLoad {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub average_load_time: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub summary: LoadSummary,
    pub web_vitals: Option<WebVitals>,
    pub resource_breakdown: Option<BTreeMap<String, ResourceStats>>,
    pub time_series: Vec<HourlyLoad>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorExample {
    pub id: String,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Errors sharing type and message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorGroup {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub count: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_seen: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    pub examples: Vec<ErrorExample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalytics {
    pub total_errors: usize,
    pub unique_errors: usize,
    pub error_groups: Vec<ErrorGroup>,
    pub top_errors: Vec<ErrorGroup>,
}

/// Group errors by `(type, message)`, most frequent first. Ties keep the
/// order in which the groups were first seen.
pub fn group_errors<'a, I>(errors: I) -> Vec<ErrorGroup>
where
    I: IntoIterator<Item = &'a AnalyticsError>,
{
    let mut groups: Vec<ErrorGroup> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for error in errors {
        let key = (error.kind.clone(), error.message.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(ErrorGroup {
                kind: error.kind.clone(),
                message: error.message.clone(),
                count: 0,
                first_seen: error.server_timestamp,
                last_seen: error.server_timestamp,
                examples: Vec::new(),
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.count += 1;
        group.first_seen = group.first_seen.min(error.server_timestamp);
        group.last_seen = group.last_seen.max(error.server_timestamp);
        if group.examples.len() < 3 {
            group.examples.push(ErrorExample {
                id: error.id.to_string(),
                url: error.url.clone(),
                user_agent: error.user_agent.clone(),
                timestamp: error.server_timestamp,
            });
        }
    }

    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups
}

fn vital_score(samples: &[f64], good: f64, poor: f64) -> Option<VitalScore> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let share = |pred: &dyn Fn(f64) -> bool| {
        samples.iter().filter(|v| pred(**v)).count() as f64 / n * 100.0
    };
    Some(VitalScore {
        value: average(samples),
        good: share(&|v| v <= good),
        needs_improvement: share(&|v| v > good && v <= poor),
        poor: share(&|v| v > poor),
    })
}

fn average_field<'a, I>(metrics: I, field: &str) -> f64
where
    I: Iterator<Item = &'a AnalyticsMetric>,
{
    let values: Vec<f64> = metrics.filter_map(|m| m.number(field)).collect();
    average(&values).round()
}

impl AnalyticsStore {
    pub fn dashboard(&self, now: DateTime<Utc>) -> AnalyticsDashboard {
        let window_start = now - Duration::seconds(self.config.active_window_seconds as i64);
        let active_sessions = self
            .sessions
            .values()
            .filter(|s| s.last_activity > window_start)
            .count();

        let recent_page_views: Vec<&AnalyticsEvent> = self
            .events
            .iter()
            .filter(|e| e.server_timestamp > window_start && e.kind == "pageView")
            .collect();

        let totals = &self.totals;
        let error_rate = if totals.request_events == 0 {
            0.0
        } else {
            round2(totals.errors_ingested as f64 / totals.request_events as f64 * 100.0)
        };

        AnalyticsDashboard {
            overview: DashboardOverview {
                total_page_views: totals.page_views,
                unique_users: totals.unique_users.len(),
                active_sessions,
                average_load_time: totals.average_load_time.round(),
                error_rate,
                timestamp: now,
            },
            realtime: RealtimeStats {
                active_users: active_sessions,
                page_views_last_hour: recent_page_views.len(),
                errors_last_hour: self
                    .errors
                    .iter()
                    .filter(|e| e.server_timestamp > window_start)
                    .count(),
                top_pages: top_pages(&recent_page_views, 5),
            },
            performance: self.navigation_timings(),
            errors: self.error_breakdown(),
            user_behavior: self.user_behavior(),
        }
    }

    fn navigation_timings(&self) -> Option<NavigationTimings> {
        let navigation = || self.metrics.iter().filter(|m| m.kind == "navigation");
        navigation().next()?;
        Some(NavigationTimings {
            dns: average_field(navigation(), "dns"),
            tcp: average_field(navigation(), "tcp"),
            ttfb: average_field(navigation(), "ttfb"),
            download: average_field(navigation(), "download"),
            dom_parsing: average_field(navigation(), "domParsing"),
            dom_complete: average_field(navigation(), "domComplete"),
        })
    }

    fn error_breakdown(&self) -> ErrorBreakdown {
        let mut by_type = BTreeMap::new();
        for error in &self.errors {
            *by_type.entry(error.kind.clone()).or_insert(0) += 1;
        }
        ErrorBreakdown {
            total: self.errors.len(),
            by_type,
            recent: self.errors.iter().rev().take(10).cloned().collect(),
        }
    }

    fn user_behavior(&self) -> UserBehavior {
        let mut total_interactions = 0;
        let mut clicks_by_category = BTreeMap::new();
        let mut scroll_depths = Vec::new();

        for event in &self.events {
            match event.kind.as_str() {
                "interaction" => {
                    total_interactions += 1;
                    if let Some(category) = event.data.get("category").and_then(Value::as_str) {
                        *clicks_by_category.entry(category.to_string()).or_insert(0) += 1;
                    }
                }
                "scrollDepth" => scroll_depths.extend(number_at(&event.data, "depth")),
                _ => {}
            }
        }

        UserBehavior {
            total_interactions,
            clicks_by_category,
            average_scroll_depth: average(&scroll_depths).round(),
        }
    }

    /// Events in `[startTime, endTime]` (default: the last 24 hours),
    /// optionally of one type, newest first
    pub fn events(&self, query: EventQuery, now: DateTime<Utc>) -> EventPage {
        let start = query
            .start_time
            .unwrap_or_else(|| (now - Duration::hours(24)).timestamp_millis());
        let end = query.end_time.unwrap_or_else(|| now.timestamp_millis());
        let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);

        let mut events: Vec<AnalyticsEvent> = self
            .events
            .iter()
            .filter(|e| {
                let ts = e.server_timestamp.timestamp_millis();
                ts >= start && ts <= end
            })
            .filter(|e| query.kind.as_deref().map_or(true, |k| e.kind == k))
            .cloned()
            .collect();
        // Stable sort keeps later insertions first among equal timestamps
        events.reverse();
        events.sort_by(|a, b| b.server_timestamp.cmp(&a.server_timestamp));
        events.truncate(limit);

        EventPage {
            total: events.len(),
            events,
            query: EventQuery {
                kind: query.kind,
                start_time: Some(start),
                end_time: Some(end),
                limit: Some(limit),
            },
        }
    }

    /// `None` until at least one navigation sample with a positive load time arrived
    pub fn performance(&self) -> Option<PerformanceReport> {
        let navigation: Vec<(&AnalyticsMetric, f64)> = self
            .metrics
            .iter()
            .filter(|m| m.kind == "navigation")
            .filter_map(|m| m.number("totalTime").map(|t| (m, t)))
            .filter(|(_, t)| *t > 0.0)
            .collect();
        if navigation.is_empty() {
            return None;
        }

        let load_times = sorted_copy(navigation.iter().map(|(_, t)| t));
        let p50 = percentile(&load_times, 50.0);

        Some(PerformanceReport {
            summary: LoadSummary {
                sample_size: load_times.len(),
                average_load_time: average(&load_times).round(),
                median_load_time: p50.round(),
                percentiles: LoadPercentiles {
                    p50: p50.round(),
                    p75: percentile(&load_times, 75.0).round(),
                    p95: percentile(&load_times, 95.0).round(),
                    p99: percentile(&load_times, 99.0).round(),
                },
            },
            web_vitals: self.web_vitals(),
            resource_breakdown: self.resource_breakdown(),
            time_series: hourly_series(&navigation),
        })
    }

    fn web_vitals(&self) -> Option<WebVitals> {
        let vitals: Vec<&AnalyticsMetric> =
            self.metrics.iter().filter(|m| m.kind == "webVitals").collect();
        if vitals.is_empty() {
            return None;
        }
        let positive = |field: &str| -> Vec<f64> {
            vitals
                .iter()
                .filter_map(|m| m.number(field))
                .filter(|v| *v > 0.0)
                .collect()
        };
        let lcp = positive("lcp");
        let fid = positive("fid");
        let cls: Vec<f64> = self
            .metrics
            .iter()
            .filter(|m| m.kind == "layoutShift")
            .filter_map(|m| m.number("cls"))
            .collect();

        Some(WebVitals {
            lcp: vital_score(&lcp, 2500.0, 4000.0).map(|s| VitalScore {
                value: s.value.round(),
                ..s
            }),
            fid: vital_score(&fid, 100.0, 300.0).map(|s| VitalScore {
                value: s.value.round(),
                ..s
            }),
            cls: vital_score(&cls, 0.1, 0.25).map(|s| VitalScore {
                value: (s.value * 1000.0).round() / 1000.0,
                ..s
            }),
        })
    }

    /// Per-type breakdown of the latest resource-timing sample
    fn resource_breakdown(&self) -> Option<BTreeMap<String, ResourceStats>> {
        let latest = self.metrics.iter().rev().find(|m| m.kind == "resources")?;
        let entries = latest.data.as_object()?;
        Some(
            entries
                .iter()
                .map(|(kind, data)| {
                    let count = data.get("count").and_then(Value::as_u64).unwrap_or(0);
                    let total_duration = number_at(data, "totalDuration").unwrap_or(0.0);
                    let stats = ResourceStats {
                        count,
                        average_duration: if count > 0 {
                            (total_duration / count as f64).round()
                        } else {
                            0.0
                        },
                        total_size: data.get("totalSize").cloned().unwrap_or(Value::Null),
                        slow_resources: data.get("items").cloned().unwrap_or(Value::Null),
                    };
                    (kind.clone(), stats)
                })
                .collect(),
        )
    }

    pub fn error_analytics(&self, resolved: bool) -> ErrorAnalytics {
        let matching: Vec<&AnalyticsError> =
            self.errors.iter().filter(|e| e.resolved == resolved).collect();
        let groups = group_errors(matching.iter().copied());
        ErrorAnalytics {
            total_errors: matching.len(),
            unique_errors: groups.len(),
            top_errors: groups.iter().take(10).cloned().collect(),
            error_groups: groups,
        }
    }
}

fn top_pages(page_views: &[&AnalyticsEvent], n: usize) -> Vec<PageCount> {
    let mut counts: Vec<PageCount> = Vec::new();
    for event in page_views {
        let Some(url) = event.data.get("url").and_then(Value::as_str) else {
            continue;
        };
        match counts.iter_mut().find(|p| p.url == url) {
            Some(page) => page.count += 1,
            None => counts.push(PageCount {
                url: url.to_string(),
                count: 1,
            }),
        }
    }
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(n);
    counts
}

fn hourly_series(samples: &[(&AnalyticsMetric, f64)]) -> Vec<HourlyLoad> {
    let mut hours: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
    for (metric, load_time) in samples {
        let hour = metric
            .server_timestamp
            .duration_trunc(Duration::hours(1))
            .unwrap_or(metric.server_timestamp);
        let bucket = hours.entry(hour).or_insert((0.0, 0));
        bucket.0 += load_time;
        bucket.1 += 1;
    }
    hours
        .into_iter()
        .map(|(timestamp, (total, count))| HourlyLoad {
            timestamp,
            average_load_time: (total / count as f64).round(),
            count,
        })
        .collect()
}

impl AnalyticsAggregator {
    pub async fn dashboard(&self) -> AnalyticsDashboard {
        self.store.read().await.dashboard(Utc::now())
    }

    pub async fn events(&self, query: EventQuery) -> EventPage {
        self.store.read().await.events(query, Utc::now())
    }

    pub async fn performance(&self) -> Option<PerformanceReport> {
        self.store.read().await.performance()
    }

    pub async fn error_analytics(&self, resolved: bool) -> ErrorAnalytics {
        self.store.read().await.error_analytics(resolved)
    }
}
