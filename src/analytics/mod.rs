//! Client-submitted analytics: beacon batch ingestion, rolling aggregates,
//! dashboard queries and error grouping.

pub mod aggregator;
pub mod models;
pub mod queries;

pub use aggregator::AnalyticsAggregator;
pub use models::{
    AnalyticsError, AnalyticsEvent, AnalyticsMetric, ClientError, ClientEvent, ClientMetric,
    IngestBatch, IngestContext, ProcessedCounts, Session,
};
pub use queries::{
    group_errors, AnalyticsDashboard, ErrorAnalytics, ErrorGroup, EventPage, EventQuery,
    PerformanceReport, VitalScore, WebVitals,
};
