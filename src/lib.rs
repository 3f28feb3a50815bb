pub mod analytics;
pub mod api;
pub mod application;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod telemetry;

pub use config::Config;
pub use error::{Result, TelemetryError};

// Re-export monitoring types
pub use monitoring::{
    Alert, AlertEngine, AlertKind, AlertSeverity, HealthReport, MetricsStore, MonitoringService,
};

// Re-export analytics types
pub use analytics::{AnalyticsAggregator, IngestBatch};

// Re-export telemetry types
pub use telemetry::{TelemetryBackend, TelemetrySink};

pub use api::{create_api_router, AppState};
