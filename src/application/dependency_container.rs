use crate::{
    analytics::AnalyticsAggregator,
    api::AppState,
    monitoring::{DatabaseProbe, MonitoringService, PostgresProbe, StaticProbe},
    telemetry::{spawn_alert_forwarder, TelemetrySink},
    Config,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Dependency injection container for the application
pub struct DependencyContainer {
    // Core configuration
    pub config: Config,

    // Infrastructure layer
    pub probe: Arc<dyn DatabaseProbe>,
    pub sink: TelemetrySink,

    // Service layer
    pub monitoring: Arc<MonitoringService>,
    pub analytics: Arc<AnalyticsAggregator>,

    // Background tasks owned by the container
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl DependencyContainer {
    pub async fn new() -> Result<Self> {
        // Load configuration
        let config = Config::from_env()?;
        Self::from_config(config).await
    }

    /// Wire every component from an explicit configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        info!("🔧 Initializing dependency container...");

        let probe = Self::create_probe(&config);

        let mut background = Vec::new();
        let (sink, exporter) = TelemetrySink::from_config(&config.telemetry);
        background.extend(exporter);

        let monitoring = Arc::new(MonitoringService::new(
            config.monitoring.clone(),
            probe.clone(),
            Duration::from_millis(config.database.probe_timeout_ms),
            sink.clone(),
        )?);
        background.push(spawn_alert_forwarder(
            monitoring.subscribe_alerts().await,
            sink.clone(),
        ));

        let analytics = Arc::new(AnalyticsAggregator::new(config.analytics.clone()));

        info!("✅ Dependency container initialized");

        Ok(Self {
            config,
            probe,
            sink,
            monitoring,
            analytics,
            background: Mutex::new(background),
        })
    }

    fn create_probe(config: &Config) -> Arc<dyn DatabaseProbe> {
        match &config.database.url {
            Some(url) => match PostgresProbe::connect_lazy(url) {
                Ok(probe) => {
                    info!("Database probe targeting {}", config.safe_database_url());
                    Arc::new(probe)
                }
                Err(e) => {
                    warn!("Invalid DATABASE_URL, database check will fail: {}", e);
                    Arc::new(StaticProbe::unreachable(e.to_string()))
                }
            },
            None => {
                info!("No DATABASE_URL configured, database check always passes");
                Arc::new(StaticProbe::reachable())
            }
        }
    }

    /// State handed to the HTTP layer
    pub fn app_state(&self) -> AppState {
        AppState {
            monitoring: self.monitoring.clone(),
            analytics: self.analytics.clone(),
            admin_token: self.config.admin_token.as_deref().map(Arc::from),
            request_timeout: Duration::from_secs(self.config.request_timeout_seconds),
        }
    }

    /// Health check for the whole stack
    pub async fn health_check(&self) -> Result<bool> {
        Ok(self.monitoring.health().await.healthy)
    }

    /// Abort the forwarder and exporter tasks
    pub async fn stop_background(&self) {
        for task in self.background.lock().await.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[tokio::test]
    #[serial]
    async fn test_new_rejects_malformed_environment() {
        env::set_var("HTTP_PORT", "abc");
        let result = DependencyContainer::new().await;
        env::remove_var("HTTP_PORT");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_app_state_carries_admin_token() {
        let config = Config {
            admin_token: Some("secret".to_string()),
            ..Config::default()
        };
        let container = DependencyContainer::from_config(config)
            .await
            .expect("container");

        let state = container.app_state();
        assert_eq!(state.admin_token.as_deref(), Some("secret"));
        container.stop_background().await;
    }
}
