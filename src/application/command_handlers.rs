use crate::api::create_api_router;
use crate::application::{ApplicationLifecycle, ApplicationService, DependencyContainer};
use crate::config::create_sample_env_file;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Clean separation of command handling logic from main.rs
pub struct ServerCommandHandler {
    container: Arc<DependencyContainer>,
    lifecycle: Arc<ApplicationLifecycle>,
}

impl ServerCommandHandler {
    pub fn new(container: Arc<DependencyContainer>, lifecycle: Arc<ApplicationLifecycle>) -> Self {
        Self {
            container,
            lifecycle,
        }
    }

    /// Serve the HTTP API until a shutdown signal arrives
    pub async fn start_http(&self) -> Result<()> {
        let config = &self.container.config;
        let addr = format!("{}:{}", config.http_host, config.http_port);
        info!("🚀 Starting HTTP server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        self.lifecycle.start().await;

        let app = create_api_router(self.container.app_state());
        let lifecycle = self.lifecycle.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { lifecycle.wait_for_shutdown().await })
            .await;

        self.lifecycle.shutdown().await?;
        served.context("HTTP server error")
    }
}

pub struct HealthCommandHandler {
    container: Arc<DependencyContainer>,
}

impl HealthCommandHandler {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    /// Take a fresh sample, probe the database and print the health report
    /// as JSON; returns whether the system is healthy
    pub async fn run_health_check(&self) -> Result<bool> {
        info!("🏥 Running system health check...");

        let monitoring = &self.container.monitoring;
        monitoring.sample_now().await;
        monitoring.database_sweep().await;
        let report = monitoring.health().await;

        println!("{}", serde_json::to_string_pretty(&report)?);

        if report.healthy {
            info!("✅ System is healthy");
        } else {
            for (check, _) in report.checks.iter().filter(|(_, passed)| !**passed) {
                error!("❌ Check failed: {}", check);
            }
        }
        Ok(report.healthy)
    }
}

pub struct ConfigCommandHandler {
    service: Arc<ApplicationService>,
}

impl ConfigCommandHandler {
    pub fn new(service: Arc<ApplicationService>) -> Self {
        Self { service }
    }

    /// Write `.env.example` into `dir`
    pub fn init(&self, dir: &Path) -> Result<()> {
        create_sample_env_file(dir)
    }

    pub fn show(&self) -> Result<()> {
        let summary = self.service.get_config_summary();
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }
}
