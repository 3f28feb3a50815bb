use crate::application::DependencyContainer;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Manages application lifecycle events and graceful shutdown
pub struct ApplicationLifecycle {
    container: Arc<DependencyContainer>,
}

impl ApplicationLifecycle {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    /// Validate configuration before anything is started
    pub async fn initialize(&self) -> Result<()> {
        info!("🚀 Initializing application...");
        self.container.config.validate()?;
        info!("✅ Application initialized successfully");
        Ok(())
    }

    /// Start the monitoring timers
    pub async fn start(&self) {
        self.container.monitoring.start().await;
    }

    /// Graceful shutdown
    pub async fn shutdown(&self) -> Result<()> {
        info!("🛑 Initiating graceful shutdown...");

        self.container.monitoring.stop().await;
        self.container.stop_background().await;

        info!("🎉 Graceful shutdown completed");
        Ok(())
    }

    /// Wait for shutdown signals
    pub async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install terminate signal handler: {}", e);
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received");
    }
}
