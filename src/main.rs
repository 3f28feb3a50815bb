use anyhow::Result;
use clap::{Parser, Subcommand};
use lightningtalk_telemetry::application::*;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "lightningtalk-telemetry")]
#[command(about = "Telemetry, alerting and client analytics for the Lightning Talk Circle service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and monitoring timers
    Serve,
    /// Print the health report as JSON; exits non-zero when unhealthy
    Health,
    /// Generate sample configuration file
    InitConfig {
        /// Directory to write `.env.example` into
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Show the effective configuration
    Config,
}

/// RUST_LOG wins over LOG_LEVEL; LOG_FORMAT=json switches to JSON lines
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .and_then(|level| EnvFilter::try_new(level).ok())
        })
        .unwrap_or_else(|| "info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing();

    // Initialize application
    let app = Application::new().await?;
    app.initialize().await?;

    // Route commands to appropriate handlers
    match cli.command {
        Some(Commands::Health) => {
            let handler = HealthCommandHandler::new(app.container.clone());
            if !handler.run_health_check().await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::InitConfig { dir }) => {
            ConfigCommandHandler::new(app.service.clone()).init(&dir)
        }
        Some(Commands::Config) => ConfigCommandHandler::new(app.service.clone()).show(),
        Some(Commands::Serve) | None => {
            // Default to starting the server
            let handler = ServerCommandHandler::new(app.container.clone(), app.lifecycle.clone());
            handler.start_http().await
        }
    }
}
