//! Main application entry point for the game gateway.
//!
//! Loads configuration, applies command-line overrides, sets up logging and
//! runs the gateway until a termination signal arrives.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{anyhow, Result};
use cli::CliArgs;
use config::AppConfig;
use gateway_server::GatewayServer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the health line is logged.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

pub struct Application {
    config: AppConfig,
    server: Arc<GatewayServer>,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self> {
        // Configuration is loaded before logging exists; failures go to stderr.
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;

        let server_config = config.to_server_config()?;
        let server = Arc::new(GatewayServer::new(server_config));

        info!(
            "🚀 Game Gateway v{} | config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );

        Ok(Self { config, server })
    }

    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!(
            "  🌐 Listening on ws://{}{}",
            self.config.server.bind_address, self.config.server.path
        );
        info!("  📦 Wire format: {}", self.config.server.wire_format);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  💓 Heartbeat: every {}s, timeout {}s",
            self.config.server.heartbeat_interval, self.config.server.heartbeat_timeout
        );
        info!(
            "  ⚙️ Dispatch: {} workers, queue {}, broadcast buffer {}",
            self.config.dispatch.workers,
            self.config.dispatch.queue_capacity,
            self.config.dispatch.broadcast_buffer
        );

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        let monitoring_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATS_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let stats = server.stats().await;
                    info!(
                        "📊 Gateway Health - {}/{} connections | {} rooms | {} open sockets",
                        stats.connections,
                        stats.max_connections,
                        stats.rooms,
                        server.open_connections()
                    );
                }
            })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            result = signals::wait_for_shutdown_signal() => {
                result?;
                info!("🛑 Shutdown signal received, initiating graceful shutdown...");
            }
            finished = &mut server_handle => {
                monitoring_handle.abort();
                return match finished {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(anyhow!("Gateway task failed: {}", e)),
                };
            }
        }

        monitoring_handle.abort();
        self.server.shutdown().await?;

        match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("❌ Gateway error: {}", e),
            Ok(Err(e)) => error!("❌ Gateway task failed: {}", e),
            Err(_) => warn!("Gateway did not stop within 5s"),
        }

        let stats = self.server.stats().await;
        info!(
            "✅ Gateway shutdown complete ({} connections still registered)",
            stats.connections
        );
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }
}
