//! Together room server entry point.
//!
//! Loads the configuration, opens the room database, and serves clients until
//! SIGINT or SIGTERM arrives.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{anyhow, Context, Result};
use room_server::RoomServer;
use room_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::AppConfig;

/// How long shutdown waits for connection workers to release their rooms.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The configured server, ready to run.
pub struct Application {
    config: AppConfig,
    server: Arc<RoomServer>,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self> {
        // Configuration is loaded before logging exists, so its own messages
        // only reach the subscriber if it was already installed.
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging)?;

        let database = config.database_path();
        let store = SqliteStore::open(&database)
            .with_context(|| format!("opening database {}", database.display()))?;
        let server = Arc::new(RoomServer::new(config.to_server_config()?, Arc::new(store)));

        info!("🚀 Together room server v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Database: {}",
            args.config_path.display(),
            database.display()
        );

        Ok(Self { config, server })
    }

    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  🏠 Max room capacity: {} | Admission scope: {}",
            self.config.rooms.max_capacity, self.config.rooms.admission_scope
        );

        let mut shutdown = signals::listen().context("installing signal handlers")?;
        let listener = self.server.bind()?;
        let serving = self.server.clone();
        let mut server_handle = tokio::spawn(async move { serving.serve(listener).await });

        info!("✅ Together is now running, press Ctrl+C to shut down");

        tokio::select! {
            finished = &mut server_handle => {
                finished.context("server task panicked")??;
                warn!("Server stopped without a shutdown signal");
                return Ok(());
            }
            signal = signals::triggered(&mut shutdown) => {
                info!("🛑 {} received, initiating graceful shutdown...", signal);
            }
        }

        self.server.shutdown().await?;
        server_handle.await.context("server task panicked")??;

        info!("⏳ Waiting for connections to close...");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while self.server.active_connections() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} connections still open after {:?}",
                self.server.active_connections(),
                DRAIN_TIMEOUT
            );
        }

        info!("👋 Together room server shutdown complete");
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
