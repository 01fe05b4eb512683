//! # Tx Manager
//!
//! Bootstraps the database stack and checks it end to end:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Database connection pool and migrations
//! - A round-trip transaction through the manager

use anyhow::Result;
use tracing::info;

use tx_manager::config::Settings;
use tx_manager::startup::Application;
use tx_manager::telemetry::{self, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    telemetry::init_tracing(LogFormat::from_env());

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.database.host,
        database = %settings.database.database_name,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;
    application.verify().await?;
    info!("Database round trip succeeded");

    application.shutdown().await;
    Ok(())
}
