//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::infrastructure::database::migration::DEFAULT_MIGRATIONS_DIR;
use crate::infrastructure::database::DbConfig;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Database configuration (PostgreSQL). Unset fields fall back to the
    /// `PG*` environment variables and pool defaults at connect time.
    #[serde(default)]
    pub database: DbConfig,

    /// Schema migration configuration
    pub migrations: MigrationSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Schema migration configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    /// Run pending migrations at startup
    pub enabled: bool,

    /// Directory containing the migration files
    pub path: String,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("migrations.enabled", true)?
            .set_default("migrations.path", DEFAULT_MIGRATIONS_DIR)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__DATABASE__POOL__MAX_CONNECTIONS=20 -> database.pool.max_connections = 20
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("database.host", std::env::var("DATABASE_HOST").ok())?
            .set_override_option("database.port", std::env::var("DATABASE_PORT").ok())?
            .set_override_option("database.user", std::env::var("DATABASE_USER").ok())?
            .set_override_option(
                "database.password",
                std::env::var("DATABASE_PASSWORD").ok(),
            )?
            .set_override_option(
                "database.database_name",
                std::env::var("DATABASE_NAME").ok(),
            )?
            .set_override_option("database.schema", std::env::var("DATABASE_SCHEMA").ok())?
            .set_override_option("migrations.path", std::env::var("MIGRATIONS_PATH").ok())?
            .build()?
            .try_deserialize()
    }
}
