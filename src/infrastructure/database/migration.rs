//! Schema migrations.
//!
//! Configured once with a migrations directory (or an embedded migrator),
//! then run against the raw pool before the manager starts serving
//! transactional work.

use std::path::Path;

use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tokio::sync::OnceCell;

use crate::shared::error::TxError;

pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

#[derive(Debug, Default)]
pub struct MigrationRunner {
    migrator: OnceCell<Migrator>,
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a migrator built at compile time, e.g. with `sqlx::migrate!()`.
    pub fn from_migrator(migrator: Migrator) -> Self {
        Self {
            migrator: OnceCell::new_with(Some(migrator)),
        }
    }

    /// Load migrations from `path`. Only the first successful call has any effect.
    pub async fn setup(&self, path: impl AsRef<Path>) -> Result<(), TxError> {
        let path = path.as_ref().to_path_buf();
        self.migrator
            .get_or_try_init(|| async move { Migrator::new(path).await.map_err(TxError::Migration) })
            .await?;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.migrator.initialized()
    }

    /// Apply every pending migration. Nothing pending is not an error.
    pub async fn up(&self, pool: &PgPool) -> Result<(), TxError> {
        let migrator = self.migrator.get().ok_or(TxError::MigrationNotConfigured)?;
        migrator.run(pool).await?;
        tracing::info!(count = migrator.iter().count(), "Database migrations applied");
        Ok(())
    }

    /// Revert every applied migration.
    pub async fn down(&self, pool: &PgPool) -> Result<(), TxError> {
        let migrator = self.migrator.get().ok_or(TxError::MigrationNotConfigured)?;
        migrator.undo(pool, 0).await?;
        tracing::info!("Database migrations reverted");
        Ok(())
    }
}
