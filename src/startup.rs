//! Application Startup
//!
//! Connects the pool, applies migrations and builds the transaction manager.

use std::sync::Arc;

use crate::config::Settings;
use crate::infrastructure::database::{
    self, metrics_decorator, tracing_decorator, ConnectionPool, MigrationRunner, PgConnectionPool,
    Scope, TxManager,
};
use crate::shared::error::{AppError, TxError};

/// Application instance
pub struct Application {
    pool: Arc<PgConnectionPool>,
    manager: Arc<TxManager>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self, AppError> {
        let pool = Arc::new(database::connect(&settings.database).await?);

        if settings.migrations.enabled {
            let migrations = MigrationRunner::new();
            migrations.setup(&settings.migrations.path).await?;
            migrations.up(pool.inner()).await?;
        } else {
            tracing::info!("Migrations disabled, skipping");
        }

        let manager = Arc::new(TxManager::new(
            pool.clone(),
            vec![tracing_decorator(), metrics_decorator()],
        ));
        tracing::info!("Transaction manager ready");

        Ok(Self { pool, manager })
    }

    /// Round-trip a query through a transaction.
    pub async fn verify(&self) -> Result<(), AppError> {
        let manager = self.manager.clone();
        manager
            .run(&Scope::new(), |scope| {
                let manager = manager.clone();
                async move {
                    manager
                        .conn(&scope)
                        .fetch_one(sqlx::query("SELECT 1"))
                        .await?;
                    Ok::<_, TxError>(())
                }
            })
            .await?;
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn shutdown(self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}
