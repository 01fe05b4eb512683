//! Connection Pool
//!
//! [`ConnectionPool`] is the seam between the transaction manager and the
//! driver. [`PgConnectionPool`] is the production implementation on top of
//! `sqlx::PgPool`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{Connection, PgPool, Postgres};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::config::DbConfig;
use super::executor::{DbTransaction, Executor, PgQuery, TxOptions};
use crate::infrastructure::metrics;
use crate::shared::error::TxError;

/// A pool of live database connections.
#[async_trait]
pub trait ConnectionPool: Executor {
    /// Begin a transaction on a connection checked out of the pool.
    async fn begin(&self, opts: &TxOptions) -> Result<Box<dyn DbTransaction>, sqlx::Error>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), sqlx::Error>;

    /// Close every connection. Further checkouts fail.
    async fn close(&self);
}

/// Open transaction on a pooled PostgreSQL connection.
///
/// Dropping it without commit or rollback rolls back.
pub struct PgTransaction {
    inner: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { inner: Some(tx) }
    }

    fn tx(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, sqlx::Error> {
        self.inner.as_mut().ok_or_else(finalized)
    }
}

fn finalized() -> sqlx::Error {
    sqlx::Error::Protocol("transaction already committed or rolled back".into())
}

#[async_trait]
impl DbTransaction for PgTransaction {
    async fn execute<'q>(&mut self, query: PgQuery<'q>) -> Result<PgQueryResult, sqlx::Error> {
        let tx = self.tx()?;
        query.execute(&mut **tx).await
    }

    async fn fetch_all<'q>(&mut self, query: PgQuery<'q>) -> Result<Vec<PgRow>, sqlx::Error> {
        let tx = self.tx()?;
        query.fetch_all(&mut **tx).await
    }

    async fn fetch_optional<'q>(
        &mut self,
        query: PgQuery<'q>,
    ) -> Result<Option<PgRow>, sqlx::Error> {
        let tx = self.tx()?;
        query.fetch_optional(&mut **tx).await
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.inner.take().ok_or_else(finalized)?.commit().await
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.inner.take().ok_or_else(finalized)?.rollback().await
    }
}

/// PostgreSQL connection pool with a periodic health check.
#[derive(Debug)]
pub struct PgConnectionPool {
    pool: PgPool,
    health_check: Option<JoinHandle<()>>,
}

impl PgConnectionPool {
    /// Wrap an existing pool without a health check task.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            health_check: None,
        }
    }

    /// The raw sqlx pool, e.g. for running migrations.
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

impl Drop for PgConnectionPool {
    fn drop(&mut self) {
        if let Some(task) = self.health_check.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Executor for PgConnectionPool {
    async fn execute<'q>(&self, query: PgQuery<'q>) -> Result<PgQueryResult, TxError> {
        Ok(query.execute(&self.pool).await?)
    }

    async fn fetch_all<'q>(&self, query: PgQuery<'q>) -> Result<Vec<PgRow>, TxError> {
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn fetch_optional<'q>(&self, query: PgQuery<'q>) -> Result<Option<PgRow>, TxError> {
        Ok(query.fetch_optional(&self.pool).await?)
    }

    fn in_transaction(&self) -> bool {
        false
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    async fn begin(&self, opts: &TxOptions) -> Result<Box<dyn DbTransaction>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Must be the first statement of the transaction.
        if let Some(statement) = opts.set_transaction_statement() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        Ok(Box::new(PgTransaction::new(tx)))
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await
    }

    async fn close(&self) {
        if let Some(task) = &self.health_check {
            task.abort();
        }
        self.pool.close().await;
    }
}

/// Create a PostgreSQL connection pool.
///
/// Unset fields of `config` are filled from [`DbConfig::from_env`] and the
/// connection target is taken from [`DbConfig::dsn`]. The pool is pinged once
/// before it is returned.
pub async fn connect(config: &DbConfig) -> Result<PgConnectionPool, TxError> {
    let cfg = config.clone().with_defaults(&DbConfig::from_env());

    let options = cfg.connect_options().map_err(TxError::Connection)?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.pool.max_connections)
        .min_connections(cfg.pool.min_connections)
        .idle_timeout(cfg.pool.max_idle_timeout)
        .acquire_timeout(cfg.pool.acquire_timeout)
        .test_before_acquire(true)
        .connect_with(options)
        .await
        .map_err(TxError::Connection)?;

    let mut pool = PgConnectionPool::from_pool(pool);
    pool.ping().await.map_err(TxError::Connection)?;

    pool.health_check = Some(spawn_health_check(
        pool.pool.clone(),
        cfg.pool.health_check_period,
        cfg.pool.max_connections,
    ));

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        database = %cfg.database_name,
        schema = %cfg.schema,
        max_connections = cfg.pool.max_connections,
        min_connections = cfg.pool.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

fn spawn_health_check(pool: PgPool, period: Duration, max_connections: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }

            match pool.acquire().await {
                Ok(mut conn) => {
                    if let Err(e) = conn.ping().await {
                        tracing::warn!(error = %e, "Database health check failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Database health check could not acquire a connection"),
            }

            let idle = pool.num_idle() as u32;
            metrics::update_db_pool_stats(idle, pool.size().saturating_sub(idle), max_connections);
        }
    })
}
