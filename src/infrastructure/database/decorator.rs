//! Executor decorators.
//!
//! A [`Decorator`] wraps an executor to add cross-cutting behavior such as
//! logging or metrics. Decorators must keep the query contract intact: no
//! rewriting, no retries.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::{PgQueryResult, PgRow};
use sqlx::Execute;
use tracing::Instrument;

use super::executor::{Executor, PgQuery};
use crate::infrastructure::metrics;
use crate::shared::error::TxError;

/// Transform applied to every executor resolved by the manager.
pub type Decorator = Arc<dyn Fn(Arc<dyn Executor>) -> Arc<dyn Executor> + Send + Sync>;

/// Box a closure as a [`Decorator`].
pub fn decorator<F>(f: F) -> Decorator
where
    F: Fn(Arc<dyn Executor>) -> Arc<dyn Executor> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Left fold: the first decorator wraps the base executor, the last one is outermost.
pub(crate) fn apply(decorators: &[Decorator], base: Arc<dyn Executor>) -> Arc<dyn Executor> {
    decorators
        .iter()
        .fold(base, |executor, decorate| decorate(executor))
}

fn mode(executor: &dyn Executor) -> &'static str {
    if executor.in_transaction() {
        "tx"
    } else {
        "pool"
    }
}

/// Logs every query in a `debug` span and reports failures.
pub struct TracedExecutor {
    inner: Arc<dyn Executor>,
}

impl TracedExecutor {
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self { inner }
    }

    fn span(&self, operation: &'static str, sql: &str) -> tracing::Span {
        tracing::debug_span!(
            "db.query",
            operation,
            mode = mode(self.inner.as_ref()),
            sql = %sql,
        )
    }
}

fn log_failure<T>(result: Result<T, TxError>) -> Result<T, TxError> {
    if let Err(e) = &result {
        tracing::warn!(error = %e, "Query failed");
    }
    result
}

#[async_trait]
impl Executor for TracedExecutor {
    async fn execute<'q>(&self, query: PgQuery<'q>) -> Result<PgQueryResult, TxError> {
        let span = self.span("execute", query.sql());
        log_failure(self.inner.execute(query).instrument(span).await)
    }

    async fn fetch_all<'q>(&self, query: PgQuery<'q>) -> Result<Vec<PgRow>, TxError> {
        let span = self.span("fetch_all", query.sql());
        log_failure(self.inner.fetch_all(query).instrument(span).await)
    }

    async fn fetch_optional<'q>(&self, query: PgQuery<'q>) -> Result<Option<PgRow>, TxError> {
        let span = self.span("fetch_optional", query.sql());
        log_failure(self.inner.fetch_optional(query).instrument(span).await)
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

/// Records query latency in `tx_manager_query_duration_seconds`.
pub struct MeteredExecutor {
    inner: Arc<dyn Executor>,
}

impl MeteredExecutor {
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self { inner }
    }

    fn record(&self, operation: &str, started: Instant) {
        metrics::record_query(
            operation,
            mode(self.inner.as_ref()),
            started.elapsed().as_secs_f64(),
        );
    }
}

#[async_trait]
impl Executor for MeteredExecutor {
    async fn execute<'q>(&self, query: PgQuery<'q>) -> Result<PgQueryResult, TxError> {
        let started = Instant::now();
        let result = self.inner.execute(query).await;
        self.record("execute", started);
        result
    }

    async fn fetch_all<'q>(&self, query: PgQuery<'q>) -> Result<Vec<PgRow>, TxError> {
        let started = Instant::now();
        let result = self.inner.fetch_all(query).await;
        self.record("fetch_all", started);
        result
    }

    async fn fetch_optional<'q>(&self, query: PgQuery<'q>) -> Result<Option<PgRow>, TxError> {
        let started = Instant::now();
        let result = self.inner.fetch_optional(query).await;
        self.record("fetch_optional", started);
        result
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

pub fn tracing_decorator() -> Decorator {
    decorator(|inner| Arc::new(TracedExecutor::new(inner)))
}

pub fn metrics_decorator() -> Decorator {
    decorator(|inner| Arc::new(MeteredExecutor::new(inner)))
}
