//! Executors
//!
//! An [`Executor`] is anything repository code can run a query against: a
//! pooled connection or an open transaction. Query code only ever sees
//! `Arc<dyn Executor>` and never needs to know which one it got.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::Postgres;
use tokio::time::Instant;

use super::pool::ConnectionPool;
use super::scope::{bounded, TxHandle};
use crate::shared::error::TxError;

/// A bound sqlx query against PostgreSQL.
pub type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Query surface shared by pooled connections and transactions.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute<'q>(&self, query: PgQuery<'q>) -> Result<PgQueryResult, TxError>;

    async fn fetch_all<'q>(&self, query: PgQuery<'q>) -> Result<Vec<PgRow>, TxError>;

    async fn fetch_optional<'q>(&self, query: PgQuery<'q>) -> Result<Option<PgRow>, TxError>;

    /// Fetch exactly one row, failing with `RowNotFound` otherwise.
    async fn fetch_one<'q>(&self, query: PgQuery<'q>) -> Result<PgRow, TxError> {
        self.fetch_optional(query)
            .await?
            .ok_or(TxError::Query(sqlx::Error::RowNotFound))
    }

    /// Whether queries issued here run inside a transaction.
    fn in_transaction(&self) -> bool;
}

/// Driver-level transaction as issued by a [`ConnectionPool`].
///
/// Commit and rollback finalize the transaction; the manager never calls
/// either of them twice on the same value.
#[async_trait]
pub trait DbTransaction: Send {
    async fn execute<'q>(&mut self, query: PgQuery<'q>) -> Result<PgQueryResult, sqlx::Error>;

    async fn fetch_all<'q>(&mut self, query: PgQuery<'q>) -> Result<Vec<PgRow>, sqlx::Error>;

    async fn fetch_optional<'q>(
        &mut self,
        query: PgQuery<'q>,
    ) -> Result<Option<PgRow>, sqlx::Error>;

    async fn commit(&mut self) -> Result<(), sqlx::Error>;

    async fn rollback(&mut self) -> Result<(), sqlx::Error>;
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Options for beginning a transaction. The default keeps every
/// setting at the database default (`READ COMMITTED` in PostgreSQL).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    pub deferrable: bool,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    /// `SET TRANSACTION` statement for these options, `None` when every
    /// setting is the database default.
    pub fn set_transaction_statement(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(level) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {}", level));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }
        if self.deferrable {
            modes.push("DEFERRABLE".to_string());
        }

        if modes.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", modes.join(" ")))
        }
    }
}

/// Executor backed by the connection pool.
pub struct PoolExecutor {
    pool: Arc<dyn ConnectionPool>,
    deadline: Option<Instant>,
}

impl PoolExecutor {
    pub fn new(pool: Arc<dyn ConnectionPool>, deadline: Option<Instant>) -> Self {
        Self { pool, deadline }
    }
}

#[async_trait]
impl Executor for PoolExecutor {
    async fn execute<'q>(&self, query: PgQuery<'q>) -> Result<PgQueryResult, TxError> {
        bounded(self.deadline, self.pool.execute(query)).await
    }

    async fn fetch_all<'q>(&self, query: PgQuery<'q>) -> Result<Vec<PgRow>, TxError> {
        bounded(self.deadline, self.pool.fetch_all(query)).await
    }

    async fn fetch_optional<'q>(&self, query: PgQuery<'q>) -> Result<Option<PgRow>, TxError> {
        bounded(self.deadline, self.pool.fetch_optional(query)).await
    }

    fn in_transaction(&self) -> bool {
        false
    }
}

/// Executor backed by the transaction carried in a scope.
pub struct TxExecutor {
    handle: TxHandle,
    deadline: Option<Instant>,
}

impl TxExecutor {
    pub fn new(handle: TxHandle, deadline: Option<Instant>) -> Self {
        Self { handle, deadline }
    }
}

#[async_trait]
impl Executor for TxExecutor {
    async fn execute<'q>(&self, query: PgQuery<'q>) -> Result<PgQueryResult, TxError> {
        bounded(self.deadline, self.handle.execute(query)).await
    }

    async fn fetch_all<'q>(&self, query: PgQuery<'q>) -> Result<Vec<PgRow>, TxError> {
        bounded(self.deadline, self.handle.fetch_all(query)).await
    }

    async fn fetch_optional<'q>(&self, query: PgQuery<'q>) -> Result<Option<PgRow>, TxError> {
        bounded(self.deadline, self.handle.fetch_optional(query)).await
    }

    fn in_transaction(&self) -> bool {
        true
    }
}
