//! Common Test Utilities
//!
//! In-memory fakes for the connection pool and its transactions. They count
//! every begin, commit, rollback and query so tests can assert on the exact
//! transaction lifecycle without a database.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::postgres::{PgQueryResult, PgRow};

use tx_manager::infrastructure::database::{
    decorator, ConnectionPool, DbTransaction, Decorator, Executor, PgQuery, TxOptions,
};
use tx_manager::TxError;

/// Ordered record of which executor layers a query passed through.
pub type Trail = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Default)]
pub struct Counters {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    pool_queries: AtomicUsize,
    tx_queries: AtomicUsize,
}

impl Counters {
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn pool_queries(&self) -> usize {
        self.pool_queries.load(Ordering::SeqCst)
    }

    pub fn tx_queries(&self) -> usize {
        self.tx_queries.load(Ordering::SeqCst)
    }
}

/// Failures the fake driver should report.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
}

pub struct FakePool {
    pub counters: Arc<Counters>,
    behavior: Behavior,
    trail: Trail,
    last_options: Mutex<Option<TxOptions>>,
}

impl FakePool {
    pub fn new() -> Self {
        Self::with_behavior(Behavior::default())
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            behavior,
            trail: Arc::new(Mutex::new(Vec::new())),
            last_options: Mutex::new(None),
        }
    }

    pub fn trail(&self) -> Vec<String> {
        self.trail.lock().unwrap().clone()
    }

    pub fn shared_trail(&self) -> Trail {
        self.trail.clone()
    }

    pub fn last_options(&self) -> Option<TxOptions> {
        *self.last_options.lock().unwrap()
    }
}

#[async_trait]
impl Executor for FakePool {
    async fn execute<'q>(&self, _: PgQuery<'q>) -> Result<PgQueryResult, TxError> {
        self.counters.pool_queries.fetch_add(1, Ordering::SeqCst);
        self.trail.lock().unwrap().push("pool".into());
        Ok(PgQueryResult::default())
    }

    async fn fetch_all<'q>(&self, _: PgQuery<'q>) -> Result<Vec<PgRow>, TxError> {
        self.counters.pool_queries.fetch_add(1, Ordering::SeqCst);
        self.trail.lock().unwrap().push("pool".into());
        Ok(Vec::new())
    }

    async fn fetch_optional<'q>(&self, _: PgQuery<'q>) -> Result<Option<PgRow>, TxError> {
        self.counters.pool_queries.fetch_add(1, Ordering::SeqCst);
        self.trail.lock().unwrap().push("pool".into());
        Ok(None)
    }

    fn in_transaction(&self) -> bool {
        false
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    async fn begin(&self, opts: &TxOptions) -> Result<Box<dyn DbTransaction>, sqlx::Error> {
        *self.last_options.lock().unwrap() = Some(*opts);
        if self.behavior.fail_begin {
            return Err(sqlx::Error::PoolTimedOut);
        }

        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTx {
            counters: self.counters.clone(),
            behavior: self.behavior,
            trail: self.trail.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }

    async fn close(&self) {}
}

pub struct FakeTx {
    counters: Arc<Counters>,
    behavior: Behavior,
    trail: Trail,
}

impl FakeTx {
    fn record_query(&self) {
        self.counters.tx_queries.fetch_add(1, Ordering::SeqCst);
        self.trail.lock().unwrap().push("tx".into());
    }
}

#[async_trait]
impl DbTransaction for FakeTx {
    async fn execute<'q>(&mut self, _: PgQuery<'q>) -> Result<PgQueryResult, sqlx::Error> {
        self.record_query();
        Ok(PgQueryResult::default())
    }

    async fn fetch_all<'q>(&mut self, _: PgQuery<'q>) -> Result<Vec<PgRow>, sqlx::Error> {
        self.record_query();
        Ok(Vec::new())
    }

    async fn fetch_optional<'q>(
        &mut self,
        _: PgQuery<'q>,
    ) -> Result<Option<PgRow>, sqlx::Error> {
        self.record_query();
        Ok(None)
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_commit {
            return Err(sqlx::Error::Protocol("commit refused".into()));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_rollback {
            return Err(sqlx::Error::Protocol("rollback refused".into()));
        }
        Ok(())
    }
}

/// Executor wrapper that appends its label to the trail before delegating.
pub struct Labeled {
    label: &'static str,
    trail: Trail,
    inner: Arc<dyn Executor>,
}

#[async_trait]
impl Executor for Labeled {
    async fn execute<'q>(&self, query: PgQuery<'q>) -> Result<PgQueryResult, TxError> {
        self.trail.lock().unwrap().push(self.label.into());
        self.inner.execute(query).await
    }

    async fn fetch_all<'q>(&self, query: PgQuery<'q>) -> Result<Vec<PgRow>, TxError> {
        self.trail.lock().unwrap().push(self.label.into());
        self.inner.fetch_all(query).await
    }

    async fn fetch_optional<'q>(&self, query: PgQuery<'q>) -> Result<Option<PgRow>, TxError> {
        self.trail.lock().unwrap().push(self.label.into());
        self.inner.fetch_optional(query).await
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

pub fn labeled(label: &'static str, trail: Trail) -> Decorator {
    decorator(move |inner| {
        Arc::new(Labeled {
            label,
            trail: trail.clone(),
            inner,
        })
    })
}

/// Error type of a service built on top of the manager.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error(transparent)]
    Tx(#[from] TxError),
}
