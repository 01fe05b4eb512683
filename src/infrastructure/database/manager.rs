//! Transaction Manager
//!
//! Runs units of work inside a transaction carried by a [`Scope`], joining
//! the transaction already in progress when there is one.
//!
//! ```rust,ignore
//! manager
//!     .run(&scope, |scope| async move {
//!         let conn = manager.conn(&scope);
//!         conn.execute(sqlx::query("UPDATE accounts SET balance = balance - $1 WHERE id = $2")
//!             .bind(amount)
//!             .bind(from))
//!             .await?;
//!         ledger.append(&scope, entry).await?;
//!         Ok::<_, TxError>(())
//!     })
//!     .await?;
//! ```

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use once_cell::sync::OnceCell;

use super::decorator::{self, Decorator};
use super::executor::{Executor, PoolExecutor, TxExecutor, TxOptions};
use super::pool::ConnectionPool;
use super::scope::{bounded, Scope, TxHandle};
use crate::infrastructure::metrics;
use crate::shared::error::TxError;

static MANAGER: OnceCell<TxManager> = OnceCell::new();

/// Install the process-wide manager. Only the first call has any effect;
/// later calls return the manager built by the first one.
pub fn setup(pool: Arc<dyn ConnectionPool>, decorators: Vec<Decorator>) -> &'static TxManager {
    let mut installed = false;
    let manager = MANAGER.get_or_init(|| {
        installed = true;
        TxManager::new(pool, decorators)
    });

    if !installed {
        tracing::debug!("Transaction manager already set up, ignoring new configuration");
    }
    manager
}

/// The process-wide manager, if [`setup`] has been called.
pub fn manager() -> Option<&'static TxManager> {
    MANAGER.get()
}

/// Coordinates transactions over a connection pool.
pub struct TxManager {
    pool: Arc<dyn ConnectionPool>,
    decorators: Vec<Decorator>,
}

impl TxManager {
    pub fn new(pool: Arc<dyn ConnectionPool>, decorators: Vec<Decorator>) -> Self {
        Self { pool, decorators }
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Begin a transaction and return a scope carrying it.
    ///
    /// If `scope` already carries a transaction it is returned unchanged.
    pub async fn start_tx(&self, scope: &Scope, opts: &TxOptions) -> Result<Scope, TxError> {
        if scope.has_tx() {
            return Ok(scope.clone());
        }

        let tx = bounded(scope.deadline(), async {
            self.pool.begin(opts).await.map_err(TxError::Connection)
        })
        .await?;

        let handle = TxHandle::new(tx);
        tracing::debug!(tx_id = %handle.id(), ?opts, "Transaction started");

        Ok(scope.with_tx(handle))
    }

    /// Commit the transaction carried by `scope`.
    ///
    /// The commit is bounded by the scope deadline. When the deadline has
    /// passed, the transaction is rolled back instead and the commit fails
    /// with a timed-out [`TxError::Commit`].
    pub async fn commit(&self, scope: &Scope) -> Result<(), TxError> {
        let handle = scope.tx()?;
        let mut tx = handle.finalize().await.ok_or(TxError::NotFound)?;

        let committed = bounded(scope.deadline(), async {
            tx.commit().await.map_err(TxError::Commit)
        })
        .await;

        let result = match committed {
            Err(TxError::DeadlineExceeded) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(
                        tx_id = %handle.id(),
                        error = %e,
                        "Rollback after commit timeout failed"
                    );
                }
                Err(TxError::Commit(deadline_elapsed()))
            }
            other => other,
        };

        let outcome = match &result {
            Ok(()) => "committed",
            Err(_) => "commit_failed",
        };
        finished(&handle, outcome);

        result
    }

    /// Roll back the transaction carried by `scope`.
    ///
    /// Not bounded by the scope deadline: the rollback always reaches the
    /// driver.
    pub async fn rollback(&self, scope: &Scope) -> Result<(), TxError> {
        let handle = scope.tx()?;
        let mut tx = handle.finalize().await.ok_or(TxError::NotFound)?;

        let result = tx.rollback().await.map_err(TxError::Rollback);

        let outcome = match &result {
            Ok(()) => "rolled_back",
            Err(_) => "rollback_failed",
        };
        finished(&handle, outcome);

        result
    }

    /// Executor for issuing queries in `scope`.
    ///
    /// Resolves to the carried transaction when there is one, otherwise to
    /// the pool, and wraps it with every decorator in registration order.
    pub fn conn(&self, scope: &Scope) -> Arc<dyn Executor> {
        let base: Arc<dyn Executor> = match scope.tx() {
            Ok(handle) => Arc::new(TxExecutor::new(handle, scope.deadline())),
            Err(_) => Arc::new(PoolExecutor::new(self.pool.clone(), scope.deadline())),
        };

        decorator::apply(&self.decorators, base)
    }

    /// Run `f` in a transaction with database default options.
    ///
    /// See [`TxManager::run_with`].
    pub async fn run<F, Fut, T, E>(&self, scope: &Scope, f: F) -> Result<T, E>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError>,
    {
        self.run_with(scope, &TxOptions::default(), f).await
    }

    /// Run `f` in a transaction.
    ///
    /// When `scope` already carries a transaction, `f` joins it and its
    /// result is returned as is: nested calls share the outermost boundary
    /// and there are no savepoints. A failure in a nested call therefore
    /// rolls back everything done in the outer transaction, including work
    /// of sibling calls that already returned `Ok`.
    ///
    /// Otherwise a transaction is started with `opts`; it is committed when
    /// `f` returns `Ok` and rolled back when `f` returns `Err` or panics. A
    /// panic is returned as [`TxError::Panicked`]. A failed rollback never
    /// replaces the original error.
    pub async fn run_with<F, Fut, T, E>(&self, scope: &Scope, opts: &TxOptions, f: F) -> Result<T, E>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError>,
    {
        if scope.has_tx() {
            return f(scope.clone()).await;
        }

        let tx_scope = self.start_tx(scope, opts).await?;

        let unit_scope = tx_scope.clone();
        let outcome = AssertUnwindSafe(async move { f(unit_scope).await })
            .catch_unwind()
            .await;

        match outcome {
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let backtrace = Backtrace::force_capture().to_string();
                self.rollback_quietly(&tx_scope).await;

                tracing::error!(panic = %message, "Recovered after panic in transaction");
                Err(TxError::Panicked { message, backtrace }.into())
            }
            Ok(Err(e)) => {
                self.rollback_quietly(&tx_scope).await;
                Err(e)
            }
            Ok(Ok(value)) => {
                self.commit(&tx_scope).await?;
                Ok(value)
            }
        }
    }

    async fn rollback_quietly(&self, scope: &Scope) {
        if let Err(e) = self.rollback(scope).await {
            tracing::warn!(error = %e, "Rollback failed, reporting the original error");
        }
    }
}

fn finished(handle: &TxHandle, outcome: &str) {
    let elapsed = handle.started_at().elapsed();
    metrics::record_transaction(outcome, elapsed.as_secs_f64());
    tracing::debug!(tx_id = %handle.id(), outcome, ?elapsed, "Transaction finished");
}

fn deadline_elapsed() -> sqlx::Error {
    sqlx::Error::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        "scope deadline exceeded before commit completed",
    ))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
