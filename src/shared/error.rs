//! Error Types
//!
//! `TxError` covers everything the transaction core can report.
//! `AppError` is the top-level error used during startup.

/// Errors produced by the connection pool, the scope carrier and the manager.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// No transaction could be resolved from the scope.
    #[error("transaction not found in scope")]
    NotFound,

    /// Pool construction, liveness probe or transaction begin failed.
    #[error("connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("error while committing transaction: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("error while rolling back transaction: {0}")]
    Rollback(#[source] sqlx::Error),

    /// A panic raised by a unit of work, converted into an error.
    #[error("recovered after panic in transaction: {message}")]
    Panicked { message: String, backtrace: String },

    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),

    /// The handle was already committed or rolled back.
    #[error("transaction already committed or rolled back")]
    Finalized,

    /// The scope deadline passed before or during a begin or query. A commit
    /// past the deadline is reported as [`TxError::Commit`] instead.
    #[error("scope deadline exceeded")]
    DeadlineExceeded,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("migrations are not set up, call setup() first")]
    MigrationNotConfigured,
}

impl TxError {
    /// Whether this error was produced by a recovered panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, TxError::Panicked { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TxError::NotFound)
    }

    /// Whether the scope deadline cut this operation short, including a
    /// commit that was rolled back because the deadline had passed.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            TxError::DeadlineExceeded => true,
            TxError::Commit(sqlx::Error::Io(e)) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Underlying driver error, if any.
    pub fn driver_error(&self) -> Option<&sqlx::Error> {
        match self {
            TxError::Connection(e)
            | TxError::Commit(e)
            | TxError::Rollback(e)
            | TxError::Query(e) => Some(e),
            _ => None,
        }
    }
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Transaction error: {0}")]
    Tx(#[from] TxError),
}
