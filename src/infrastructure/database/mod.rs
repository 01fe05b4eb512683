//! Database Module
//!
//! PostgreSQL connection pool, scope-carried transactions and the
//! transaction manager.

pub mod config;
pub mod decorator;
pub mod executor;
pub mod manager;
pub mod migration;
pub mod pool;
pub mod scope;

pub use config::{DbConfig, PoolConfig};
pub use decorator::{decorator, metrics_decorator, tracing_decorator, Decorator};
pub use executor::{DbTransaction, Executor, IsolationLevel, PgQuery, TxOptions};
pub use manager::{manager, setup, TxManager};
pub use migration::MigrationRunner;
pub use pool::{connect, ConnectionPool, PgConnectionPool};
pub use scope::{Scope, TxHandle};
