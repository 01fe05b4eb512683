//! # Tx Manager
//!
//! Ambient transaction management over a pooled PostgreSQL connection:
//! - `TxManager::run` starts a transaction or joins the one in progress
//! - commit on success, rollback on error or panic
//! - `TxManager::conn` gives query code the right executor for its scope
//!
//! ## Module Structure
//!
//! ```text
//! tx_manager/
//! +-- config/          Configuration management
//! +-- infrastructure/  Connection pool, transactions, metrics
//! +-- shared/          Error types
//! ```

// Configuration module
pub mod config;

// Infrastructure layer - Database and metrics
pub mod infrastructure;

// Shared utilities
pub mod shared;

// Application startup
pub mod startup;

// Telemetry and observability
pub mod telemetry;

pub use infrastructure::database::{
    connect, manager, setup, ConnectionPool, DbConfig, Decorator, Executor, PoolConfig, Scope,
    TxHandle, TxManager, TxOptions,
};
pub use shared::error::TxError;
