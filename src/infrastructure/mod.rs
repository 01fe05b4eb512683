//! Infrastructure Layer
//!
//! - Database pool, transaction carrier and manager (PostgreSQL)
//! - Prometheus metrics

pub mod database;
pub mod metrics;
