//! Executor Resolution Tests

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tx_manager::infrastructure::database::{metrics_decorator, tracing_decorator};
use tx_manager::{Scope, TxError, TxManager, TxOptions};

use crate::common::{labeled, FakePool};

#[tokio::test]
async fn test_conn_without_transaction_uses_decorated_pool() {
    let pool = Arc::new(FakePool::new());
    let trail = pool.shared_trail();
    let manager = TxManager::new(
        pool.clone(),
        vec![labeled("first", trail.clone()), labeled("second", trail)],
    );

    let conn = manager.conn(&Scope::new());
    assert!(!conn.in_transaction());
    conn.execute(sqlx::query("SELECT 1")).await.unwrap();

    // The last registered decorator is the outermost layer.
    assert_eq!(pool.trail(), vec!["second", "first", "pool"]);
    assert_eq!(pool.counters.pool_queries(), 1);
    assert_eq!(pool.counters.begins(), 0);
}

#[tokio::test]
async fn test_conn_inside_run_uses_transaction() {
    let pool = Arc::new(FakePool::new());
    let trail = pool.shared_trail();
    let manager = TxManager::new(pool.clone(), vec![labeled("audit", trail)]);

    manager
        .run(&Scope::new(), |scope| {
            let manager = &manager;
            async move {
                let conn = manager.conn(&scope);
                assert!(conn.in_transaction());
                conn.execute(sqlx::query("UPDATE accounts SET balance = 0"))
                    .await?;
                conn.fetch_all(sqlx::query("SELECT * FROM accounts")).await?;
                Ok::<_, TxError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(pool.trail(), vec!["audit", "tx", "audit", "tx"]);
    assert_eq!(pool.counters.tx_queries(), 2);
    assert_eq!(pool.counters.pool_queries(), 0);
}

#[tokio::test]
async fn test_conn_falls_back_to_pool_after_commit() {
    let pool = Arc::new(FakePool::new());
    let manager = TxManager::new(pool.clone(), Vec::new());
    let scope = manager.start_tx(&Scope::new(), &TxOptions::default()).await.unwrap();

    manager.commit(&scope).await.unwrap();

    let conn = manager.conn(&scope);
    assert!(!conn.in_transaction());
    conn.execute(sqlx::query("SELECT 1")).await.unwrap();
    assert_eq!(pool.counters.pool_queries(), 1);
}

#[tokio::test]
async fn test_executor_kept_past_commit_reports_finalized() {
    let pool = Arc::new(FakePool::new());
    let manager = TxManager::new(pool.clone(), Vec::new());

    let leaked = manager
        .run(&Scope::new(), |scope| {
            let manager = &manager;
            async move { Ok::<_, TxError>(manager.conn(&scope)) }
        })
        .await
        .unwrap();

    let err = leaked.execute(sqlx::query("SELECT 1")).await.unwrap_err();
    assert!(matches!(err, TxError::Finalized));
    assert_eq!(pool.counters.tx_queries(), 0);
}

#[tokio::test]
async fn test_fetch_one_without_rows_is_row_not_found() {
    let pool = Arc::new(FakePool::new());
    let manager = TxManager::new(pool, vec![tracing_decorator(), metrics_decorator()]);

    let err = manager
        .conn(&Scope::new())
        .fetch_one(sqlx::query("SELECT 1 WHERE false"))
        .await
        .unwrap_err();

    assert!(matches!(err, TxError::Query(sqlx::Error::RowNotFound)));
}
