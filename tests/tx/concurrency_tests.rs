//! Concurrency Tests
//!
//! Independent scopes running in parallel must each get their own
//! transaction and never observe another task's.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use tx_manager::{Scope, TxError, TxManager};

use crate::common::FakePool;

const TASKS: usize = 10;
const RUNS_PER_TASK: usize = 100;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_runs_are_isolated() {
    let pool = Arc::new(FakePool::new());
    let manager = Arc::new(TxManager::new(pool.clone(), Vec::new()));
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let manager = manager.clone();
        let seen = seen.clone();

        handles.push(tokio::spawn(async move {
            let root = Scope::new();
            for _ in 0..RUNS_PER_TASK {
                let inner_manager = manager.clone();
                let seen = seen.clone();
                manager
                    .run(&root, |scope| async move {
                        let id = scope.tx()?.id();
                        assert!(seen.lock().unwrap().insert(id), "transaction reused");

                        let conn = inner_manager.conn(&scope);
                        assert!(conn.in_transaction());
                        conn.execute(sqlx::query("INSERT INTO events DEFAULT VALUES"))
                            .await?;
                        tokio::task::yield_now().await;

                        // Still the same transaction after yielding to other tasks.
                        assert_eq!(scope.tx()?.id(), id);
                        Ok::<_, TxError>(())
                    })
                    .await
                    .unwrap();
                assert!(!root.has_tx());
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let total = TASKS * RUNS_PER_TASK;
    assert_eq!(pool.counters.begins(), total);
    assert_eq!(pool.counters.commits(), total);
    assert_eq!(pool.counters.rollbacks(), 0);
    assert_eq!(pool.counters.tx_queries(), total);
    assert_eq!(pool.counters.pool_queries(), 0);
    assert_eq!(seen.lock().unwrap().len(), total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_in_one_task_do_not_affect_others() {
    let pool = Arc::new(FakePool::new());
    let manager = Arc::new(TxManager::new(pool.clone(), Vec::new()));

    let mut handles = Vec::new();
    for task in 0..TASKS {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .run(&Scope::new(), |_| async move {
                    tokio::task::yield_now().await;
                    if task % 2 == 0 {
                        Err(TxError::NotFound)
                    } else {
                        Ok(())
                    }
                })
                .await
        }));
    }

    let mut failed = 0;
    for handle in handles {
        if handle.await.unwrap().is_err() {
            failed += 1;
        }
    }

    assert_eq!(failed, TASKS / 2);
    assert_eq!(pool.counters.commits(), TASKS / 2);
    assert_eq!(pool.counters.rollbacks(), TASKS / 2);
}
