//! Transaction carrier.
//!
//! A [`Scope`] is threaded explicitly through every call that may need
//! transactional access. Deriving a scope never mutates its parent.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgQueryResult, PgRow};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::executor::{DbTransaction, PgQuery};
use crate::shared::error::TxError;

/// Shared reference to one open transaction.
///
/// Cloning is cheap; all clones refer to the same transaction. Once the
/// transaction is committed or rolled back the handle stops resolving from
/// any scope.
#[derive(Clone)]
pub struct TxHandle {
    inner: Arc<TxSlot>,
}

struct TxSlot {
    id: Uuid,
    started_at: Instant,
    active: AtomicBool,
    tx: Mutex<Option<Box<dyn DbTransaction>>>,
}

impl TxHandle {
    pub fn new(tx: Box<dyn DbTransaction>) -> Self {
        Self {
            inner: Arc::new(TxSlot {
                id: Uuid::new_v4(),
                started_at: Instant::now(),
                active: AtomicBool::new(true),
                tx: Mutex::new(Some(tx)),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn started_at(&self) -> Instant {
        self.inner.started_at
    }

    /// False once the transaction was committed or rolled back.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same transaction.
    pub fn same_as(&self, other: &TxHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Take the transaction out for its terminal action. Only the first
    /// caller gets it.
    pub(crate) async fn finalize(&self) -> Option<Box<dyn DbTransaction>> {
        let mut slot = self.inner.tx.lock().await;
        self.inner.active.store(false, Ordering::Release);
        slot.take()
    }

    pub(crate) async fn execute(&self, query: PgQuery<'_>) -> Result<PgQueryResult, TxError> {
        let mut slot = self.inner.tx.lock().await;
        let tx = slot.as_mut().ok_or(TxError::Finalized)?;
        Ok(tx.execute(query).await?)
    }

    pub(crate) async fn fetch_all(&self, query: PgQuery<'_>) -> Result<Vec<PgRow>, TxError> {
        let mut slot = self.inner.tx.lock().await;
        let tx = slot.as_mut().ok_or(TxError::Finalized)?;
        Ok(tx.fetch_all(query).await?)
    }

    pub(crate) async fn fetch_optional(
        &self,
        query: PgQuery<'_>,
    ) -> Result<Option<PgRow>, TxError> {
        let mut slot = self.inner.tx.lock().await;
        let tx = slot.as_mut().ok_or(TxError::Finalized)?;
        Ok(tx.fetch_optional(query).await?)
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Execution context carrying at most one transaction and an optional deadline.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    tx: Option<TxHandle>,
    deadline: Option<Instant>,
}

impl Scope {
    /// A scope with no transaction and no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a scope resolving to `handle`. Shadows any handle already present.
    pub fn with_tx(&self, handle: TxHandle) -> Self {
        Self {
            tx: Some(handle),
            deadline: self.deadline,
        }
    }

    /// Derive a scope with the transaction explicitly cleared.
    pub fn without_tx(&self) -> Self {
        Self {
            tx: None,
            deadline: self.deadline,
        }
    }

    /// Resolve the carried transaction.
    ///
    /// Fails with [`TxError::NotFound`] when nothing was injected, the handle
    /// was cleared, or it has already been finalized.
    pub fn tx(&self) -> Result<TxHandle, TxError> {
        self.tx
            .as_ref()
            .filter(|h| h.is_active())
            .cloned()
            .ok_or(TxError::NotFound)
    }

    pub fn has_tx(&self) -> bool {
        self.tx.as_ref().is_some_and(TxHandle::is_active)
    }

    /// Derive a scope bounded by `deadline`. An earlier deadline already on
    /// the scope is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            tx: self.tx.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Run a driver call, failing with [`TxError::DeadlineExceeded`] if the
/// deadline has passed before or during the call.
pub(crate) async fn bounded<T, F>(deadline: Option<Instant>, fut: F) -> Result<T, TxError>
where
    F: Future<Output = Result<T, TxError>>,
{
    match deadline {
        None => fut.await,
        Some(deadline) if Instant::now() >= deadline => Err(TxError::DeadlineExceeded),
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| TxError::DeadlineExceeded)?,
    }
}
