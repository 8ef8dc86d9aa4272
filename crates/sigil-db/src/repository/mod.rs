//! Postgres repository implementations.
//!
//! Each repository holds the pool plus an optional shared transaction
//! handle. A transaction-bound repository routes every query through
//! the transaction; once the owning manager commits or rolls back,
//! further use fails with [`DbError::TransactionClosed`].

use std::sync::Arc;

use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;

mod device;
mod login;
mod manager;
mod user;

pub use device::PgDeviceRepository;
pub use login::PgLoginHistoryRepository;
pub use manager::PgRepositoryManager;
pub use user::PgUserRepository;

pub(crate) type SharedTx = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// Run a query's `fetch_optional` against the bound transaction, or
/// the pool when none is bound.
macro_rules! fetch_optional {
    ($repo:expr, $query:expr) => {{
        match &$repo.tx {
            Some(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard
                    .as_mut()
                    .ok_or(crate::error::DbError::TransactionClosed)?;
                $query.fetch_optional(&mut **tx).await
            }
            None => $query.fetch_optional(&$repo.pool).await,
        }
    }};
}

macro_rules! fetch_all {
    ($repo:expr, $query:expr) => {{
        match &$repo.tx {
            Some(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard
                    .as_mut()
                    .ok_or(crate::error::DbError::TransactionClosed)?;
                $query.fetch_all(&mut **tx).await
            }
            None => $query.fetch_all(&$repo.pool).await,
        }
    }};
}

macro_rules! execute {
    ($repo:expr, $query:expr) => {{
        match &$repo.tx {
            Some(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard
                    .as_mut()
                    .ok_or(crate::error::DbError::TransactionClosed)?;
                $query.execute(&mut **tx).await
            }
            None => $query.execute(&$repo.pool).await,
        }
    }};
}

pub(crate) use {execute, fetch_all, fetch_optional};

/// Map a unique-constraint violation onto a conflict for `entity`,
/// passing other errors through.
pub(crate) fn map_unique(
    entity: &'static str,
) -> impl FnOnce(sqlx::Error) -> crate::error::DbError {
    move |err| match &err {
        sqlx::Error::Database(db)
            if db.kind() == sqlx::error::ErrorKind::UniqueViolation =>
        {
            crate::error::DbError::Conflict(entity)
        }
        _ => crate::error::DbError::from(err),
    }
}
