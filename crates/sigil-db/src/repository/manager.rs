//! Postgres repository manager with atomic properties.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Mutex;

use sigil_core::Result;
use sigil_core::repository::RepositoryManager;

use crate::error::DbError;
use crate::repository::{PgDeviceRepository, PgLoginHistoryRepository, PgUserRepository, SharedTx};

/// Manages repositories over a shared Postgres pool.
///
/// `with_transaction` returns a child manager whose repositories all
/// route through one interactive transaction. The child is single-use:
/// after `commit` or `rollback` every further operation fails. An
/// uncommitted transaction rolls back when the child is dropped.
#[derive(Debug, Clone)]
pub struct PgRepositoryManager {
    pool: PgPool,
    tx: Option<SharedTx>,
    users: PgUserRepository,
    devices: PgDeviceRepository,
    logins: PgLoginHistoryRepository,
}

impl PgRepositoryManager {
    pub fn new(pool: PgPool) -> Self {
        Self::build(pool, None)
    }

    fn build(pool: PgPool, tx: Option<SharedTx>) -> Self {
        Self {
            users: PgUserRepository::new(pool.clone(), tx.clone()),
            devices: PgDeviceRepository::new(pool.clone(), tx.clone()),
            logins: PgLoginHistoryRepository::new(pool.clone(), tx.clone()),
            pool,
            tx,
        }
    }

    async fn take_tx(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>> {
        let shared = self.tx.as_ref().ok_or(DbError::NoTransaction)?;
        let tx = shared.lock().await.take().ok_or(DbError::TransactionClosed)?;
        Ok(tx)
    }
}

impl RepositoryManager for PgRepositoryManager {
    type Users = PgUserRepository;
    type Devices = PgDeviceRepository;
    type Logins = PgLoginHistoryRepository;

    fn user(&self) -> &Self::Users {
        &self.users
    }

    fn device(&self) -> &Self::Devices {
        &self.devices
    }

    fn login_history(&self) -> &Self::Logins {
        &self.logins
    }

    async fn with_transaction(&self) -> Result<Self> {
        let tx = self.pool.begin().await.map_err(DbError::from)?;
        Ok(Self::build(
            self.pool.clone(),
            Some(Arc::new(Mutex::new(Some(tx)))),
        ))
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.take_tx().await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.take_tx().await?;
        tx.rollback().await.map_err(DbError::from)?;
        Ok(())
    }
}
