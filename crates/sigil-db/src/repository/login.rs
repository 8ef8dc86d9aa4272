//! Postgres implementation of [`LoginHistoryRepository`].

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use sigil_core::repository::LoginHistoryRepository;
use sigil_core::{LoginHistory, Result};

use crate::error::DbError;
use crate::repository::{SharedTx, fetch_all, fetch_optional, map_unique};

#[derive(Debug, sqlx::FromRow)]
struct LoginRow {
    token_id: String,
    user_id: String,
    is_revoked: bool,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LoginRow> for LoginHistory {
    fn from(row: LoginRow) -> Self {
        LoginHistory {
            token_id: row.token_id,
            user_id: row.user_id,
            is_revoked: row.is_revoked,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgLoginHistoryRepository {
    pub(crate) pool: PgPool,
    pub(crate) tx: Option<SharedTx>,
}

impl PgLoginHistoryRepository {
    pub(crate) fn new(pool: PgPool, tx: Option<SharedTx>) -> Self {
        Self { pool, tx }
    }
}

impl LoginHistoryRepository for PgLoginHistoryRepository {
    async fn by_user_id(&self, user_id: &str, limit: i64, offset: i64) -> Result<Vec<LoginHistory>> {
        let query = sqlx::query_as::<_, LoginRow>(
            "SELECT * FROM login_history
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset);

        let rows = fetch_all!(self, query).map_err(DbError::from)?;
        Ok(rows.into_iter().map(LoginHistory::from).collect())
    }

    async fn create(&self, login: LoginHistory) -> Result<LoginHistory> {
        let query = sqlx::query_as::<_, LoginRow>(
            "INSERT INTO login_history (token_id, user_id, is_revoked, expires_at)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(&login.token_id)
        .bind(&login.user_id)
        .bind(login.is_revoked)
        .bind(login.expires_at);

        let row = fetch_optional!(self, query)
            .map_err(map_unique("login"))?
            .ok_or_else(|| DbError::not_found("login", &login.token_id))?;
        Ok(row.into())
    }

    async fn get_for_update(&self, token_id: &str) -> Result<LoginHistory> {
        if self.tx.is_none() {
            return Err(DbError::NoTransaction.into());
        }

        let query = sqlx::query_as::<_, LoginRow>(
            "SELECT * FROM login_history WHERE token_id = $1 FOR UPDATE",
        )
        .bind(token_id);

        let row = fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("login", token_id))?;
        Ok(row.into())
    }

    async fn update(&self, login: &LoginHistory) -> Result<LoginHistory> {
        let query = sqlx::query_as::<_, LoginRow>(
            "UPDATE login_history SET
                is_revoked = $2, expires_at = $3, updated_at = now()
             WHERE token_id = $1
             RETURNING *",
        )
        .bind(&login.token_id)
        .bind(login.is_revoked)
        .bind(login.expires_at);

        let row = fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("login", &login.token_id))?;
        Ok(row.into())
    }
}
