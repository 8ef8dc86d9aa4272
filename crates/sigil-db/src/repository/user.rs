//! Postgres implementation of [`UserRepository`].

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use ulid::Ulid;

use sigil_core::repository::{IdentityField, UserRepository};
use sigil_core::{Result, User};

use crate::error::DbError;
use crate::repository::{SharedTx, fetch_optional, map_unique};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    phone: Option<String>,
    email: Option<String>,
    password: String,
    tfa_secret: String,
    is_code_allowed: bool,
    is_totp_allowed: bool,
    is_device_allowed: bool,
    is_email_otp_allowed: bool,
    is_phone_otp_allowed: bool,
    is_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            phone: row.phone,
            email: row.email,
            password: row.password,
            tfa_secret: row.tfa_secret,
            is_code_allowed: row.is_code_allowed,
            is_totp_allowed: row.is_totp_allowed,
            is_device_allowed: row.is_device_allowed,
            is_email_otp_allowed: row.is_email_otp_allowed,
            is_phone_otp_allowed: row.is_phone_otp_allowed,
            is_verified: row.is_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pub(crate) pool: PgPool,
    pub(crate) tx: Option<SharedTx>,
}

impl PgUserRepository {
    pub(crate) fn new(pool: PgPool, tx: Option<SharedTx>) -> Self {
        Self { pool, tx }
    }
}

impl UserRepository for PgUserRepository {
    async fn by_id(&self, id: &str) -> Result<User> {
        let query = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1").bind(id);

        let row = fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("user", id))?;
        Ok(row.into())
    }

    async fn by_identity(&self, field: IdentityField, value: &str) -> Result<User> {
        let sql = match field {
            IdentityField::Id => "SELECT * FROM users WHERE id = $1",
            IdentityField::Phone => "SELECT * FROM users WHERE phone = $1",
            IdentityField::Email => "SELECT * FROM users WHERE email = $1",
        };
        let query = sqlx::query_as::<_, UserRow>(sql).bind(value);

        let row = fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("user", value))?;
        Ok(row.into())
    }

    async fn get_for_update(&self, id: &str) -> Result<User> {
        if self.tx.is_none() {
            return Err(DbError::NoTransaction.into());
        }

        let query =
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1 FOR UPDATE").bind(id);

        let row = fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("user", id))?;
        Ok(row.into())
    }

    async fn create(&self, user: User) -> Result<User> {
        let id = Ulid::new().to_string();
        let query = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (
                id, phone, email, password, tfa_secret,
                is_code_allowed, is_totp_allowed, is_device_allowed,
                is_email_otp_allowed, is_phone_otp_allowed, is_verified
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING *",
        )
        .bind(&id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.password)
        .bind(&user.tfa_secret)
        .bind(user.is_code_allowed)
        .bind(user.is_totp_allowed)
        .bind(user.is_device_allowed)
        .bind(user.is_email_otp_allowed)
        .bind(user.is_phone_otp_allowed)
        .bind(user.is_verified);

        let row = fetch_optional!(self, query)
            .map_err(map_unique("user"))?
            .ok_or_else(|| DbError::not_found("user", id))?;
        Ok(row.into())
    }

    async fn re_create(&self, user: User) -> Result<User> {
        let new_id = Ulid::new().to_string();
        let query = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET
                id = $2, phone = $3, email = $4, password = $5,
                tfa_secret = $6, is_email_otp_allowed = $7,
                is_phone_otp_allowed = $8, is_verified = FALSE,
                created_at = now(), updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(&user.id)
        .bind(&new_id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.password)
        .bind(&user.tfa_secret)
        .bind(user.is_email_otp_allowed)
        .bind(user.is_phone_otp_allowed);

        let row = fetch_optional!(self, query)
            .map_err(map_unique("user"))?
            .ok_or_else(|| DbError::not_found("user", &user.id))?;
        Ok(row.into())
    }

    async fn update(&self, user: &User) -> Result<User> {
        let query = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET
                phone = $2, email = $3, password = $4, tfa_secret = $5,
                is_code_allowed = $6, is_totp_allowed = $7,
                is_device_allowed = $8, is_email_otp_allowed = $9,
                is_phone_otp_allowed = $10, is_verified = $11,
                updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(&user.id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.password)
        .bind(&user.tfa_secret)
        .bind(user.is_code_allowed)
        .bind(user.is_totp_allowed)
        .bind(user.is_device_allowed)
        .bind(user.is_email_otp_allowed)
        .bind(user.is_phone_otp_allowed)
        .bind(user.is_verified);

        let row = fetch_optional!(self, query)
            .map_err(map_unique("user"))?
            .ok_or_else(|| DbError::not_found("user", &user.id))?;
        Ok(row.into())
    }
}
