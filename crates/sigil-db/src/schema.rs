//! Schema definitions and migration runner.
//!
//! Migrations are applied in version order inside individual
//! transactions and tracked in the `_migration` table.

use sqlx::PgPool;
use tracing::info;

use crate::error::DbError;

const MIGRATION_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS _migration (
    version INT PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

const SCHEMA_V1: &str = "\
CREATE TABLE users (
    id TEXT PRIMARY KEY,
    phone TEXT UNIQUE,
    email TEXT UNIQUE,
    password TEXT NOT NULL DEFAULT '',
    tfa_secret TEXT NOT NULL DEFAULT '',
    is_code_allowed BOOLEAN NOT NULL DEFAULT FALSE,
    is_totp_allowed BOOLEAN NOT NULL DEFAULT FALSE,
    is_device_allowed BOOLEAN NOT NULL DEFAULT FALSE,
    is_email_otp_allowed BOOLEAN NOT NULL DEFAULT FALSE,
    is_phone_otp_allowed BOOLEAN NOT NULL DEFAULT FALSE,
    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE devices (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users (id)
        ON UPDATE CASCADE ON DELETE CASCADE,
    client_id BYTEA NOT NULL,
    public_key BYTEA NOT NULL,
    aaguid BYTEA NOT NULL DEFAULT '\\x',
    name TEXT NOT NULL,
    sign_count BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (user_id, client_id)
);

CREATE INDEX idx_devices_user_id ON devices (user_id);

CREATE TABLE login_history (
    token_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users (id)
        ON UPDATE CASCADE ON DELETE CASCADE,
    is_revoked BOOLEAN NOT NULL DEFAULT FALSE,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_login_history_user_id
    ON login_history (user_id, created_at DESC);
";

/// Apply any migrations newer than the recorded schema version.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query(MIGRATION_TABLE_DDL).execute(pool).await?;

    let current: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM _migration")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;

        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{}: {e}", migration.name)))?;

        sqlx::query("INSERT INTO _migration (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
    }

    Ok(())
}
