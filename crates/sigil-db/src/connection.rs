//! Postgres connection management.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::DbError;

/// Configuration for the relational store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Postgres DSN.
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/sigil".into(),
            max_connections: 10,
        }
    }
}

/// Open a connection pool to Postgres.
pub async fn connect_postgres(config: &DbConfig) -> Result<PgPool, DbError> {
    info!(max_connections = config.max_connections, "connecting to Postgres");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    Ok(pool)
}
