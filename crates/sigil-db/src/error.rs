//! Database-specific error types and conversions.

use sigil_core::Error;

/// Storage-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("operation requires an active transaction")]
    NoTransaction,

    #[error("transaction already completed")]
    TransactionClosed,

    #[error("row decode failed: {0}")]
    Decode(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => Error::NotFound { entity, id },
            DbError::Conflict(entity) => Error::bad_request(format!("{entity} already exists")),
            DbError::NoTransaction => Error::internal("operation requires an active transaction"),
            DbError::TransactionClosed => Error::internal("transaction already completed"),
            other => Error::Database(other.to_string()),
        }
    }
}
