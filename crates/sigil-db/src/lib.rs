//! SIGIL Database — Postgres repository implementations, the
//! transactional repository manager, the Redis key-value store, and
//! in-memory counterparts for tests and development.

pub mod connection;
pub mod error;
pub mod kv;
pub mod memory;
pub mod repository;
pub mod schema;

pub use connection::{DbConfig, connect_postgres};
pub use error::DbError;
pub use kv::RedisKeyValueStore;
pub use memory::{MemoryKeyValueStore, MemoryRepositoryManager};
pub use repository::{
    PgDeviceRepository, PgLoginHistoryRepository, PgRepositoryManager, PgUserRepository,
};
pub use schema::run_migrations;
