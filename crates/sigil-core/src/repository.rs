//! Storage and collaborator trait definitions.
//!
//! All operations are async. Entity repositories are obtained through a
//! [`RepositoryManager`]; multi-statement mutations must run through
//! `with_transaction` + `with_atomic` with `get_for_update` row locks.

use std::time::Duration;

use crate::error::Result;
use crate::models::device::Device;
use crate::models::login::LoginHistory;
use crate::models::message::Message;
use crate::models::user::User;

/// Whitelisted attributes a user may be looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Id,
    Phone,
    Email,
}

pub trait UserRepository: Send + Sync {
    fn by_id(&self, id: &str) -> impl Future<Output = Result<User>> + Send;

    /// Retrieve a user by a whitelisted identity attribute.
    fn by_identity(
        &self,
        field: IdentityField,
        value: &str,
    ) -> impl Future<Output = Result<User>> + Send;

    /// Retrieve a user by ID, acquiring a row lock within the active
    /// transaction.
    fn get_for_update(&self, id: &str) -> impl Future<Output = Result<User>> + Send;

    /// Persist a new user. The repository assigns the ID and
    /// timestamps; the stored row is returned.
    fn create(&self, user: User) -> impl Future<Output = Result<User>> + Send;

    /// Reset an existing, unverified user as if it had just
    /// registered: identity fields and credentials are overwritten, a
    /// fresh ID is assigned, and timestamps are re-stamped. Users are
    /// considered unverified until completing OTP verification.
    fn re_create(&self, user: User) -> impl Future<Output = Result<User>> + Send;

    fn update(&self, user: &User) -> impl Future<Output = Result<User>> + Send;
}

pub trait DeviceRepository: Send + Sync {
    fn by_id(&self, device_id: &str) -> impl Future<Output = Result<Device>> + Send;

    /// Retrieve a device associated with a user by the authenticator's
    /// credential ID.
    fn by_client_id(
        &self,
        user_id: &str,
        client_id: &[u8],
    ) -> impl Future<Output = Result<Device>> + Send;

    fn by_user_id(&self, user_id: &str) -> impl Future<Output = Result<Vec<Device>>> + Send;

    fn create(&self, device: Device) -> impl Future<Output = Result<Device>> + Send;

    fn get_for_update(&self, device_id: &str) -> impl Future<Output = Result<Device>> + Send;

    fn update(&self, device: &Device) -> impl Future<Output = Result<Device>> + Send;

    fn remove(&self, device_id: &str, user_id: &str) -> impl Future<Output = Result<()>> + Send;
}

pub trait LoginHistoryRepository: Send + Sync {
    /// Recent login records for a user, newest first.
    fn by_user_id(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> impl Future<Output = Result<Vec<LoginHistory>>> + Send;

    fn create(&self, login: LoginHistory) -> impl Future<Output = Result<LoginHistory>> + Send;

    /// Retrieve a record by token ID, acquiring a row lock within the
    /// active transaction.
    fn get_for_update(&self, token_id: &str)
    -> impl Future<Output = Result<LoginHistory>> + Send;

    fn update(&self, login: &LoginHistory) -> impl Future<Output = Result<LoginHistory>> + Send;
}

/// Access point for entity repositories with atomic properties.
///
/// A manager returned by `with_transaction` is bound to that
/// transaction and is single-use: any operation after commit or
/// rollback fails with a state-checked error.
pub trait RepositoryManager: Send + Sync + Sized {
    type Users: UserRepository;
    type Devices: DeviceRepository;
    type Logins: LoginHistoryRepository;

    fn user(&self) -> &Self::Users;
    fn device(&self) -> &Self::Devices;
    fn login_history(&self) -> &Self::Logins;

    /// Returns a child manager bound to a fresh transaction.
    fn with_transaction(&self) -> impl Future<Output = Result<Self>> + Send;

    fn commit(&self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(&self) -> impl Future<Output = Result<()>> + Send;

    /// Runs `op` inside the bound transaction: commits on success,
    /// rolls back on any error, and returns the operation's payload.
    fn with_atomic<T, Fut>(&self, op: Fut) -> impl Future<Output = Result<T>> + Send
    where
        T: Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        async move {
            match op.await {
                Ok(value) => {
                    self.commit().await?;
                    Ok(value)
                }
                Err(err) => {
                    let _ = self.rollback().await;
                    Err(err)
                }
            }
        }
    }
}

/// TTL'd key-value storage backing the revocation ledger and WebAuthn
/// challenge state. Last-writer-wins per key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns true if the key existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Out-of-core messaging seam. Implementations deliver at-least-once
/// with eventual backoff.
pub trait MessagingService: Send + Sync {
    fn send(&self, message: Message) -> impl Future<Output = Result<()>> + Send;
}
