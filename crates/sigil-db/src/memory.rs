//! In-memory implementations of the storage traits.
//!
//! These back the test suites and development setups where Postgres
//! and Redis are unavailable. Transactions take an exclusive lock on
//! the whole state and mutate a staged copy, so commit/rollback and
//! single-use semantics match the Postgres manager's behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use sigil_core::repository::{
    DeviceRepository, IdentityField, KeyValueStore, LoginHistoryRepository, RepositoryManager,
    UserRepository,
};
use sigil_core::{Device, LoginHistory, Result, User};

use crate::error::DbError;

// ---------------------------------------------------------------------------
// Key-value store
// ---------------------------------------------------------------------------

/// In-memory TTL'd key-value store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<std::sync::Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().expect("kv lock poisoned");
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        Ok(entries.remove(key).is_some())
    }
}

// ---------------------------------------------------------------------------
// Repository manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct MemState {
    users: HashMap<String, User>,
    devices: HashMap<String, Device>,
    logins: HashMap<String, LoginHistory>,
}

/// A transaction over the in-memory state: an exclusive guard on the
/// live state plus a staged copy receiving the writes. Commit writes
/// the staged copy back; both commit and rollback release the guard
/// and close the transaction.
#[derive(Debug)]
struct MemTx {
    guard: std::sync::Mutex<Option<OwnedMutexGuard<MemState>>>,
    staged: std::sync::Mutex<MemState>,
}

#[derive(Debug, Clone)]
struct MemHandle {
    shared: Arc<Mutex<MemState>>,
    tx: Option<Arc<MemTx>>,
}

impl MemHandle {
    async fn read<T>(&self, f: impl FnOnce(&MemState) -> Result<T>) -> Result<T> {
        match &self.tx {
            Some(tx) => {
                if tx.guard.lock().expect("tx lock poisoned").is_none() {
                    return Err(DbError::TransactionClosed.into());
                }
                let staged = tx.staged.lock().expect("tx lock poisoned");
                f(&staged)
            }
            None => {
                let state = self.shared.lock().await;
                f(&state)
            }
        }
    }

    async fn write<T>(&self, f: impl FnOnce(&mut MemState) -> Result<T>) -> Result<T> {
        match &self.tx {
            Some(tx) => {
                if tx.guard.lock().expect("tx lock poisoned").is_none() {
                    return Err(DbError::TransactionClosed.into());
                }
                let mut staged = tx.staged.lock().expect("tx lock poisoned");
                f(&mut staged)
            }
            None => {
                let mut state = self.shared.lock().await;
                f(&mut state)
            }
        }
    }

    fn in_tx(&self) -> bool {
        self.tx.is_some()
    }
}

/// In-memory implementation of [`RepositoryManager`].
#[derive(Debug, Clone)]
pub struct MemoryRepositoryManager {
    handle: MemHandle,
    users: MemoryUserRepository,
    devices: MemoryDeviceRepository,
    logins: MemoryLoginHistoryRepository,
}

impl Default for MemoryRepositoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepositoryManager {
    pub fn new() -> Self {
        Self::build(MemHandle {
            shared: Arc::new(Mutex::new(MemState::default())),
            tx: None,
        })
    }

    fn build(handle: MemHandle) -> Self {
        Self {
            users: MemoryUserRepository {
                handle: handle.clone(),
            },
            devices: MemoryDeviceRepository {
                handle: handle.clone(),
            },
            logins: MemoryLoginHistoryRepository {
                handle: handle.clone(),
            },
            handle,
        }
    }

    fn tx(&self) -> Result<&Arc<MemTx>> {
        self.handle
            .tx
            .as_ref()
            .ok_or_else(|| DbError::NoTransaction.into())
    }
}

impl RepositoryManager for MemoryRepositoryManager {
    type Users = MemoryUserRepository;
    type Devices = MemoryDeviceRepository;
    type Logins = MemoryLoginHistoryRepository;

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
        let guard = self.handle.shared.clone().lock_owned().await;
        let staged = guard.clone();

        Ok(Self::build(MemHandle {
            shared: self.handle.shared.clone(),
            tx: Some(Arc::new(MemTx {
                guard: std::sync::Mutex::new(Some(guard)),
                staged: std::sync::Mutex::new(staged),
            })),
        }))
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.tx()?;
        let mut guard = tx
            .guard
            .lock()
            .expect("tx lock poisoned")
            .take()
            .ok_or(DbError::TransactionClosed)?;
        *guard = tx.staged.lock().expect("tx lock poisoned").clone();
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx()?;
        tx.guard
            .lock()
            .expect("tx lock poisoned")
            .take()
            .ok_or(DbError::TransactionClosed)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entity repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MemoryUserRepository {
    handle: MemHandle,
}

impl UserRepository for MemoryUserRepository {
    async fn by_id(&self, id: &str) -> Result<User> {
        let id = id.to_string();
        self.handle
            .read(|state| {
                state
                    .users
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| DbError::not_found("user", &id).into())
            })
            .await
    }

    async fn by_identity(&self, field: IdentityField, value: &str) -> Result<User> {
        let value = value.to_string();
        self.handle
            .read(|state| {
                state
                    .users
                    .values()
                    .find(|user| match field {
                        IdentityField::Id => user.id == value,
                        IdentityField::Phone => user.phone.as_deref() == Some(value.as_str()),
                        IdentityField::Email => user.email.as_deref() == Some(value.as_str()),
                    })
                    .cloned()
                    .ok_or_else(|| DbError::not_found("user", &value).into())
            })
            .await
    }

    async fn get_for_update(&self, id: &str) -> Result<User> {
        if !self.handle.in_tx() {
            return Err(DbError::NoTransaction.into());
        }
        self.by_id(id).await
    }

    async fn create(&self, mut user: User) -> Result<User> {
        self.handle
            .write(|state| {
                let conflict = state.users.values().any(|existing| {
                    (user.phone.is_some() && existing.phone == user.phone)
                        || (user.email.is_some() && existing.email == user.email)
                });
                if conflict {
                    return Err(DbError::Conflict("user").into());
                }

                user.id = Ulid::new().to_string();
                let now = Utc::now();
                user.created_at = now;
                user.updated_at = now;
                state.users.insert(user.id.clone(), user.clone());
                Ok(user)
            })
            .await
    }

    async fn re_create(&self, mut user: User) -> Result<User> {
        self.handle
            .write(|state| {
                if state.users.remove(&user.id).is_none() {
                    return Err(DbError::not_found("user", &user.id).into());
                }

                user.id = Ulid::new().to_string();
                user.is_verified = false;
                let now = Utc::now();
                user.created_at = now;
                user.updated_at = now;
                state.users.insert(user.id.clone(), user.clone());
                Ok(user)
            })
            .await
    }

    async fn update(&self, user: &User) -> Result<User> {
        let mut user = user.clone();
        self.handle
            .write(|state| {
                if !state.users.contains_key(&user.id) {
                    return Err(DbError::not_found("user", &user.id).into());
                }

                user.updated_at = Utc::now();
                state.users.insert(user.id.clone(), user.clone());
                Ok(user)
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDeviceRepository {
    handle: MemHandle,
}

impl DeviceRepository for MemoryDeviceRepository {
    async fn by_id(&self, device_id: &str) -> Result<Device> {
        let device_id = device_id.to_string();
        self.handle
            .read(|state| {
                state
                    .devices
                    .get(&device_id)
                    .cloned()
                    .ok_or_else(|| DbError::not_found("device", &device_id).into())
            })
            .await
    }

    async fn by_client_id(&self, user_id: &str, client_id: &[u8]) -> Result<Device> {
        self.handle
            .read(|state| {
                state
                    .devices
                    .values()
                    .find(|d| d.user_id == user_id && d.client_id == client_id)
                    .cloned()
                    .ok_or_else(|| DbError::not_found("device", user_id).into())
            })
            .await
    }

    async fn by_user_id(&self, user_id: &str) -> Result<Vec<Device>> {
        self.handle
            .read(|state| {
                let mut devices: Vec<Device> = state
                    .devices
                    .values()
                    .filter(|d| d.user_id == user_id)
                    .cloned()
                    .collect();
                devices.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                Ok(devices)
            })
            .await
    }

    async fn create(&self, mut device: Device) -> Result<Device> {
        self.handle
            .write(|state| {
                let conflict = state
                    .devices
                    .values()
                    .any(|d| d.user_id == device.user_id && d.client_id == device.client_id);
                if conflict {
                    return Err(DbError::Conflict("device").into());
                }

                device.id = Ulid::new().to_string();
                let now = Utc::now();
                device.created_at = now;
                device.updated_at = now;
                state.devices.insert(device.id.clone(), device.clone());
                Ok(device)
            })
            .await
    }

    async fn get_for_update(&self, device_id: &str) -> Result<Device> {
        if !self.handle.in_tx() {
            return Err(DbError::NoTransaction.into());
        }
        self.by_id(device_id).await
    }

    async fn update(&self, device: &Device) -> Result<Device> {
        let mut device = device.clone();
        self.handle
            .write(|state| {
                if !state.devices.contains_key(&device.id) {
                    return Err(DbError::not_found("device", &device.id).into());
                }

                device.updated_at = Utc::now();
                state.devices.insert(device.id.clone(), device.clone());
                Ok(device)
            })
            .await
    }

    async fn remove(&self, device_id: &str, user_id: &str) -> Result<()> {
        let device_id = device_id.to_string();
        let user_id = user_id.to_string();
        self.handle
            .write(|state| {
                let owned = state
                    .devices
                    .get(&device_id)
                    .is_some_and(|d| d.user_id == user_id);
                if !owned {
                    return Err(DbError::not_found("device", &device_id).into());
                }

                state.devices.remove(&device_id);
                Ok(())
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct MemoryLoginHistoryRepository {
    handle: MemHandle,
}

impl LoginHistoryRepository for MemoryLoginHistoryRepository {
    async fn by_user_id(&self, user_id: &str, limit: i64, offset: i64) -> Result<Vec<LoginHistory>> {
        self.handle
            .read(|state| {
                let mut logins: Vec<LoginHistory> = state
                    .logins
                    .values()
                    .filter(|l| l.user_id == user_id)
                    .cloned()
                    .collect();
                logins.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(logins
                    .into_iter()
                    .skip(offset.max(0) as usize)
                    .take(limit.max(0) as usize)
                    .collect())
            })
            .await
    }

    async fn create(&self, mut login: LoginHistory) -> Result<LoginHistory> {
        self.handle
            .write(|state| {
                if state.logins.contains_key(&login.token_id) {
                    return Err(DbError::Conflict("login").into());
                }

                let now = Utc::now();
                login.created_at = now;
                login.updated_at = now;
                state.logins.insert(login.token_id.clone(), login.clone());
                Ok(login)
            })
            .await
    }

    async fn get_for_update(&self, token_id: &str) -> Result<LoginHistory> {
        if !self.handle.in_tx() {
            return Err(DbError::NoTransaction.into());
        }
        let token_id = token_id.to_string();
        self.handle
            .read(|state| {
                state
                    .logins
                    .get(&token_id)
                    .cloned()
                    .ok_or_else(|| DbError::not_found("login", &token_id).into())
            })
            .await
    }

    async fn update(&self, login: &LoginHistory) -> Result<LoginHistory> {
        let mut login = login.clone();
        self.handle
            .write(|state| {
                if !state.logins.contains_key(&login.token_id) {
                    return Err(DbError::not_found("login", &login.token_id).into());
                }

                login.updated_at = Utc::now();
                state.logins.insert(login.token_id.clone(), login.clone());
                Ok(login)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::Error;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: String::new(),
            phone: None,
            email: Some("jane@example.com".into()),
            password: String::new(),
            tfa_secret: String::new(),
            is_code_allowed: true,
            is_totp_allowed: false,
            is_device_allowed: false,
            is_email_otp_allowed: true,
            is_phone_otp_allowed: false,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_assigns_ulid_and_finds_by_identity() {
        let repo = MemoryRepositoryManager::new();
        let created = repo.user().create(user()).await.unwrap();
        assert_eq!(created.id.len(), 26);

        let found = repo
            .user()
            .by_identity(IdentityField::Email, "jane@example.com")
            .await
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn duplicate_identity_conflicts() {
        let repo = MemoryRepositoryManager::new();
        repo.user().create(user()).await.unwrap();
        let err = repo.user().create(user()).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn re_create_assigns_fresh_id() {
        let repo = MemoryRepositoryManager::new();
        let created = repo.user().create(user()).await.unwrap();

        let tx = repo.with_transaction().await.unwrap();
        let recreated = tx
            .with_atomic(async {
                let locked = tx.user().get_for_update(&created.id).await?;
                tx.user().re_create(locked).await
            })
            .await
            .unwrap();

        assert_ne!(recreated.id, created.id);
        assert!(!recreated.is_verified);
        assert!(repo.user().by_id(&created.id).await.is_err());
        assert!(repo.user().by_id(&recreated.id).await.is_ok());
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let repo = MemoryRepositoryManager::new();
        let created = repo.user().create(user()).await.unwrap();

        let tx = repo.with_transaction().await.unwrap();
        let err = tx
            .with_atomic(async {
                let mut locked = tx.user().get_for_update(&created.id).await?;
                locked.is_verified = true;
                tx.user().update(&locked).await?;
                Err::<(), _>(Error::bad_request("abort"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        let after = repo.user().by_id(&created.id).await.unwrap();
        assert!(!after.is_verified);
    }

    #[tokio::test]
    async fn manager_is_single_use_after_commit() {
        let repo = MemoryRepositoryManager::new();
        let created = repo.user().create(user()).await.unwrap();

        let tx = repo.with_transaction().await.unwrap();
        tx.with_atomic(async {
            let mut locked = tx.user().get_for_update(&created.id).await?;
            locked.is_verified = true;
            tx.user().update(&locked).await
        })
        .await
        .unwrap();

        // The committed manager must refuse further work.
        let err = tx.user().by_id(&created.id).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(tx.commit().await.is_err());

        // The parent manager sees the committed write.
        assert!(repo.user().by_id(&created.id).await.unwrap().is_verified);
    }

    #[tokio::test]
    async fn get_for_update_requires_transaction() {
        let repo = MemoryRepositoryManager::new();
        let created = repo.user().create(user()).await.unwrap();
        let err = repo.user().get_for_update(&created.id).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn kv_store_expires_entries() {
        let kv = MemoryKeyValueStore::new();
        kv.set("token:abc", "revoked", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(kv.get("token:abc").await.unwrap().as_deref(), Some("revoked"));

        kv.set("token:gone", "revoked", Duration::ZERO).await.unwrap();
        assert_eq!(kv.get("token:gone").await.unwrap(), None);

        assert!(kv.delete("token:abc").await.unwrap());
        assert!(!kv.delete("token:abc").await.unwrap());
    }
}
