//! Device management flow.

use webauthn_rs::prelude::RegisterPublicKeyCredential;

use sigil_core::{
    Claims, Device, DeviceRepository, Error, KeyValueStore, RepositoryManager, Result,
    TokenState, UserRepository,
};

use crate::flows::{require_state, user_for_claims};
use crate::webauthn::WebAuthnService;

/// Orchestrates registration, naming, and removal of WebAuthn devices
/// for an authorized user.
#[derive(Debug, Clone)]
pub struct DeviceService<M, K> {
    repo: M,
    webauthn: WebAuthnService<K>,
}

impl<M, K> DeviceService<M, K>
where
    M: RepositoryManager,
    K: KeyValueStore + Clone,
{
    pub fn new(repo: M, webauthn: WebAuthnService<K>) -> Self {
        Self { repo, webauthn }
    }

    /// Begin registering a new device: credential-creation options
    /// excluding the user's existing credentials.
    pub async fn begin_register(&self, claims: &Claims) -> Result<serde_json::Value> {
        require_state(claims, TokenState::Authorized)?;
        let user = user_for_claims(&self.repo, claims).await?;

        let existing = self.repo.device().by_user_id(&user.id).await?;
        self.webauthn.begin_sign_up(&user, &existing).await
    }

    /// Verify ownership of a new device and persist it. Enabling the
    /// device MFA channel happens in the same transaction.
    pub async fn finish_register(
        &self,
        claims: &Claims,
        name: &str,
        credential: &RegisterPublicKeyCredential,
    ) -> Result<Device> {
        require_state(claims, TokenState::Authorized)?;
        let user = user_for_claims(&self.repo, claims).await?;

        let device = self.webauthn.finish_sign_up(&user, name, credential).await?;

        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            let stored = tx.device().create(device.clone()).await?;

            let mut locked = tx.user().get_for_update(&user.id).await?;
            locked.is_device_allowed = true;
            tx.user().update(&locked).await?;

            Ok(stored)
        })
        .await
    }

    /// All devices registered to the token's user.
    pub async fn list(&self, claims: &Claims) -> Result<Vec<Device>> {
        require_state(claims, TokenState::Authorized)?;
        self.repo.device().by_user_id(&claims.user_id).await
    }

    /// Rename a device owned by the token's user.
    pub async fn rename(&self, claims: &Claims, device_id: &str, name: &str) -> Result<Device> {
        require_state(claims, TokenState::Authorized)?;

        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            let mut locked = tx.device().get_for_update(device_id).await?;
            if locked.user_id != claims.user_id {
                return Err(Error::not_found("device", device_id));
            }

            locked.name = name.to_string();
            tx.device().update(&locked).await
        })
        .await
    }

    /// Remove a device. The user's device MFA channel is recomputed
    /// from the remaining count in the same transaction.
    pub async fn remove(&self, claims: &Claims, device_id: &str) -> Result<()> {
        require_state(claims, TokenState::Authorized)?;

        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            tx.device().remove(device_id, &claims.user_id).await?;

            let remaining = tx.device().by_user_id(&claims.user_id).await?;
            let mut locked = tx.user().get_for_update(&claims.user_id).await?;
            locked.is_device_allowed = !remaining.is_empty();
            tx.user().update(&locked).await?;

            Ok(())
        })
        .await
    }
}
