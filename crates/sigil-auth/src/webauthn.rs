//! WebAuthn adapter driving security-key registration and login
//! ceremonies.
//!
//! The adapter itself is stateless: ephemeral ceremony state is
//! serialized into the key-value store under a short TTL, keyed by
//! user and purpose, and consumed exactly once on finish.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use ulid::Ulid;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CredentialID, PublicKeyCredential, RegisterPublicKeyCredential, SecurityKey,
    SecurityKeyAuthentication, SecurityKeyRegistration, Url, Webauthn, WebauthnBuilder,
};

use sigil_core::{Device, Error, KeyValueStore, Result, User};

use crate::config::WebAuthnConfig;

const CHALLENGE_TTL: Duration = Duration::from_secs(300);

fn state_key(purpose: &str, user_id: &str) -> String {
    format!("webauthn:{purpose}:{user_id}")
}

fn user_handle(user: &User) -> Result<Uuid> {
    let ulid = Ulid::from_string(&user.id)
        .map_err(|_| Error::internal(format!("user ID is not a ULID: {}", user.id)))?;
    Ok(Uuid::from(ulid))
}

/// Reject an assertion whose signature counter has not advanced past
/// the stored value. Equality or regression indicates a cloned or
/// malfunctioning authenticator.
pub(crate) fn ensure_counter_advances(device: &Device, attested: u32) -> Result<()> {
    if attested <= device.sign_count {
        return Err(Error::invalid_field(
            "device",
            "device sign count is invalid",
        ));
    }
    Ok(())
}

/// Credential validator for the WebAuthn protocol. Defers the actual
/// cryptography to `webauthn-rs`.
#[derive(Clone)]
pub struct WebAuthnService<K> {
    webauthn: std::sync::Arc<Webauthn>,
    store: K,
}

impl<K> std::fmt::Debug for WebAuthnService<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebAuthnService").finish()
    }
}

impl<K: KeyValueStore> WebAuthnService<K> {
    pub fn new(config: &WebAuthnConfig, store: K) -> Result<Self> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| Error::internal(format!("invalid WebAuthn origin: {e}")))?;
        let webauthn = WebauthnBuilder::new(&config.domain, &origin)
            .and_then(|builder| builder.rp_name(&config.display_name).build())
            .map_err(|e| Error::internal(format!("WebAuthn init: {e}")))?;

        Ok(Self {
            webauthn: std::sync::Arc::new(webauthn),
            store,
        })
    }

    /// Start registration of a new device for a user. Returns the
    /// credential-creation options as opaque JSON for the client.
    pub async fn begin_sign_up(
        &self,
        user: &User,
        existing: &[Device],
    ) -> Result<serde_json::Value> {
        let exclude: Vec<CredentialID> = existing
            .iter()
            .map(|d| d.client_id.clone().into())
            .collect();
        let exclude = (!exclude.is_empty()).then_some(exclude);

        let name = user.default_name();
        let (challenge, registration) = self
            .webauthn
            .start_securitykey_registration(user_handle(user)?, name, name, exclude, None, None)
            .map_err(|e| Error::invalid_field("device", format!("registration failed: {e}")))?;

        self.put_state("register", &user.id, &registration).await?;

        serde_json::to_value(&challenge)
            .map_err(|e| Error::internal(format!("challenge encode: {e}")))
    }

    /// Confirm a registration challenge signature and produce a
    /// device ready to persist.
    pub async fn finish_sign_up(
        &self,
        user: &User,
        name: &str,
        credential: &RegisterPublicKeyCredential,
    ) -> Result<Device> {
        let registration: SecurityKeyRegistration = self.take_state("register", &user.id).await?;

        let key = self
            .webauthn
            .finish_securitykey_registration(credential, &registration)
            .map_err(|e| Error::invalid_field("device", format!("registration failed: {e}")))?;

        let public_key = serde_json::to_vec(&key)
            .map_err(|e| Error::internal(format!("credential encode: {e}")))?;

        let now = Utc::now();
        Ok(Device {
            id: String::new(),
            user_id: user.id.clone(),
            client_id: key.cred_id().as_slice().to_vec(),
            public_key,
            aaguid: Vec::new(),
            name: name.to_string(),
            sign_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Start the authentication flow across a user's registered
    /// devices. Returns the credential-request options as opaque JSON.
    pub async fn begin_login(&self, user: &User, devices: &[Device]) -> Result<serde_json::Value> {
        let keys: Vec<SecurityKey> = devices
            .iter()
            .filter_map(|d| serde_json::from_slice(&d.public_key).ok())
            .collect();
        if keys.is_empty() {
            return Err(Error::invalid_field("device", "no devices registered"));
        }

        let (challenge, authentication) = self
            .webauthn
            .start_securitykey_authentication(&keys)
            .map_err(|e| Error::invalid_field("device", format!("authentication failed: {e}")))?;

        self.put_state("login", &user.id, &authentication).await?;

        serde_json::to_value(&challenge)
            .map_err(|e| Error::internal(format!("challenge encode: {e}")))
    }

    /// Confirm that a device successfully signed a login challenge.
    /// Returns the matched device with its signature counter advanced;
    /// the caller persists it in the same transaction that grants the
    /// session.
    pub async fn finish_login(
        &self,
        user: &User,
        devices: &[Device],
        credential: &PublicKeyCredential,
    ) -> Result<Device> {
        let authentication: SecurityKeyAuthentication = self.take_state("login", &user.id).await?;

        let result = self
            .webauthn
            .finish_securitykey_authentication(credential, &authentication)
            .map_err(|e| Error::invalid_field("device", format!("authentication failed: {e}")))?;

        let device = devices
            .iter()
            .find(|d| d.client_id.as_slice() == result.cred_id().as_slice())
            .ok_or_else(|| Error::invalid_field("device", "device is not registered"))?;

        ensure_counter_advances(device, result.counter())?;

        let mut updated = device.clone();
        updated.sign_count = result.counter();
        Ok(updated)
    }

    async fn put_state<T: Serialize>(&self, purpose: &str, user_id: &str, state: &T) -> Result<()> {
        let json = serde_json::to_string(state)
            .map_err(|e| Error::internal(format!("challenge state encode: {e}")))?;
        let encoded = URL_SAFE_NO_PAD.encode(json.as_bytes());
        self.store
            .set(&state_key(purpose, user_id), &encoded, CHALLENGE_TTL)
            .await
    }

    async fn take_state<T: DeserializeOwned>(&self, purpose: &str, user_id: &str) -> Result<T> {
        let key = state_key(purpose, user_id);
        let encoded = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| Error::invalid_field("device", "challenge not found or expired"))?;
        self.store.delete(&key).await?;

        let json = URL_SAFE_NO_PAD
            .decode(&encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| Error::internal("challenge state is corrupt"))?;
        serde_json::from_str(&json)
            .map_err(|e| Error::internal(format!("challenge state decode: {e}")))
    }
}
