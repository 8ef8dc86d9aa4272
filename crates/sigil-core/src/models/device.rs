//! WebAuthn device domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device capable of attesting to a user's identity, e.g. a FIDO
/// security key or a platform authenticator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// ULID assigned by the service.
    pub id: String,
    pub user_id: String,
    /// Credential ID generated by the authenticator during
    /// registration. Opaque, not unique across users.
    pub client_id: Vec<u8>,
    /// Serialized signing credential used to validate assertions.
    pub public_key: Vec<u8>,
    /// Authenticator model identifier, when attestation conveys one.
    pub aaguid: Vec<u8>,
    /// User-supplied human readable name.
    pub name: String,
    /// Stored signature counter. Each successful assertion must carry
    /// a strictly larger value; regression or equality indicates a
    /// cloned or malfunctioning authenticator.
    pub sign_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
