//! Login history domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A login session record, created on each authorized token issuance
/// and keyed by the token ID so the row survives refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginHistory {
    /// JWT ID (`jti`) of the issued token.
    pub token_id: String,
    pub user_id: String,
    /// Tokens are invalidated through expiry or revocation.
    pub is_revoked: bool,
    /// Outer bound of the session: the refresh envelope's expiry.
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
