//! Token claim model and its wire shape.

use serde::{Deserialize, Serialize};

use crate::models::user::User;

/// Default `iss` claim value.
pub const ISSUER: &str = "sigil";

/// State of a token at issuance.
///
/// A token may represent an intermediary state prior to authorization,
/// e.g. an OTP or device assertion is still required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Credential accepted; an MFA step remains.
    PreAuthorized,
    /// Fully authenticated; admissible for resource requests.
    Authorized,
}

/// An MFA channel available to the token holder, carried in the claim
/// for UI routing without a user lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TfaOption {
    OtpEmail,
    OtpPhone,
    Totp,
    Device,
}

/// JWT claims proving user authentication.
///
/// Claims are immutable after minting. Refreshing mints a new claim
/// carrying forward `jti`, `client_id`, and `refresh_token_hash` with
/// a new expiry. User fields are a snapshot at mint time; post-mint
/// user mutations do not propagate into live tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Unique token ID (ULID).
    #[serde(rename = "jti")]
    pub id: String,
    pub iss: String,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// SHA-512 hex digest of the client secret. The token is only
    /// valid when presented alongside the unhashed secret.
    #[serde(rename = "client_id")]
    pub client_id_hash: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(rename = "phone_number", default, skip_serializing_if = "String::is_empty")]
    pub phone: String,
    pub state: TokenState,
    /// Legacy wire field, always empty. Plaintext codes never enter
    /// the claim.
    #[serde(default)]
    pub code: String,
    /// OTP hash envelope; present only on pre-authorized tokens.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code_hash: String,
    /// SHA-512 hex digest of the refresh-token envelope; present only
    /// on authorized tokens.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token_hash: String,
    #[serde(default)]
    pub tfa_options: Vec<TfaOption>,
}

impl Claims {
    /// The MFA channels enabled for a user at mint time.
    pub fn tfa_options_for(user: &User) -> Vec<TfaOption> {
        let mut options = Vec::new();
        if user.is_phone_otp_allowed {
            options.push(TfaOption::OtpPhone);
        }
        if user.is_email_otp_allowed {
            options.push(TfaOption::OtpEmail);
        }
        if user.is_totp_allowed {
            options.push(TfaOption::Totp);
        }
        if user.is_device_allowed {
            options.push(TfaOption::Device);
        }
        options
    }
}
