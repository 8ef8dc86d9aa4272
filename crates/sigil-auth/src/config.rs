//! Authentication configuration.

use sigil_core::models::token::ISSUER;
use sigil_core::{IdentityKind, PasswordMode};

/// Configuration for the token engine.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HMAC signing secret for HS-512 JWTs.
    pub secret: String,
    /// `iss` claim value.
    pub issuer: String,
    /// Access token lifetime in seconds (default: 1200 = 20 minutes).
    pub token_ttl_secs: u64,
    /// Refresh envelope lifetime in seconds (default: 2_592_000 = 30 days).
    pub refresh_ttl_secs: u64,
    /// OTP code lifetime in seconds (default: 300 = 5 minutes).
    pub otp_ttl_secs: u64,
    /// `Domain` attribute of the client-ID cookie; empty omits it.
    pub cookie_domain: String,
    /// `Max-Age` attribute of the client-ID cookie in seconds.
    pub cookie_max_age_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: ISSUER.into(),
            token_ttl_secs: 1200,
            refresh_ttl_secs: 2_592_000,
            otp_ttl_secs: 300,
            cookie_domain: String::new(),
            cookie_max_age_secs: 2_592_000,
        }
    }
}

/// Deployment policy for registration and credentials.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub password_mode: PasswordMode,
    /// Identity kinds accepted at registration.
    pub identity_kinds: IdentityKind,
    /// Optional server-side pepper prepended before Argon2id hashing.
    pub pepper: Option<String>,
    pub min_password_length: usize,
    /// Issuer name shown in authenticator apps for TOTP enrollment.
    pub totp_issuer: String,
    /// 256-bit AES-GCM key encrypting TFA secrets at rest. `None`
    /// disables TOTP enrollment.
    pub tfa_encryption_key: Option<[u8; 32]>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            password_mode: PasswordMode::Password,
            identity_kinds: IdentityKind::Contact,
            pepper: None,
            min_password_length: 8,
            totp_issuer: "SIGIL".into(),
            tfa_encryption_key: None,
        }
    }
}

/// Relying-party identity for WebAuthn ceremonies.
#[derive(Debug, Clone)]
pub struct WebAuthnConfig {
    /// Site display name shown by authenticators.
    pub display_name: String,
    /// Relying party ID (the site domain).
    pub domain: String,
    /// Origin expected on authentication requests.
    pub origin: String,
}

impl Default for WebAuthnConfig {
    fn default() -> Self {
        Self {
            display_name: "SIGIL".into(),
            domain: "localhost".into(),
            origin: "http://localhost:8080".into(),
        }
    }
}
