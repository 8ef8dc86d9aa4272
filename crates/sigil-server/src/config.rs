//! Environment-driven configuration for the server binary.

use sigil_auth::{PolicyConfig, TokenConfig, WebAuthnConfig};
use sigil_core::{Error, IdentityKind, PasswordMode, Result};
use sigil_db::DbConfig;

/// Full server configuration assembled from `SIGIL_*` environment
/// variables, falling back to each crate's defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub token: TokenConfig,
    pub policy: PolicyConfig,
    pub webauthn: WebAuthnConfig,
    pub db: DbConfig,
    pub redis_url: String,
    pub message_queue_depth: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let mut token = TokenConfig {
            secret: require("SIGIL_TOKEN_SECRET")?,
            ..Default::default()
        };
        if let Some(issuer) = optional("SIGIL_TOKEN_ISSUER") {
            token.issuer = issuer;
        }
        if let Some(ttl) = optional("SIGIL_TOKEN_TTL_SECS") {
            token.token_ttl_secs = parse_number("SIGIL_TOKEN_TTL_SECS", &ttl)?;
        }
        if let Some(ttl) = optional("SIGIL_REFRESH_TTL_SECS") {
            token.refresh_ttl_secs = parse_number("SIGIL_REFRESH_TTL_SECS", &ttl)?;
        }
        if let Some(ttl) = optional("SIGIL_OTP_TTL_SECS") {
            token.otp_ttl_secs = parse_number("SIGIL_OTP_TTL_SECS", &ttl)?;
        }
        if let Some(domain) = optional("SIGIL_COOKIE_DOMAIN") {
            token.cookie_domain = domain;
        }
        if let Some(age) = optional("SIGIL_COOKIE_MAX_AGE_SECS") {
            token.cookie_max_age_secs = parse_number("SIGIL_COOKIE_MAX_AGE_SECS", &age)?;
        }

        let mut policy = PolicyConfig::default();
        if let Some(mode) = optional("SIGIL_PASSWORD_MODE") {
            policy.password_mode = match mode.as_str() {
                "password" => PasswordMode::Password,
                "no_password" => PasswordMode::NoPassword,
                other => {
                    return Err(Error::internal(format!(
                        "SIGIL_PASSWORD_MODE must be password or no_password, got {other}"
                    )));
                }
            };
        }
        if let Some(kinds) = optional("SIGIL_IDENTITY_KINDS") {
            policy.identity_kinds = match kinds.as_str() {
                "phone" => IdentityKind::Phone,
                "email" => IdentityKind::Email,
                "contact" => IdentityKind::Contact,
                other => {
                    return Err(Error::internal(format!(
                        "SIGIL_IDENTITY_KINDS must be phone, email, or contact, got {other}"
                    )));
                }
            };
        }
        policy.pepper = optional("SIGIL_PASSWORD_PEPPER");
        if let Some(key) = optional("SIGIL_TFA_ENCRYPTION_KEY") {
            policy.tfa_encryption_key = Some(parse_key(&key)?);
        }

        let mut webauthn = WebAuthnConfig::default();
        if let Some(name) = optional("SIGIL_WEBAUTHN_DISPLAY_NAME") {
            webauthn.display_name = name;
        }
        if let Some(domain) = optional("SIGIL_WEBAUTHN_DOMAIN") {
            webauthn.domain = domain;
        }
        if let Some(origin) = optional("SIGIL_WEBAUTHN_ORIGIN") {
            webauthn.origin = origin;
        }

        let mut db = DbConfig::default();
        if let Some(url) = optional("SIGIL_DATABASE_URL") {
            db.database_url = url;
        }

        let redis_url =
            optional("SIGIL_REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1/".into());
        let message_queue_depth = match optional("SIGIL_MESSAGE_QUEUE_DEPTH") {
            Some(depth) => parse_number("SIGIL_MESSAGE_QUEUE_DEPTH", &depth)?,
            None => 256,
        };

        Ok(Self {
            token,
            policy,
            webauthn,
            db,
            redis_url,
            message_queue_depth,
        })
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn require(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| Error::internal(format!("{name} must be set")))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::internal(format!("{name} must be a number, got {value}")))
}

fn parse_key(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|_| Error::internal("SIGIL_TFA_ENCRYPTION_KEY must be hex"))?;
    bytes
        .try_into()
        .map_err(|_| Error::internal("SIGIL_TFA_ENCRYPTION_KEY must be 32 bytes"))
}
