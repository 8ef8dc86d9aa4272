//! Token engine: minting, signing, validation, revocation, and
//! refresh of the claim structure.
//!
//! Tokens are HS-512 JWTs bound to a client secret held in an
//! `HttpOnly` cookie. Revocation is a TTL'd ledger entry keyed by the
//! token ID; a ledger hit invalidates every claim carrying that ID
//! until the entry lapses.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use sigil_core::{Claims, DeliveryMethod, Error, KeyValueStore, Result, TokenState, User};

use crate::config::TokenConfig;
use crate::crypto;
use crate::otp;

/// Cookie name carrying the base64url client secret.
pub const CLIENT_ID_COOKIE: &str = "CLIENTID";

const CLIENT_ID_LEN: usize = 40;
const REFRESH_TOKEN_LEN: usize = 40;

/// Refresh-token envelope. The base64url form is returned to the
/// caller exactly once; its SHA-512 digest lives in the claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshEnvelope {
    pub code: String,
    pub expires_at: i64,
}

/// Optional settings for minting a token.
#[derive(Debug, Default)]
pub struct TokenOptions {
    /// Channel for delivering an OTP code tied to this token.
    pub delivery_method: Option<DeliveryMethod>,
    /// Explicit OTP destination. When unset, the user's default
    /// address for the method is used.
    pub delivery_address: Option<String>,
    /// Use an older claim as the basis for this token: the ID,
    /// client-ID hash, and refresh-token hash carry over with a new
    /// expiry.
    pub refresh_of: Option<Claims>,
}

impl TokenOptions {
    pub fn with_delivery(method: DeliveryMethod) -> Self {
        Self {
            delivery_method: Some(method),
            ..Default::default()
        }
    }

    pub fn refreshing(claims: Claims) -> Self {
        Self {
            refresh_of: Some(claims),
            ..Default::default()
        }
    }
}

/// A freshly minted token with its transient plaintext companions.
/// None of these plaintext values are ever persisted.
#[derive(Debug)]
pub struct Minted {
    pub claims: Claims,
    /// base64url client secret for the cookie; empty on refresh (the
    /// cookie is already set).
    pub client_id: String,
    /// Plaintext OTP code for delivery; empty unless a delivery
    /// method was requested.
    pub code: String,
    /// base64url refresh envelope; set only on the first mint of an
    /// authorized token.
    pub refresh_token: String,
}

/// A `Secure; HttpOnly` cookie accompanying a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub max_age_secs: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    /// Render as a `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut out = format!("{}={}; Max-Age={}", self.name, self.value, self.max_age_secs);
        if !self.domain.is_empty() {
            out.push_str("; Domain=");
            out.push_str(&self.domain);
        }
        out.push_str("; Path=");
        out.push_str(&self.path);
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

fn ledger_key(token_id: &str) -> String {
    format!("token:{token_id}")
}

/// Manages the JWT lifecycle, backed by a TTL'd key-value revocation
/// ledger.
#[derive(Debug, Clone)]
pub struct TokenService<K> {
    secret: Vec<u8>,
    issuer: String,
    token_ttl: Duration,
    refresh_ttl: Duration,
    otp_ttl: Duration,
    cookie_domain: String,
    cookie_max_age_secs: i64,
    ledger: K,
}

impl<K: KeyValueStore> TokenService<K> {
    pub fn new(config: TokenConfig, ledger: K) -> Self {
        Self {
            secret: config.secret.into_bytes(),
            issuer: config.issuer,
            token_ttl: Duration::from_secs(config.token_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
            otp_ttl: Duration::from_secs(config.otp_ttl_secs),
            cookie_domain: config.cookie_domain,
            cookie_max_age_secs: config.cookie_max_age_secs,
            ledger,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Mint a new, unsigned token for a user.
    pub fn create(&self, user: &User, state: TokenState, options: TokenOptions) -> Result<Minted> {
        let id = self.gen_token_id(&options);
        let (client_id, client_id_hash) = self.gen_client_id(&options)?;
        let (code, code_hash) = self.gen_otp(&options, user)?;
        let (refresh_token, refresh_token_hash) = self.gen_refresh_token(&options, state)?;

        let claims = Claims {
            id,
            iss: self.issuer.clone(),
            exp: Utc::now().timestamp() + self.token_ttl.as_secs() as i64,
            client_id_hash,
            user_id: user.id.clone(),
            email: user.email.clone().unwrap_or_default(),
            phone: user.phone.clone().unwrap_or_default(),
            state,
            code: String::new(),
            code_hash,
            refresh_token_hash,
            tfa_options: Claims::tfa_options_for(user),
        };

        Ok(Minted {
            claims,
            client_id,
            code,
            refresh_token,
        })
    }

    /// Produce the signed JWT string for a claim.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        let header = Header::new(Algorithm::HS512);
        jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| Error::Crypto(format!("failed to sign token: {e}")))
    }

    /// Check that a bearer token is signed by us, unexpired,
    /// unrevoked, and originating from the bound client. On success
    /// the unpacked claims are returned.
    pub async fn validate(&self, bearer: &str, client_id_cookie: &str) -> Result<Claims> {
        let signed = bearer
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::invalid_token("bearer token expected"))?;

        let mut validation = Validation::new(Algorithm::HS512);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp"]);

        let decoded = jsonwebtoken::decode::<Claims>(
            signed,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                Error::invalid_token("token is expired")
            }
            _ => Error::invalid_token("token is invalid"),
        })?;
        let claims = decoded.claims;

        if claims.user_id.is_empty() {
            return Err(Error::invalid_token("token is not associated with user"));
        }

        let secret = URL_SAFE_NO_PAD
            .decode(client_id_cookie)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| Error::invalid_token("token source is invalid"))?;

        if !crypto::hash_eq(&secret, &claims.client_id_hash) {
            return Err(Error::invalid_token("token source is invalid"));
        }

        if self.ledger.get(&ledger_key(&claims.id)).await?.is_some() {
            return Err(Error::invalid_token("token is revoked"));
        }

        Ok(claims)
    }

    /// Revoke a token by ID for the given duration. The duration must
    /// cover the token's remaining validity so it cannot resurrect.
    pub async fn revoke(&self, token_id: &str, duration: Duration) -> Result<()> {
        self.ledger
            .set(&ledger_key(token_id), "revoked", duration)
            .await
    }

    /// Check whether a claim can be refreshed with the presented
    /// refresh token. All failures collapse to a single error so a
    /// caller cannot discriminate between a bad token and an expired
    /// envelope.
    pub fn refreshable(&self, claims: &Claims, refresh_token: &str) -> Result<()> {
        let invalid = || Error::invalid_token("refresh token is invalid");

        let decoded = URL_SAFE_NO_PAD.decode(refresh_token).map_err(|_| invalid())?;
        let json = String::from_utf8(decoded).map_err(|_| invalid())?;

        if !crypto::hash_eq(&json, &claims.refresh_token_hash) {
            return Err(invalid());
        }

        let envelope: RefreshEnvelope = serde_json::from_str(&json).map_err(|_| invalid())?;
        if Utc::now().timestamp() >= envelope.expires_at {
            return Err(invalid());
        }

        Ok(())
    }

    /// The instant a token stops being refreshable: the refresh
    /// envelope's expiry, falling back to the claim expiry when the
    /// envelope cannot be read.
    pub fn refreshable_till(&self, claims: &Claims, refresh_token: &str) -> DateTime<Utc> {
        let fallback = DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);

        URL_SAFE_NO_PAD
            .decode(refresh_token)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<RefreshEnvelope>(&bytes).ok())
            .and_then(|env| DateTime::from_timestamp(env.expires_at, 0))
            .unwrap_or(fallback)
    }

    /// The secure cookie binding a minted token to its client.
    pub fn cookie(&self, minted: &Minted) -> Cookie {
        Cookie {
            name: CLIENT_ID_COOKIE.into(),
            value: minted.client_id.clone(),
            domain: self.cookie_domain.clone(),
            path: "/".into(),
            max_age_secs: self.cookie_max_age_secs,
            secure: true,
            http_only: true,
        }
    }

    fn gen_token_id(&self, options: &TokenOptions) -> String {
        match &options.refresh_of {
            Some(claims) => claims.id.clone(),
            None => Ulid::new().to_string(),
        }
    }

    fn gen_client_id(&self, options: &TokenOptions) -> Result<(String, String)> {
        if let Some(claims) = &options.refresh_of {
            return Ok((String::new(), claims.client_id_hash.clone()));
        }

        let secret = crypto::random_string(CLIENT_ID_LEN)?;
        let hash = crypto::hash(&secret);
        Ok((URL_SAFE_NO_PAD.encode(secret.as_bytes()), hash))
    }

    fn gen_otp(&self, options: &TokenOptions, user: &User) -> Result<(String, String)> {
        let Some(method) = options.delivery_method else {
            return Ok((String::new(), String::new()));
        };

        let address = match &options.delivery_address {
            Some(address) if !address.is_empty() => address.clone(),
            _ => user
                .default_otp_address(method)
                .map(str::to_string)
                .ok_or_else(|| Error::invalid_field("address", "delivery address is not valid"))?,
        };

        otp::otp_code(&address, method, self.otp_ttl)
    }

    fn gen_refresh_token(
        &self,
        options: &TokenOptions,
        state: TokenState,
    ) -> Result<(String, String)> {
        if let Some(claims) = &options.refresh_of {
            return Ok((String::new(), claims.refresh_token_hash.clone()));
        }

        if state != TokenState::Authorized {
            return Ok((String::new(), String::new()));
        }

        let envelope = RefreshEnvelope {
            code: crypto::random_string(REFRESH_TOKEN_LEN)?,
            expires_at: Utc::now().timestamp() + self.refresh_ttl.as_secs() as i64,
        };
        let json = serde_json::to_string(&envelope)
            .map_err(|e| Error::internal(format!("refresh envelope encode: {e}")))?;
        let hash = crypto::hash(&json);

        Ok((URL_SAFE_NO_PAD.encode(json.as_bytes()), hash))
    }
}
