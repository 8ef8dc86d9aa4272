//! Flow orchestrators: signup, login, device management, token
//! lifecycle, and user account updates.
//!
//! Each flow assumes its caller already validated the bearer token
//! where one is required; flows receive the unpacked [`Claims`] and
//! enforce state-machine rules from there. All MFA promotion paths
//! converge on [`grant_session`] so their post-conditions are
//! identical.

use std::collections::HashMap;

use chrono::Utc;

use sigil_core::{
    Claims, DeliveryMethod, Error, IdentityField, KeyValueStore, LoginHistory,
    LoginHistoryRepository, Message, MessageTemplate, MessagingService, RepositoryManager,
    Result, TokenState, User, UserRepository,
};

use crate::otp::OtpEnvelope;
use crate::token::{Cookie, Minted, TokenOptions, TokenService};

pub mod device;
pub mod login;
pub mod signup;
pub mod token;
pub mod user;

pub use device::DeviceService;
pub use login::{LoginRequest, LoginService};
pub use signup::{SignUpRequest, SignUpService};
pub use token::TokenFlowService;
pub use user::{MfaUpdate, MfaUpdateOutcome, TotpEnrollment, UserService};

/// A signed token handed back to a client, with the client-binding
/// cookie and, on authorized issuance, the one-time refresh envelope.
#[derive(Debug)]
pub struct SessionPayload {
    pub token: String,
    /// Absent on refresh: the cookie is already set on the client.
    pub cookie: Option<Cookie>,
    pub refresh_token: Option<String>,
}

pub(crate) fn identity_field(kind: DeliveryMethod) -> IdentityField {
    match kind {
        DeliveryMethod::Phone => IdentityField::Phone,
        DeliveryMethod::Email => IdentityField::Email,
    }
}

pub(crate) fn require_state(claims: &Claims, state: TokenState) -> Result<()> {
    if claims.state != state {
        return Err(Error::invalid_token("token state is invalid"));
    }
    Ok(())
}

/// Load the user a claim refers to. A token may be cryptographically
/// valid while its user row no longer exists (e.g. after an
/// unverified signup was re-created); that is an invalid token, not a
/// not-found.
pub(crate) async fn user_for_claims<M: RepositoryManager>(repo: &M, claims: &Claims) -> Result<User> {
    repo.user()
        .by_id(&claims.user_id)
        .await
        .map_err(|err| match err {
            Error::NotFound { .. } => Error::invalid_token("token is not associated with user"),
            other => other,
        })
}

/// Mint an authorized token for a user, record the login, and build
/// the response payload. Every promotion path ends here.
pub(crate) async fn grant_session<M, K>(
    repo: &M,
    tokens: &TokenService<K>,
    user: &User,
) -> Result<SessionPayload>
where
    M: RepositoryManager,
    K: KeyValueStore,
{
    let minted = tokens.create(user, TokenState::Authorized, TokenOptions::default())?;
    let signed = tokens.sign(&minted.claims)?;

    let now = Utc::now();
    repo.login_history()
        .create(LoginHistory {
            token_id: minted.claims.id.clone(),
            user_id: user.id.clone(),
            is_revoked: false,
            expires_at: tokens.refreshable_till(&minted.claims, &minted.refresh_token),
            created_at: now,
            updated_at: now,
        })
        .await?;

    Ok(SessionPayload {
        token: signed,
        cookie: Some(tokens.cookie(&minted)),
        refresh_token: Some(minted.refresh_token),
    })
}

/// Queue the OTP carried by a freshly minted token for delivery. The
/// destination and channel are recovered from the token's own hash
/// envelope; no-op for tokens without one.
pub(crate) async fn send_otp_message<G: MessagingService>(
    messenger: &G,
    minted: &Minted,
    template: MessageTemplate,
) -> Result<()> {
    if minted.claims.code_hash.is_empty() {
        return Ok(());
    }

    let envelope = OtpEnvelope::parse(&minted.claims.code_hash)?;
    let mut vars = HashMap::new();
    vars.insert("code".to_string(), minted.code.clone());

    messenger
        .send(Message {
            template,
            delivery: envelope.method,
            address: envelope.address,
            vars,
        })
        .await
}
