//! User registration flow.

use chrono::Utc;

use sigil_core::{
    Claims, DeliveryMethod, Error, KeyValueStore, MessageTemplate, MessagingService,
    PasswordMode, RepositoryManager, Result, TokenState, User, UserRepository,
};

use crate::config::PolicyConfig;
use crate::flows::{
    SessionPayload, grant_session, identity_field, require_state, send_otp_message,
    user_for_claims,
};
use crate::token::{TokenOptions, TokenService};
use crate::{crypto, otp};

/// Decoded registration request.
#[derive(Debug)]
pub struct SignUpRequest {
    /// Identity kind supplied: phone or email.
    pub kind: DeliveryMethod,
    pub identity: String,
    pub password: Option<String>,
}

/// Orchestrates registration and its OTP verification step.
#[derive(Debug, Clone)]
pub struct SignUpService<M, K, G> {
    repo: M,
    tokens: TokenService<K>,
    messenger: G,
    policy: PolicyConfig,
}

impl<M, K, G> SignUpService<M, K, G>
where
    M: RepositoryManager,
    K: KeyValueStore,
    G: MessagingService,
{
    pub fn new(repo: M, tokens: TokenService<K>, messenger: G, policy: PolicyConfig) -> Self {
        Self {
            repo,
            tokens,
            messenger,
            policy,
        }
    }

    /// Initial registration step. Creates (or transactionally
    /// re-creates) the user and returns a pre-authorized token with an
    /// OTP queued to the registration address.
    ///
    /// A verified identity cannot register again; the response for
    /// that case is indistinguishable from any other registration
    /// refusal.
    pub async fn sign_up(&self, req: SignUpRequest) -> Result<SessionPayload> {
        if !self.policy.identity_kinds.allows(req.kind) {
            return Err(Error::invalid_field("type", "identity type is not supported"));
        }
        validate_identity(req.kind, &req.identity)?;

        let password = self.hash_password(req.password.as_deref())?;
        let new_user = build_user(req.kind, &req.identity, password);

        let user = match self
            .repo
            .user()
            .by_identity(identity_field(req.kind), &req.identity)
            .await
        {
            Ok(existing) if existing.is_verified => {
                // TODO: route verified identities into a password
                // reset OTP flow once one exists.
                return Err(Error::bad_request("cannot register user"));
            }
            Ok(existing) => self.re_create_user(&existing, &new_user).await?,
            Err(Error::NotFound { .. }) => self.repo.user().create(new_user).await?,
            Err(err) => return Err(err),
        };

        let minted = self.tokens.create(
            &user,
            TokenState::PreAuthorized,
            TokenOptions::with_delivery(req.kind),
        )?;
        let signed = self.tokens.sign(&minted.claims)?;

        send_otp_message(&self.messenger, &minted, MessageTemplate::OtpSignup).await?;
        tracing::info!(user_id = %user.id, "signup started");

        Ok(SessionPayload {
            token: signed,
            cookie: Some(self.tokens.cookie(&minted)),
            refresh_token: None,
        })
    }

    /// Final registration step: prove ownership of the registration
    /// address with the delivered code. On success the user is marked
    /// verified and an authorized session is granted.
    pub async fn verify(&self, claims: &Claims, code: &str) -> Result<SessionPayload> {
        require_state(claims, TokenState::PreAuthorized)?;
        let user = user_for_claims(&self.repo, claims).await?;

        otp::validate_otp(code, &claims.code_hash)?;

        let tx = self.repo.with_transaction().await?;
        let user = tx
            .with_atomic(async {
                let mut locked = tx.user().get_for_update(&user.id).await?;
                locked.is_verified = true;
                tx.user().update(&locked).await
            })
            .await?;

        tracing::info!(user_id = %user.id, "signup verified");
        grant_session(&self.repo, &self.tokens, &user).await
    }

    /// Reset a dangling unverified registration under a row lock. The
    /// user keeps the restarted flow's credentials and receives a
    /// fresh ID and timestamps, as if newly registered.
    async fn re_create_user(&self, existing: &User, new_user: &User) -> Result<User> {
        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            let mut locked = tx.user().get_for_update(&existing.id).await?;
            if locked.is_verified {
                return Err(Error::bad_request("cannot register user"));
            }

            locked.phone = new_user.phone.clone();
            locked.email = new_user.email.clone();
            locked.password = new_user.password.clone();
            locked.tfa_secret = new_user.tfa_secret.clone();
            locked.is_email_otp_allowed = new_user.is_email_otp_allowed;
            locked.is_phone_otp_allowed = new_user.is_phone_otp_allowed;

            tx.user().re_create(locked).await
        })
        .await
    }

    fn hash_password(&self, password: Option<&str>) -> Result<String> {
        let password = match (self.policy.password_mode, password) {
            (PasswordMode::Password, None) => {
                return Err(Error::invalid_field("password", "password is required"));
            }
            (PasswordMode::NoPassword, None) => return Ok(String::new()),
            (_, Some(password)) => password,
        };

        if password.chars().count() < self.policy.min_password_length {
            return Err(Error::invalid_field(
                "password",
                format!(
                    "password must be at least {} characters",
                    self.policy.min_password_length
                ),
            ));
        }

        crypto::password_hash(password, self.policy.pepper.as_deref())
    }
}

/// A registration row for the supplied identity. MFA starts at the
/// delivered-code channel for that identity; the TFA secret stays
/// empty until TOTP enrollment issues one.
fn build_user(kind: DeliveryMethod, identity: &str, password: String) -> User {
    let now = Utc::now();
    User {
        id: String::new(),
        phone: (kind == DeliveryMethod::Phone).then(|| identity.to_string()),
        email: (kind == DeliveryMethod::Email).then(|| identity.to_string()),
        password,
        tfa_secret: String::new(),
        is_code_allowed: true,
        is_totp_allowed: false,
        is_device_allowed: false,
        is_email_otp_allowed: kind == DeliveryMethod::Email,
        is_phone_otp_allowed: kind == DeliveryMethod::Phone,
        is_verified: false,
        created_at: now,
        updated_at: now,
    }
}

fn validate_identity(kind: DeliveryMethod, identity: &str) -> Result<()> {
    let ok = match kind {
        DeliveryMethod::Email => {
            identity.contains('@') && !identity.contains(char::is_whitespace)
        }
        DeliveryMethod::Phone => {
            identity.starts_with('+')
                && identity.len() >= 8
                && identity[1..].chars().all(|c| c.is_ascii_digit())
        }
    };

    if !ok {
        return Err(Error::invalid_field("identity", "identity format is invalid"));
    }
    Ok(())
}
