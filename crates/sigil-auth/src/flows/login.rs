//! Login flow and its MFA promotion paths.

use webauthn_rs::prelude::PublicKeyCredential;

use sigil_core::{
    Claims, DeliveryMethod, DeviceRepository, Error, KeyValueStore, MessageTemplate,
    MessagingService, PasswordMode, RepositoryManager, Result, TokenState, User, UserRepository,
};

use crate::config::PolicyConfig;
use crate::flows::{
    SessionPayload, grant_session, identity_field, require_state, send_otp_message,
    user_for_claims,
};
use crate::token::{TokenOptions, TokenService};
use crate::webauthn::{WebAuthnService, ensure_counter_advances};
use crate::{crypto, otp};

/// Decoded login request.
#[derive(Debug)]
pub struct LoginRequest {
    pub kind: DeliveryMethod,
    pub identity: String,
    pub password: Option<String>,
}

/// Orchestrates the identify step and the code/TOTP/device
/// verification steps of login.
#[derive(Debug, Clone)]
pub struct LoginService<M, K, G> {
    repo: M,
    tokens: TokenService<K>,
    webauthn: WebAuthnService<K>,
    messenger: G,
    policy: PolicyConfig,
}

impl<M, K, G> LoginService<M, K, G>
where
    M: RepositoryManager,
    K: KeyValueStore + Clone,
    G: MessagingService,
{
    pub fn new(
        repo: M,
        tokens: TokenService<K>,
        webauthn: WebAuthnService<K>,
        messenger: G,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            repo,
            tokens,
            webauthn,
            messenger,
            policy,
        }
    }

    /// Identify a user and open a pre-authorized session. Unknown
    /// identities, wrong passwords, and unverified accounts all
    /// produce the same public failure.
    pub async fn login(&self, req: LoginRequest) -> Result<SessionPayload> {
        let generic = || Error::invalid_field("identity", "invalid identity or password");

        let user = match self
            .repo
            .user()
            .by_identity(identity_field(req.kind), &req.identity)
            .await
        {
            Ok(user) => user,
            Err(Error::NotFound { .. }) => return Err(generic()),
            Err(err) => return Err(err),
        };

        if self.policy.password_mode == PasswordMode::Password {
            let password = req.password.as_deref().ok_or_else(generic)?;
            if user.password.is_empty()
                || !crypto::password_verify(password, &user.password, self.policy.pepper.as_deref())?
            {
                return Err(generic());
            }
        }

        if !user.is_verified {
            return Err(generic());
        }

        let mut options = TokenOptions::default();
        if user.is_code_allowed && user.default_otp_address(req.kind).is_some() {
            options.delivery_method = Some(req.kind);
        }

        let minted = self
            .tokens
            .create(&user, TokenState::PreAuthorized, options)?;
        let signed = self.tokens.sign(&minted.claims)?;

        send_otp_message(&self.messenger, &minted, MessageTemplate::OtpLogin).await?;

        Ok(SessionPayload {
            token: signed,
            cookie: Some(self.tokens.cookie(&minted)),
            refresh_token: None,
        })
    }

    /// Complete login with the delivered code or a TOTP code,
    /// whichever the pre-authorized token calls for.
    pub async fn verify_code(&self, claims: &Claims, code: &str) -> Result<SessionPayload> {
        require_state(claims, TokenState::PreAuthorized)?;
        let user = user_for_claims(&self.repo, claims).await?;

        if !claims.code_hash.is_empty() {
            otp::validate_otp(code, &claims.code_hash)?;
        } else if user.is_totp_allowed {
            self.verify_totp(&user, code)?;
        } else {
            return Err(Error::invalid_field("code", "code verification is not enabled"));
        }

        grant_session(&self.repo, &self.tokens, &user).await
    }

    /// Credential-request options for completing login with a device.
    pub async fn device_challenge(&self, claims: &Claims) -> Result<serde_json::Value> {
        require_state(claims, TokenState::PreAuthorized)?;
        let user = user_for_claims(&self.repo, claims).await?;
        if !user.is_device_allowed {
            return Err(Error::invalid_field("device", "device login is not enabled"));
        }

        let devices = self.repo.device().by_user_id(&user.id).await?;
        self.webauthn.begin_login(&user, &devices).await
    }

    /// Complete login by verifying a device assertion. The signature
    /// counter advances in the same transaction that accepts the
    /// assertion.
    pub async fn verify_device(
        &self,
        claims: &Claims,
        credential: &PublicKeyCredential,
    ) -> Result<SessionPayload> {
        require_state(claims, TokenState::PreAuthorized)?;
        let user = user_for_claims(&self.repo, claims).await?;

        let devices = self.repo.device().by_user_id(&user.id).await?;
        let verified = self.webauthn.finish_login(&user, &devices, credential).await?;

        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            let mut locked = tx.device().get_for_update(&verified.id).await?;
            ensure_counter_advances(&locked, verified.sign_count)?;
            locked.sign_count = verified.sign_count;
            tx.device().update(&locked).await
        })
        .await?;

        grant_session(&self.repo, &self.tokens, &user).await
    }

    fn verify_totp(&self, user: &User, code: &str) -> Result<()> {
        let key = self
            .policy
            .tfa_encryption_key
            .as_ref()
            .ok_or_else(|| Error::Crypto("TFA encryption key not configured".into()))?;
        if user.tfa_secret.is_empty() {
            return Err(Error::invalid_field("code", "TOTP is not enrolled"));
        }

        let secret = crypto::decrypt_secret(key, &user.tfa_secret)?;
        let valid = otp::verify_totp(
            &secret,
            code,
            &self.policy.totp_issuer,
            user.default_name(),
        )?;
        if !valid {
            return Err(Error::invalid_field("code", "incorrect code provided"));
        }
        Ok(())
    }
}
