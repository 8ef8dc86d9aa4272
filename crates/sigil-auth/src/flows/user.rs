//! User account update flows: MFA configuration and password change.

use sigil_core::{
    Claims, Error, PasswordMode, RepositoryManager, Result, TokenState, User, UserRepository,
};

use crate::config::PolicyConfig;
use crate::flows::{require_state, user_for_claims};
use crate::{crypto, otp};

/// Requested MFA channel changes. Unset fields are left untouched.
#[derive(Debug, Default)]
pub struct MfaUpdate {
    pub is_code_allowed: Option<bool>,
    pub is_email_otp_allowed: Option<bool>,
    pub is_phone_otp_allowed: Option<bool>,
    pub is_totp_allowed: Option<bool>,
    /// Confirms TOTP enrollment. Enabling TOTP without a code issues
    /// a fresh secret and returns enrollment material instead of
    /// activating the channel.
    pub totp_code: Option<String>,
}

/// TOTP enrollment material for the authenticator app.
#[derive(Debug)]
pub struct TotpEnrollment {
    pub secret_base32: String,
    pub uri: String,
}

/// Result of an MFA update.
#[derive(Debug)]
pub struct MfaUpdateOutcome {
    pub user: User,
    /// Present when TOTP enrollment was (re)started.
    pub totp_enrollment: Option<TotpEnrollment>,
}

/// Orchestrates account configuration changes for an authorized user.
#[derive(Debug, Clone)]
pub struct UserService<M> {
    repo: M,
    policy: PolicyConfig,
}

impl<M: RepositoryManager> UserService<M> {
    pub fn new(repo: M, policy: PolicyConfig) -> Self {
        Self { repo, policy }
    }

    /// Apply an MFA delta under a row lock. The user must retain at
    /// least one authentication path: a stored password (when the
    /// deployment requires passwords) or any enabled MFA channel.
    ///
    /// Enabling TOTP is a two-step exchange: the first call issues
    /// the secret and returns the otpauth URI; a second call carrying
    /// a valid code activates the channel.
    pub async fn update_mfa(&self, claims: &Claims, update: MfaUpdate) -> Result<MfaUpdateOutcome> {
        require_state(claims, TokenState::Authorized)?;
        user_for_claims(&self.repo, claims).await?;

        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            let mut user = tx.user().get_for_update(&claims.user_id).await?;

            if let Some(allowed) = update.is_code_allowed {
                user.is_code_allowed = allowed;
            }
            if let Some(allowed) = update.is_email_otp_allowed {
                user.is_email_otp_allowed = allowed;
            }
            if let Some(allowed) = update.is_phone_otp_allowed {
                user.is_phone_otp_allowed = allowed;
            }

            let mut enrollment = None;
            match update.is_totp_allowed {
                Some(true) if !user.is_totp_allowed => {
                    enrollment = self.enable_totp(&mut user, update.totp_code.as_deref())?;
                }
                Some(false) => user.is_totp_allowed = false,
                _ => {}
            }

            let any_mfa = user.is_code_allowed
                || user.is_totp_allowed
                || user.is_device_allowed
                || user.is_email_otp_allowed
                || user.is_phone_otp_allowed;
            let password_fallback = !user.password.is_empty()
                && self.policy.password_mode == PasswordMode::Password;
            if !any_mfa && !password_fallback {
                return Err(Error::invalid_field(
                    "mfa",
                    "at least one authentication option is required",
                ));
            }

            let user = tx.user().update(&user).await?;
            Ok(MfaUpdateOutcome {
                user,
                totp_enrollment: enrollment,
            })
        })
        .await
    }

    /// Change the user's password under a row lock. The current
    /// password must be presented when one is set.
    pub async fn update_password(
        &self,
        claims: &Claims,
        current_password: Option<&str>,
        new_password: &str,
    ) -> Result<User> {
        require_state(claims, TokenState::Authorized)?;

        if new_password.chars().count() < self.policy.min_password_length {
            return Err(Error::invalid_field(
                "password",
                format!(
                    "password must be at least {} characters",
                    self.policy.min_password_length
                ),
            ));
        }

        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            let mut user = tx.user().get_for_update(&claims.user_id).await?;

            if !user.password.is_empty() {
                let current = current_password
                    .ok_or_else(|| Error::invalid_field("password", "incorrect password"))?;
                let valid = crypto::password_verify(
                    current,
                    &user.password,
                    self.policy.pepper.as_deref(),
                )?;
                if !valid {
                    return Err(Error::invalid_field("password", "incorrect password"));
                }
            }

            user.password = crypto::password_hash(new_password, self.policy.pepper.as_deref())?;
            tx.user().update(&user).await
        })
        .await
    }

    fn enable_totp(
        &self,
        user: &mut User,
        totp_code: Option<&str>,
    ) -> Result<Option<TotpEnrollment>> {
        let key = self
            .policy
            .tfa_encryption_key
            .as_ref()
            .ok_or_else(|| Error::Crypto("TFA encryption key not configured".into()))?;

        match totp_code {
            None => {
                let (secret, base32, uri) =
                    otp::totp_enrollment(&self.policy.totp_issuer, user.default_name())?;
                user.tfa_secret = crypto::encrypt_secret(key, &secret)?;
                Ok(Some(TotpEnrollment {
                    secret_base32: base32,
                    uri,
                }))
            }
            Some(code) => {
                if user.tfa_secret.is_empty() {
                    return Err(Error::invalid_field("code", "TOTP enrollment has not started"));
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

                user.is_totp_allowed = true;
                Ok(None)
            }
        }
    }
}
