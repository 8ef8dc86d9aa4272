//! Login flow tests: identification, code and TOTP promotion, and
//! the non-enumeration posture.

mod common;

use sigil_auth::flows::{LoginRequest, MfaUpdate};
use sigil_core::repository::{LoginHistoryRepository, RepositoryManager, UserRepository};
use sigil_core::{DeliveryMethod, Error, MessageTemplate, TokenState};
use totp_rs::{Algorithm, Secret, TOTP};

use common::{email_login, env, signed_up_user, unpack};

#[tokio::test]
async fn login_happy_path_with_code() {
    let env = env();
    signed_up_user(&env, "jane@example.com").await;

    let pre = env.login.login(email_login("jane@example.com")).await.unwrap();
    let pre_claims = unpack(&env, &pre).await;
    assert_eq!(pre_claims.state, TokenState::PreAuthorized);
    assert!(!pre_claims.code_hash.is_empty());
    assert!(pre.refresh_token.is_none());

    let message = env.messenger.sent.lock().unwrap().last().unwrap().clone();
    assert_eq!(message.template, MessageTemplate::OtpLogin);

    let code = env.messenger.last_code();
    let session = env.login.verify_code(&pre_claims, &code).await.unwrap();
    let claims = unpack(&env, &session).await;
    assert_eq!(claims.state, TokenState::Authorized);
    assert!(session.refresh_token.is_some());

    // A second login record exists now (signup verify plus this one).
    let logins = env
        .repo
        .login_history()
        .by_user_id(&claims.user_id, 10, 0)
        .await
        .unwrap();
    assert_eq!(logins.len(), 2);
}

#[tokio::test]
async fn unknown_identity_and_wrong_password_are_indistinguishable() {
    let env = env();
    signed_up_user(&env, "jane@example.com").await;

    let unknown = env
        .login
        .login(email_login("nobody@example.com"))
        .await
        .unwrap_err();
    let wrong = env
        .login
        .login(LoginRequest {
            kind: DeliveryMethod::Email,
            identity: "jane@example.com".into(),
            password: Some("not-the-password".into()),
        })
        .await
        .unwrap_err();

    assert_eq!(unknown.code(), wrong.code());
    assert_eq!(unknown.to_string(), wrong.to_string());
}

#[tokio::test]
async fn unverified_user_cannot_login() {
    let env = env();

    env.signup
        .sign_up(sigil_auth::flows::SignUpRequest {
            kind: DeliveryMethod::Email,
            identity: "jane@example.com".into(),
            password: Some("swordfish42!".into()),
        })
        .await
        .unwrap();

    let err = env.login.login(email_login("jane@example.com")).await.unwrap_err();
    let unknown = env
        .login
        .login(email_login("nobody@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), unknown.to_string());
}

#[tokio::test]
async fn wrong_code_does_not_grant_session() {
    let env = env();
    signed_up_user(&env, "jane@example.com").await;

    let pre = env.login.login(email_login("jane@example.com")).await.unwrap();
    let pre_claims = unpack(&env, &pre).await;

    let code = env.messenger.last_code();
    let wrong = if code == "000000" { "111111" } else { "000000" };
    let err = env.login.verify_code(&pre_claims, wrong).await.unwrap_err();
    assert!(matches!(err, Error::InvalidField { .. }));
}

#[tokio::test]
async fn authorized_token_cannot_reenter_verification() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    let err = env.login.verify_code(&claims, "123456").await.unwrap_err();
    assert!(matches!(err, Error::InvalidToken(_)));
}

#[tokio::test]
async fn totp_login_path() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    // Enroll TOTP: first call issues the secret, second confirms it.
    let outcome = env
        .users
        .update_mfa(
            &claims,
            MfaUpdate {
                is_totp_allowed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let enrollment = outcome.totp_enrollment.expect("expected enrollment material");
    assert!(enrollment.uri.starts_with("otpauth://totp/"));
    assert!(!outcome.user.is_totp_allowed);

    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(enrollment.secret_base32.clone())
            .to_bytes()
            .unwrap(),
        Some("SIGIL".into()),
        "jane@example.com".into(),
    )
    .unwrap();

    let confirm = env
        .users
        .update_mfa(
            &claims,
            MfaUpdate {
                is_totp_allowed: Some(true),
                totp_code: Some(totp.generate_current().unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(confirm.user.is_totp_allowed);

    // Disable the delivered-code channel so login leaves no envelope.
    env.users
        .update_mfa(
            &claims,
            MfaUpdate {
                is_code_allowed: Some(false),
                is_email_otp_allowed: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let pre = env.login.login(email_login("jane@example.com")).await.unwrap();
    let pre_claims = unpack(&env, &pre).await;
    assert!(pre_claims.code_hash.is_empty());
    assert!(pre_claims.tfa_options.contains(&sigil_core::TfaOption::Totp));

    let session = env
        .login
        .verify_code(&pre_claims, &totp.generate_current().unwrap())
        .await
        .unwrap();
    let claims = unpack(&env, &session).await;
    assert_eq!(claims.state, TokenState::Authorized);
}

#[tokio::test]
async fn totp_cannot_be_confirmed_before_enrollment_starts() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    // No secret has ever been issued, so a guessed code cannot jump
    // straight to activation.
    let err = env
        .users
        .update_mfa(
            &claims,
            MfaUpdate {
                is_totp_allowed: Some(true),
                totp_code: Some("123456".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid code: TOTP enrollment has not started"
    );

    let user = env.repo.user().by_id(&claims.user_id).await.unwrap();
    assert!(!user.is_totp_allowed);
    assert!(user.tfa_secret.is_empty());
}

#[tokio::test]
async fn mfa_update_cannot_strand_a_passwordless_user() {
    let mut policy = common::policy();
    policy.password_mode = sigil_core::PasswordMode::NoPassword;
    let env = common::env_with(common::token_config(), policy);

    // Passwordless signup and verification.
    let pre = env
        .signup
        .sign_up(sigil_auth::flows::SignUpRequest {
            kind: DeliveryMethod::Email,
            identity: "jane@example.com".into(),
            password: None,
        })
        .await
        .unwrap();
    let pre_claims = unpack(&env, &pre).await;
    let code = env.messenger.last_code();
    let session = env.signup.verify(&pre_claims, &code).await.unwrap();
    let claims = unpack(&env, &session).await;

    let err = env
        .users
        .update_mfa(
            &claims,
            MfaUpdate {
                is_code_allowed: Some(false),
                is_email_otp_allowed: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidField { .. }));

    // Nothing was persisted.
    let user = env.repo.user().by_id(&claims.user_id).await.unwrap();
    assert!(user.is_code_allowed);
}

#[tokio::test]
async fn mfa_disable_is_allowed_with_a_password_fallback() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    let outcome = env
        .users
        .update_mfa(
            &claims,
            MfaUpdate {
                is_code_allowed: Some(false),
                is_email_otp_allowed: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!outcome.user.is_code_allowed);
    assert!(!outcome.user.is_email_otp_allowed);
}

#[tokio::test]
async fn password_update_requires_the_current_password() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    let err = env
        .users
        .update_password(&claims, Some("not-the-password"), "a-new-password1!")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidField { .. }));

    env.users
        .update_password(&claims, Some("swordfish42!"), "a-new-password1!")
        .await
        .unwrap();

    // The new password works for login; the old one does not.
    env.login
        .login(LoginRequest {
            kind: DeliveryMethod::Email,
            identity: "jane@example.com".into(),
            password: Some("a-new-password1!".into()),
        })
        .await
        .unwrap();
    let err = env.login.login(email_login("jane@example.com")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidField { .. }));
}
