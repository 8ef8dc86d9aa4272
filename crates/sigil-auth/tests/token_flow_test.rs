//! Token lifecycle flow tests: revocation and refresh.

mod common;

use sigil_core::repository::{LoginHistoryRepository, RepositoryManager};
use sigil_core::{Error, TokenState};

use common::{bearer, env, signed_up_user, unpack};

#[tokio::test]
async fn revocation_invalidates_the_session() {
    let env = env();
    let (payload, claims) = signed_up_user(&env, "jane@example.com").await;
    let cookie = payload.cookie.as_ref().unwrap().value.clone();

    env.token_flows.revoke(&claims, &claims.id).await.unwrap();

    // The same bearer token is now refused.
    let err = env
        .tokens
        .validate(&bearer(&payload.token), &cookie)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid token: token is revoked");

    // The login record is flagged.
    let logins = env
        .repo
        .login_history()
        .by_user_id(&claims.user_id, 10, 0)
        .await
        .unwrap();
    assert!(logins.iter().any(|l| l.token_id == claims.id && l.is_revoked));
}

#[tokio::test]
async fn revoking_twice_is_idempotent() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    env.token_flows.revoke(&claims, &claims.id).await.unwrap();
    env.token_flows.revoke(&claims, &claims.id).await.unwrap();
}

#[tokio::test]
async fn cannot_revoke_another_users_session() {
    let env = env();
    let (_, jane) = signed_up_user(&env, "jane@example.com").await;
    let (_, mallory) = signed_up_user(&env, "mallory@example.com").await;

    let err = env.token_flows.revoke(&mallory, &jane.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    // Jane's session is untouched.
    let logins = env
        .repo
        .login_history()
        .by_user_id(&jane.user_id, 10, 0)
        .await
        .unwrap();
    assert!(!logins[0].is_revoked);
}

#[tokio::test]
async fn refresh_extends_the_session_under_the_same_binding() {
    let env = env();
    let (payload, claims) = signed_up_user(&env, "jane@example.com").await;
    let cookie = payload.cookie.as_ref().unwrap().value.clone();
    let refresh_token = payload.refresh_token.clone().unwrap();

    let refreshed = env
        .token_flows
        .refresh(&claims, &refresh_token)
        .await
        .unwrap();
    // No new cookie or refresh envelope is issued.
    assert!(refreshed.cookie.is_none());
    assert!(refreshed.refresh_token.is_none());

    // The refreshed token validates against the ORIGINAL cookie and
    // keeps the token ID.
    let new_claims = env
        .tokens
        .validate(&bearer(&refreshed.token), &cookie)
        .await
        .unwrap();
    assert_eq!(new_claims.id, claims.id);
    assert_eq!(new_claims.state, TokenState::Authorized);
    assert!(new_claims.exp >= claims.exp);

    // The original refresh envelope still works for the new claim.
    env.tokens.refreshable(&new_claims, &refresh_token).unwrap();
}

#[tokio::test]
async fn refresh_with_a_foreign_envelope_is_rejected() {
    let env = env();
    let (jane_payload, jane) = signed_up_user(&env, "jane@example.com").await;
    let (mallory_payload, _) = signed_up_user(&env, "mallory@example.com").await;
    drop(jane_payload);

    let err = env
        .token_flows
        .refresh(&jane, mallory_payload.refresh_token.as_deref().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidToken(_)));
}

#[tokio::test]
async fn pre_authorized_tokens_cannot_refresh() {
    let env = env();
    signed_up_user(&env, "jane@example.com").await;

    let pre = env
        .login
        .login(common::email_login("jane@example.com"))
        .await
        .unwrap();
    let pre_claims = unpack(&env, &pre).await;

    let err = env
        .token_flows
        .refresh(&pre_claims, "anything")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidToken(_)));
}

#[tokio::test]
async fn verify_echoes_the_claims() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    let echoed = env.token_flows.verify(&claims);
    assert_eq!(echoed.id, claims.id);
    assert_eq!(echoed.user_id, claims.user_id);
}

#[tokio::test]
async fn history_lists_sessions_newest_first() {
    let env = env();
    let (_, claims) = signed_up_user(&env, "jane@example.com").await;

    // A second session via login.
    let pre = env
        .login
        .login(common::email_login("jane@example.com"))
        .await
        .unwrap();
    let pre_claims = unpack(&env, &pre).await;
    let code = env.messenger.last_code();
    env.login.verify_code(&pre_claims, &code).await.unwrap();

    let logins = env.token_flows.history(&claims, 10, 0).await.unwrap();
    assert_eq!(logins.len(), 2);
    assert!(logins[0].created_at >= logins[1].created_at);

    let limited = env.token_flows.history(&claims, 1, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}
