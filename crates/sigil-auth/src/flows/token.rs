//! Token lifecycle flow: verification echo, revocation, and refresh.

use chrono::Utc;

use sigil_core::{
    Claims, Error, KeyValueStore, LoginHistory, LoginHistoryRepository, RepositoryManager,
    Result, TokenState,
};

use crate::flows::{SessionPayload, require_state, user_for_claims};
use crate::token::{TokenOptions, TokenService};

/// Orchestrates token revocation and refresh for authorized sessions.
#[derive(Debug, Clone)]
pub struct TokenFlowService<M, K> {
    repo: M,
    tokens: TokenService<K>,
}

impl<M, K> TokenFlowService<M, K>
where
    M: RepositoryManager,
    K: KeyValueStore,
{
    pub fn new(repo: M, tokens: TokenService<K>) -> Self {
        Self { repo, tokens }
    }

    /// Echo the validated claims. Validation itself happened at the
    /// boundary; a 200 here proves the token is live.
    pub fn verify(&self, claims: &Claims) -> Claims {
        claims.clone()
    }

    /// Revoke a session token owned by the caller. The ledger entry
    /// outlives the session's refresh horizon so the ID cannot
    /// resurrect, and the login record is flagged in the same
    /// transaction.
    pub async fn revoke(&self, claims: &Claims, token_id: &str) -> Result<()> {
        let tx = self.repo.with_transaction().await?;
        tx.with_atomic(async {
            let mut login = tx.login_history().get_for_update(token_id).await?;
            if login.user_id != claims.user_id {
                return Err(Error::not_found("login", token_id));
            }

            if login.is_revoked {
                return Ok(());
            }

            let remaining = (login.expires_at - Utc::now()).to_std().unwrap_or_default();
            if !remaining.is_zero() {
                self.tokens.revoke(token_id, remaining).await?;
            }

            login.is_revoked = true;
            tx.login_history().update(&login).await?;
            tracing::info!(token_id, "token revoked");
            Ok(())
        })
        .await
    }

    /// Mint a successor for an authorized token. The ID, client
    /// binding, and refresh hash carry over; only the expiry moves.
    pub async fn refresh(&self, claims: &Claims, refresh_token: &str) -> Result<SessionPayload> {
        require_state(claims, TokenState::Authorized)?;
        self.tokens.refreshable(claims, refresh_token)?;

        let user = user_for_claims(&self.repo, claims).await?;

        let minted = self.tokens.create(
            &user,
            TokenState::Authorized,
            TokenOptions::refreshing(claims.clone()),
        )?;
        let signed = self.tokens.sign(&minted.claims)?;

        Ok(SessionPayload {
            token: signed,
            cookie: None,
            refresh_token: None,
        })
    }

    /// Recent login records for the caller, newest first.
    pub async fn history(
        &self,
        claims: &Claims,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LoginHistory>> {
        require_state(claims, TokenState::Authorized)?;
        self.repo
            .login_history()
            .by_user_id(&claims.user_id, limit, offset)
            .await
    }
}
