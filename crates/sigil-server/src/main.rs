//! SIGIL Server — application entry point.

mod config;
mod messaging;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sigil_auth::{
    DeviceService, LoginService, SignUpService, TokenFlowService, TokenService, UserService,
    WebAuthnService,
};
use sigil_core::Result;
use sigil_db::{PgRepositoryManager, RedisKeyValueStore, connect_postgres, run_migrations};

use config::ServerConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sigil=info".parse().unwrap()))
        .json()
        .init();

    if let Err(err) = run().await {
        error!(error = %err, "server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    info!("starting SIGIL server");
    let config = ServerConfig::from_env()?;

    let pool = connect_postgres(&config.db).await?;
    run_migrations(&pool).await?;
    let repo = PgRepositoryManager::new(pool);

    let ledger = RedisKeyValueStore::connect(&config.redis_url).await?;
    let tokens = TokenService::new(config.token.clone(), ledger.clone());
    let webauthn = WebAuthnService::new(&config.webauthn, ledger.clone())?;

    let (messenger, outbox) = messaging::channel(config.message_queue_depth);
    let consumer = tokio::spawn(messaging::consume(outbox));

    let _signup = SignUpService::new(
        repo.clone(),
        tokens.clone(),
        messenger.clone(),
        config.policy.clone(),
    );
    let _login = LoginService::new(
        repo.clone(),
        tokens.clone(),
        webauthn.clone(),
        messenger.clone(),
        config.policy.clone(),
    );
    let _devices = DeviceService::new(repo.clone(), webauthn.clone());
    let _tokens = TokenFlowService::new(repo.clone(), tokens.clone());
    let _users = UserService::new(repo, config.policy);

    // TODO: mount the HTTP API router over these services.

    info!("SIGIL server ready");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| sigil_core::Error::internal(format!("signal handler: {e}")))?;

    info!("shutting down");
    consumer.abort();
    let _ = consumer.await;

    Ok(())
}
