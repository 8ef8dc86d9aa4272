//! Shared harness for flow tests: in-memory stores, a recording
//! messenger, and fully wired services.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use sigil_auth::flows::{LoginRequest, SignUpRequest};
use sigil_auth::{
    DeviceService, LoginService, PolicyConfig, SessionPayload, SignUpService, TokenConfig,
    TokenFlowService, TokenService, UserService, WebAuthnConfig, WebAuthnService,
};
use sigil_core::repository::MessagingService;
use sigil_core::{Claims, DeliveryMethod, Message, Result};
use sigil_db::{MemoryKeyValueStore, MemoryRepositoryManager};

pub const TEST_SECRET: &str = "my-signing-secret";
pub const TEST_TFA_KEY: [u8; 32] = [7u8; 32];

/// Messenger capturing every message instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct RecorderMessenger {
    pub sent: Arc<Mutex<Vec<Message>>>,
}

impl MessagingService for RecorderMessenger {
    async fn send(&self, message: Message) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

impl RecorderMessenger {
    /// The OTP code carried by the most recent message.
    pub fn last_code(&self) -> String {
        self.sent
            .lock()
            .unwrap()
            .last()
            .and_then(|m| m.vars.get("code").cloned())
            .expect("no message with a code was sent")
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

pub struct TestEnv {
    pub repo: MemoryRepositoryManager,
    pub kv: MemoryKeyValueStore,
    pub tokens: TokenService<MemoryKeyValueStore>,
    pub messenger: RecorderMessenger,
    pub signup: SignUpService<MemoryRepositoryManager, MemoryKeyValueStore, RecorderMessenger>,
    pub login: LoginService<MemoryRepositoryManager, MemoryKeyValueStore, RecorderMessenger>,
    pub devices: DeviceService<MemoryRepositoryManager, MemoryKeyValueStore>,
    pub token_flows: TokenFlowService<MemoryRepositoryManager, MemoryKeyValueStore>,
    pub users: UserService<MemoryRepositoryManager>,
}

pub fn token_config() -> TokenConfig {
    TokenConfig {
        secret: TEST_SECRET.into(),
        ..Default::default()
    }
}

pub fn policy() -> PolicyConfig {
    PolicyConfig {
        tfa_encryption_key: Some(TEST_TFA_KEY),
        ..Default::default()
    }
}

pub fn env() -> TestEnv {
    env_with(token_config(), policy())
}

pub fn env_with(token_config: TokenConfig, policy: PolicyConfig) -> TestEnv {
    let repo = MemoryRepositoryManager::new();
    let kv = MemoryKeyValueStore::new();
    let tokens = TokenService::new(token_config, kv.clone());
    let webauthn = WebAuthnService::new(&WebAuthnConfig::default(), kv.clone())
        .expect("webauthn init failed");
    let messenger = RecorderMessenger::default();

    TestEnv {
        signup: SignUpService::new(
            repo.clone(),
            tokens.clone(),
            messenger.clone(),
            policy.clone(),
        ),
        login: LoginService::new(
            repo.clone(),
            tokens.clone(),
            webauthn.clone(),
            messenger.clone(),
            policy.clone(),
        ),
        devices: DeviceService::new(repo.clone(), webauthn),
        token_flows: TokenFlowService::new(repo.clone(), tokens.clone()),
        users: UserService::new(repo.clone(), policy),
        repo,
        kv,
        tokens,
        messenger,
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Unpack a payload's signed token through full validation, using the
/// cookie issued alongside it.
pub async fn unpack(env: &TestEnv, payload: &SessionPayload) -> Claims {
    let cookie = payload.cookie.as_ref().expect("payload has no cookie");
    env.tokens
        .validate(&bearer(&payload.token), &cookie.value)
        .await
        .expect("token failed validation")
}

/// Run the full email signup flow and return the authorized session
/// payload plus its claims.
pub async fn signed_up_user(env: &TestEnv, email: &str) -> (SessionPayload, Claims) {
    let pre = env
        .signup
        .sign_up(SignUpRequest {
            kind: DeliveryMethod::Email,
            identity: email.into(),
            password: Some("swordfish42!".into()),
        })
        .await
        .expect("signup failed");

    let pre_claims = unpack(env, &pre).await;
    let code = env.messenger.last_code();

    let authorized = env
        .signup
        .verify(&pre_claims, &code)
        .await
        .expect("signup verify failed");
    let claims = unpack(env, &authorized).await;

    (authorized, claims)
}

pub fn email_login(identity: &str) -> LoginRequest {
    LoginRequest {
        kind: DeliveryMethod::Email,
        identity: identity.into(),
        password: Some("swordfish42!".into()),
    }
}
