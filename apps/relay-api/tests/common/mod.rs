use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use relay_api::auth::provider::{IdentityProvider, TokenSet};
use relay_api::auth::sessions::SessionStore;
use relay_api::auth::IdentityGateway;
use relay_api::blocklist::BlockRegistry;
use relay_api::config::Config;
use relay_api::db::kv::{DocumentStore, MemoryStore};
use relay_api::error::RelayError;
use relay_api::history::HistoryLog;
use relay_api::models::identity::{ProviderIdentity, PublicIdentity};
use relay_api::relay::chat::ChatClient;
use relay_api::relay::registry::ConnectionRegistry;
use relay_api::relay::service::ChannelRelay;
use relay_api::AppState;

pub const TEST_SUBJECT: &str = "123456789012345678";

/// Recording fake for the chat platform.
pub struct MockChatClient {
    counter: AtomicU64,
    pub created: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub create_delay: Mutex<Option<Duration>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            created: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            create_delay: Mutex::new(None),
        }
    }

    pub fn created_channels(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn deleted_channels(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn create_support_channel(&self, client_id: &str) -> Result<String, RelayError> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RelayError::ChannelCreate("simulated failure".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let channel_id = format!("chan_{n}_{client_id}");
        self.created.lock().unwrap().push(channel_id.clone());
        Ok(channel_id)
    }

    async fn send_to_channel(&self, channel_id: &str, content: &str) -> Result<(), RelayError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), RelayError> {
        self.deleted.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }
}

/// Canned identity provider: `code=good` exchanges successfully, everything
/// else fails the way the real provider would.
pub struct MockProvider {
    pub revoked: Mutex<HashSet<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            revoked: Mutex::new(HashSet::new()),
        }
    }

    pub fn revoke(&self, token: &str) {
        self.revoked.lock().unwrap().insert(token.to_string());
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://provider.test/authorize?state={state}")
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, RelayError> {
        match code {
            "good" => Ok(TokenSet {
                access_token: "tok_good".to_string(),
                refresh_token: Some("rt_good".to_string()),
            }),
            "no_token" => Err(RelayError::NoAccessToken),
            _ => Err(RelayError::NoAccessToken),
        }
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ProviderIdentity, RelayError> {
        if access_token != "tok_good" {
            return Err(RelayError::NoIdentity);
        }
        Ok(ProviderIdentity {
            id: TEST_SUBJECT.to_string(),
            username: "visitor".to_string(),
            avatar: None,
        })
    }

    async fn validate_token(&self, access_token: &str) -> Result<bool, RelayError> {
        Ok(!self.revoked.lock().unwrap().contains(access_token))
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        base_url: "http://localhost".to_string(),
        discord_token: "test-token".to_string(),
        discord_client_id: "cid".to_string(),
        discord_client_secret: "secret".to_string(),
        guild_id: 1,
        support_category_id: 2,
        support_channel_id: 3,
    }
}

/// Build a test AppState wired to in-memory fakes.
pub fn test_state() -> (AppState, Arc<MockChatClient>, Arc<MockProvider>) {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockProvider::new());
    let sessions = SessionStore::new(store.clone());
    let gateway = Arc::new(IdentityGateway::new(
        store.clone(),
        provider.clone(),
        sessions,
    ));

    let blocks = BlockRegistry::new(store.clone());
    let history = HistoryLog::new(store.clone());

    let chat = Arc::new(MockChatClient::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let relay = Arc::new(ChannelRelay::new(
        registry,
        chat.clone(),
        blocks.clone(),
        history.clone(),
    ));

    let state = AppState {
        store,
        gateway,
        blocks,
        history,
        relay,
        config: Arc::new(test_config()),
    };
    (state, chat, provider)
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, Arc<MockChatClient>, Arc<MockProvider>) {
    let (state, chat, provider) = test_state();
    let app = relay_api::routes::router().with_state(state.clone());
    (app, state, chat, provider)
}

/// A session store over the same backing store as the app, for seeding
/// sessions directly in tests.
pub fn session_store(state: &AppState) -> SessionStore {
    SessionStore::new(state.store.clone())
}

pub fn test_identity() -> PublicIdentity {
    PublicIdentity {
        id: TEST_SUBJECT.to_string(),
        username: "visitor".to_string(),
        avatar: None,
    }
}
