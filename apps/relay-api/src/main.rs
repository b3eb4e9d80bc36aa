use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::auth::provider::{DiscordOAuth, IdentityProvider};
use relay_api::auth::sessions::SessionStore;
use relay_api::auth::IdentityGateway;
use relay_api::blocklist::BlockRegistry;
use relay_api::config::Config;
use relay_api::db::kv::{DocumentStore, MemoryStore};
use relay_api::history::HistoryLog;
use relay_api::relay::chat::{ChatClient, DiscordChatClient};
use relay_api::relay::registry::ConnectionRegistry;
use relay_api::relay::service::ChannelRelay;
use relay_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    let port = config.port;

    // In-memory document store for single-node deployments. Swap for a
    // hosted backend when one is added.
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

    let provider: Arc<dyn IdentityProvider> = Arc::new(DiscordOAuth::new(
        config.discord_client_id.clone(),
        config.discord_client_secret.clone(),
        config.oauth_redirect_uri(),
    ));
    let sessions = SessionStore::new(store.clone());
    let gateway = Arc::new(IdentityGateway::new(store.clone(), provider, sessions));

    let blocks = BlockRegistry::new(store.clone());
    let history = HistoryLog::new(store.clone());

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let chat: Arc<dyn ChatClient> = Arc::new(DiscordChatClient::new(
        http,
        config.guild_id,
        config.support_category_id,
    ));

    let registry = Arc::new(ConnectionRegistry::new());
    let relay = Arc::new(ChannelRelay::new(
        registry,
        chat,
        blocks.clone(),
        history.clone(),
    ));

    // The bot runs alongside the HTTP server on the same runtime.
    {
        let config = config.clone();
        let relay = relay.clone();
        let blocks = blocks.clone();
        let history = history.clone();
        tokio::spawn(async move {
            if let Err(err) = relay_api::bot::start_bot(config, relay, blocks, history).await {
                tracing::error!(%err, "Discord bot exited");
            }
        });
    }

    let state = AppState {
        store,
        gateway,
        blocks,
        history,
        relay,
        config,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(relay_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "relay-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    // ConnectInfo backs the sign-in rate limiter for direct connections.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
