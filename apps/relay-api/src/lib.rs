pub mod auth;
pub mod blocklist;
pub mod bot;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod models;
pub mod relay;
pub mod routes;

use std::sync::Arc;

use auth::IdentityGateway;
use blocklist::BlockRegistry;
use config::Config;
use db::kv::DocumentStore;
use history::HistoryLog;
use relay::service::ChannelRelay;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub gateway: Arc<IdentityGateway>,
    pub blocks: BlockRegistry,
    pub history: HistoryLog,
    pub relay: Arc<ChannelRelay>,
    pub config: Arc<Config>,
}
