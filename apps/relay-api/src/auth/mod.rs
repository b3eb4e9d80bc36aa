//! Sign-in flow built on an OAuth identity provider.

pub mod provider;
pub mod rate_limit;
pub mod sessions;
pub mod tokens;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::kv::DocumentStore;
use crate::error::RelayError;
use crate::models::identity::PublicIdentity;

use provider::IdentityProvider;
use rate_limit::AuthRateLimiter;
use sessions::SessionStore;
use tokens::generate_state_token;

const AUTH_STATES_PATH: &str = "auth_states";

/// State tokens not redeemed within this window are rejected.
const STATE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Serialize, Deserialize)]
struct AuthState {
    created_at: DateTime<Utc>,
}

/// Outcome of starting a sign-in.
pub enum BeginAuth {
    /// Redirect the browser to the provider's consent screen.
    Redirect(String),
    /// The address has exhausted its attempt budget.
    RateLimited,
}

/// Orchestrates the OAuth round trip and the resulting sessions.
pub struct IdentityGateway {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionStore,
    rate_limiter: AuthRateLimiter,
}

impl IdentityGateway {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn IdentityProvider>,
        sessions: SessionStore,
    ) -> Self {
        let rate_limiter = AuthRateLimiter::new(store.clone());
        Self {
            store,
            provider,
            sessions,
            rate_limiter,
        }
    }

    /// Start a sign-in from `addr`: mint a single-use state token and build
    /// the provider redirect.
    pub async fn begin_auth(&self, addr: &str) -> Result<BeginAuth, RelayError> {
        if !self.rate_limiter.allow(addr).await? {
            return Ok(BeginAuth::RateLimited);
        }

        let state = generate_state_token();
        self.store
            .set(
                &format!("{AUTH_STATES_PATH}/{state}"),
                serde_json::to_value(&AuthState {
                    created_at: Utc::now(),
                })
                .map_err(crate::error::StoreError::from)?,
            )
            .await?;

        // Abandoned sign-ins never hit the callback, so their state records
        // are only reclaimed here.
        self.prune_expired_states().await?;

        Ok(BeginAuth::Redirect(self.provider.authorize_url(&state)))
    }

    /// Drop state records past their redemption window.
    async fn prune_expired_states(&self) -> Result<(), RelayError> {
        let cutoff = Utc::now() - Duration::minutes(STATE_TTL_MINUTES);
        for (token, value) in self.store.list(AUTH_STATES_PATH).await? {
            let expired = serde_json::from_value::<AuthState>(value)
                .map(|record| record.created_at < cutoff)
                .unwrap_or(true);
            if expired {
                self.store
                    .remove(&format!("{AUTH_STATES_PATH}/{token}"))
                    .await?;
            }
        }
        Ok(())
    }

    /// Complete the sign-in: consume the state token, exchange the code, and
    /// create a session for the fetched identity.
    pub async fn complete_auth(
        &self,
        state: &str,
        code: &str,
    ) -> Result<(String, PublicIdentity), RelayError> {
        self.consume_state(state).await?;

        let tokens = self.provider.exchange_code(code).await?;
        let identity = self.provider.fetch_identity(&tokens.access_token).await?;
        let user = PublicIdentity::from(identity);

        let session_id = self
            .sessions
            .create(user.clone(), tokens.access_token, tokens.refresh_token)
            .await?;
        tracing::info!(user_id = %user.id, "sign-in completed");
        Ok((session_id, user))
    }

    /// Validate a session ID: local expiry first, then provider-side token
    /// revalidation. A session the provider no longer accepts is deleted.
    pub async fn check_session(
        &self,
        session_id: &str,
    ) -> Result<Option<PublicIdentity>, RelayError> {
        let Some(session) = self.sessions.get_valid(session_id).await? else {
            return Ok(None);
        };

        if !self.provider.validate_token(&session.access_token).await? {
            tracing::debug!(%session_id, "provider rejected session token");
            self.sessions.delete(session_id).await?;
            return Ok(None);
        }

        Ok(Some(session.user))
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), RelayError> {
        self.sessions.delete(session_id).await?;
        Ok(())
    }

    /// Remove and validate a state token; single use.
    async fn consume_state(&self, state: &str) -> Result<(), RelayError> {
        let path = format!("{AUTH_STATES_PATH}/{state}");
        let Some(value) = self.store.get(&path).await? else {
            return Err(RelayError::StateMismatch);
        };
        self.store.remove(&path).await?;

        let record: AuthState =
            serde_json::from_value(value).map_err(|_| RelayError::StateMismatch)?;
        if Utc::now() - record.created_at > Duration::minutes(STATE_TTL_MINUTES) {
            return Err(RelayError::StateMismatch);
        }
        Ok(())
    }
}
