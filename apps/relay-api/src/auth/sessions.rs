//! Session records keyed by opaque session ID.

use std::sync::Arc;

use chrono::{Duration, Utc};
use relay_common::id::{prefix, prefixed_ulid};

use crate::db::kv::DocumentStore;
use crate::error::StoreError;
use crate::models::identity::PublicIdentity;
use crate::models::session::Session;

const SESSIONS_PATH: &str = "sessions";

/// Session lifetime.
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn DocumentStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create a session and return its ID.
    pub async fn create(
        &self,
        user: PublicIdentity,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<String, StoreError> {
        let session_id = prefixed_ulid(prefix::SESSION);
        let now = Utc::now();
        let session = Session {
            user,
            access_token,
            refresh_token,
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        };
        self.store
            .set(
                &format!("{SESSIONS_PATH}/{session_id}"),
                serde_json::to_value(&session)?,
            )
            .await?;
        Ok(session_id)
    }

    /// Fetch a session if it exists and has not expired. A lapsed record is
    /// removed on read.
    pub async fn get_valid(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let path = format!("{SESSIONS_PATH}/{session_id}");
        let Some(value) = self.store.get(&path).await? else {
            return Ok(None);
        };

        let session: Session = match serde_json::from_value(value) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(%session_id, %err, "removing unreadable session record");
                self.store.remove(&path).await?;
                return Ok(None);
            }
        };

        if session.is_expired(Utc::now()) {
            self.store.remove(&path).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.store
            .remove(&format!("{SESSIONS_PATH}/{session_id}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryStore;

    fn identity() -> PublicIdentity {
        PublicIdentity {
            id: "123456789012345678".to_string(),
            username: "visitor".to_string(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn create_and_fetch() {
        let sessions = SessionStore::new(Arc::new(MemoryStore::new()));
        let id = sessions
            .create(identity(), "tok".to_string(), None)
            .await
            .unwrap();
        assert!(id.starts_with("ses_"));

        let session = sessions.get_valid(&id).await.unwrap().unwrap();
        assert_eq!(session.user.username, "visitor");
        assert_eq!(session.access_token, "tok");
    }

    #[tokio::test]
    async fn expired_session_is_removed_on_read() {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(store.clone());

        let now = Utc::now();
        let session = Session {
            user: identity(),
            access_token: "tok".to_string(),
            refresh_token: None,
            created_at: now - Duration::hours(25),
            expires_at: now - Duration::hours(1),
        };
        store
            .set("sessions/ses_old", serde_json::to_value(&session).unwrap())
            .await
            .unwrap();

        assert!(sessions.get_valid("ses_old").await.unwrap().is_none());
        assert!(store.get("sessions/ses_old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_then_fetch_misses() {
        let sessions = SessionStore::new(Arc::new(MemoryStore::new()));
        let id = sessions
            .create(identity(), "tok".to_string(), None)
            .await
            .unwrap();
        sessions.delete(&id).await.unwrap();
        assert!(sessions.get_valid(&id).await.unwrap().is_none());
    }
}
