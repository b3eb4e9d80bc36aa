use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::PublicIdentity;

/// A server-side session created after a completed sign-in.
///
/// Stored under `sessions/{session_id}`; the ID travels in an httpOnly
/// cookie. Expired records are removed lazily on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user: PublicIdentity,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
