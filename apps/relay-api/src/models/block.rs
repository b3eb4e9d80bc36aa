use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A block record stored under `blocked_users/{subject_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Expiry instant; `None` means permanent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    pub reason: String,
    /// Moderator who placed the block.
    pub blocked_by: String,
    pub blocked_at: DateTime<Utc>,
}

/// How long a block should last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDuration {
    Minutes(i64),
    Permanent,
}

/// Result of a block lookup, after lazy expiry.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockStatus {
    NotBlocked,
    Blocked {
        #[serde(skip_serializing_if = "Option::is_none")]
        until: Option<DateTime<Utc>>,
        reason: String,
        permanent: bool,
    },
}

impl BlockStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockStatus::Blocked { .. })
    }
}
