use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the conversation produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Visitor,
    Support,
}

/// One archived message, stored under `messages/{subject_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub author: String,
    pub content: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}
