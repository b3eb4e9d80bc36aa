//! Block registry with lazy expiry.
//!
//! Records live in the document store so they survive restarts. Expiry is
//! enforced at read time: a lookup that finds a lapsed record deletes it and
//! reports the subject as not blocked. A record whose expiry equals the
//! current instant counts as expired.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::db::kv::DocumentStore;
use crate::error::StoreError;
use crate::models::block::{BlockDuration, BlockRecord, BlockStatus};

const BLOCKS_PATH: &str = "blocked_users";

#[derive(Clone)]
pub struct BlockRegistry {
    store: Arc<dyn DocumentStore>,
}

impl BlockRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Look up the block state for a subject, removing the record if it has
    /// lapsed.
    pub async fn check(&self, subject_id: &str) -> Result<BlockStatus, StoreError> {
        let path = format!("{BLOCKS_PATH}/{subject_id}");
        let Some(value) = self.store.get(&path).await? else {
            return Ok(BlockStatus::NotBlocked);
        };

        let record: BlockRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                // A record we can't read can't be enforced; drop it.
                tracing::warn!(%subject_id, %err, "removing unreadable block record");
                self.store.remove(&path).await?;
                return Ok(BlockStatus::NotBlocked);
            }
        };

        let now = Utc::now();
        if let Some(until) = record.until {
            if until <= now {
                self.store.remove(&path).await?;
                return Ok(BlockStatus::NotBlocked);
            }
        }

        Ok(BlockStatus::Blocked {
            until: record.until,
            reason: record.reason,
            permanent: record.until.is_none(),
        })
    }

    pub async fn is_blocked(&self, subject_id: &str) -> Result<bool, StoreError> {
        Ok(self.check(subject_id).await?.is_blocked())
    }

    /// Place or replace a block. A new block overwrites any existing record
    /// for the subject.
    pub async fn set_block(
        &self,
        subject_id: &str,
        duration: BlockDuration,
        reason: impl Into<String>,
        blocked_by: impl Into<String>,
    ) -> Result<BlockRecord, StoreError> {
        let now = Utc::now();
        let record = BlockRecord {
            // A duration too large to represent as an instant is stored as
            // permanent rather than overflowing.
            until: match duration {
                BlockDuration::Minutes(minutes) => Duration::try_minutes(minutes)
                    .and_then(|delta| now.checked_add_signed(delta)),
                BlockDuration::Permanent => None,
            },
            reason: reason.into(),
            blocked_by: blocked_by.into(),
            blocked_at: now,
        };
        self.store
            .set(
                &format!("{BLOCKS_PATH}/{subject_id}"),
                serde_json::to_value(&record)?,
            )
            .await?;
        Ok(record)
    }

    /// Remove any block for the subject. Succeeds whether or not one exists.
    pub async fn clear_block(&self, subject_id: &str) -> Result<(), StoreError> {
        self.store
            .remove(&format!("{BLOCKS_PATH}/{subject_id}"))
            .await
    }
}
