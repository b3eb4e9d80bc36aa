//! Per-subject message archive.

use std::sync::Arc;

use chrono::Utc;

use crate::db::kv::DocumentStore;
use crate::error::StoreError;
use crate::models::history::{Direction, HistoryEntry};

const MESSAGES_PATH: &str = "messages";

#[derive(Clone)]
pub struct HistoryLog {
    store: Arc<dyn DocumentStore>,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Archive one message for a subject. Entries keep insertion order.
    pub async fn append(
        &self,
        subject_id: &str,
        author: impl Into<String>,
        content: impl Into<String>,
        direction: Direction,
    ) -> Result<(), StoreError> {
        let entry = HistoryEntry {
            author: author.into(),
            content: content.into(),
            direction,
            timestamp: Utc::now(),
        };
        self.store
            .push(
                &format!("{MESSAGES_PATH}/{subject_id}"),
                serde_json::to_value(&entry)?,
            )
            .await?;
        Ok(())
    }

    /// All archived messages for a subject, oldest first. Entries that no
    /// longer deserialize are skipped.
    pub async fn for_subject(&self, subject_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let entries = self
            .store
            .list(&format!("{MESSAGES_PATH}/{subject_id}"))
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value(value).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryStore;

    #[tokio::test]
    async fn append_and_read_back_in_order() {
        let log = HistoryLog::new(Arc::new(MemoryStore::new()));
        log.append("user_a", "user_a", "first", Direction::Visitor)
            .await
            .unwrap();
        log.append("user_a", "mod", "second", Direction::Support)
            .await
            .unwrap();

        let entries = log.for_subject("user_a").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "first");
        assert_eq!(entries[0].direction, Direction::Visitor);
        assert_eq!(entries[1].content, "second");
        assert_eq!(entries[1].direction, Direction::Support);
    }

    #[tokio::test]
    async fn subjects_are_isolated() {
        let log = HistoryLog::new(Arc::new(MemoryStore::new()));
        log.append("user_a", "user_a", "hello", Direction::Visitor)
            .await
            .unwrap();

        assert!(log.for_subject("user_b").await.unwrap().is_empty());
    }
}
