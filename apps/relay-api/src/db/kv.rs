use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use ulid::Ulid;

use crate::error::StoreError;

/// Abstraction over a JSON document store addressed by slash-separated paths
/// (`blocked_users/1234`, `messages/user_abc/...`).
///
/// Backed by a hosted document database in production and an in-memory map in
/// tests.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, path: &str) -> Result<(), StoreError>;
    /// Append a child under `path` with a generated, lexically increasing key.
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;
    /// List children of `path` in key order.
    async fn list(&self, path: &str) -> Result<Vec<(String, Value)>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and single-node deployments)
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.lock().unwrap().get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.data.lock().unwrap().insert(path.to_string(), value);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.data.lock().unwrap().remove(path);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        // ULIDs sort by creation time, which gives push its ordering.
        let key = Ulid::new().to_string();
        self.data
            .lock()
            .unwrap()
            .insert(format!("{path}/{key}"), value);
        Ok(key)
    }

    async fn list(&self, path: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let prefix = format!("{path}/");
        let data = self.data.lock().unwrap();
        let mut entries: Vec<(String, Value)> = data
            .iter()
            .filter_map(|(k, v)| {
                let child = k.strip_prefix(&prefix)?;
                // Only direct children; nested paths keep their own listings.
                if child.contains('/') {
                    return None;
                }
                Some((child.to_string(), v.clone()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_roundtrip() {
        let store = MemoryStore::new();
        store
            .set("blocked_users/123", serde_json::json!({"reason": "spam"}))
            .await
            .unwrap();

        let value = store.get("blocked_users/123").await.unwrap().unwrap();
        assert_eq!(value["reason"], "spam");

        store.remove("blocked_users/123").await.unwrap();
        assert!(store.get("blocked_users/123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn push_preserves_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .push("messages/user_a", serde_json::json!({"i": i}))
                .await
                .unwrap();
        }

        let entries = store.list("messages/user_a").await.unwrap();
        assert_eq!(entries.len(), 5);
        for (i, (_, value)) in entries.iter().enumerate() {
            assert_eq!(value["i"], i);
        }
    }

    #[tokio::test]
    async fn list_excludes_nested_children() {
        let store = MemoryStore::new();
        store
            .set("messages/user_a/x", serde_json::json!(1))
            .await
            .unwrap();
        store
            .set("messages/user_b/y", serde_json::json!(2))
            .await
            .unwrap();

        let entries = store.list("messages").await.unwrap();
        assert!(entries.is_empty());

        let entries = store.list("messages/user_a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "x");
    }
}
