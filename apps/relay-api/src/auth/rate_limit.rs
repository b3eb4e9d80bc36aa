//! Per-address throttle for sign-in attempts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::kv::DocumentStore;
use crate::error::StoreError;

const ATTEMPTS_PATH: &str = "auth_attempts";

/// Attempts allowed per address within the window.
const MAX_ATTEMPTS: u32 = 5;

/// Sliding window length.
const WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Serialize, Deserialize)]
struct AuthAttempt {
    count: u32,
    last_attempt: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuthRateLimiter {
    store: Arc<dyn DocumentStore>,
}

impl AuthRateLimiter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record an attempt from `addr`. Returns `false` when the address has
    /// exhausted its budget for the window.
    pub async fn allow(&self, addr: &str) -> Result<bool, StoreError> {
        let path = format!("{ATTEMPTS_PATH}/{addr}");
        let now = Utc::now();
        let window = Duration::minutes(WINDOW_MINUTES);

        let mut attempt = match self.store.get(&path).await? {
            Some(value) => serde_json::from_value(value).unwrap_or(AuthAttempt {
                count: 0,
                last_attempt: now,
            }),
            None => AuthAttempt {
                count: 0,
                last_attempt: now,
            },
        };

        // A quiet window resets the counter.
        if now - attempt.last_attempt > window {
            attempt.count = 0;
        }

        if attempt.count >= MAX_ATTEMPTS {
            return Ok(false);
        }

        attempt.count += 1;
        attempt.last_attempt = now;
        self.store.set(&path, serde_json::to_value(&attempt)?).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryStore;

    #[tokio::test]
    async fn allows_up_to_the_limit_then_refuses() {
        let limiter = AuthRateLimiter::new(Arc::new(MemoryStore::new()));
        for _ in 0..MAX_ATTEMPTS {
            assert!(limiter.allow("10.0.0.1").await.unwrap());
        }
        assert!(!limiter.allow("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn addresses_are_tracked_independently() {
        let limiter = AuthRateLimiter::new(Arc::new(MemoryStore::new()));
        for _ in 0..MAX_ATTEMPTS {
            assert!(limiter.allow("10.0.0.1").await.unwrap());
        }
        assert!(limiter.allow("10.0.0.2").await.unwrap());
    }

    #[tokio::test]
    async fn quiet_window_resets_the_counter() {
        let store = Arc::new(MemoryStore::new());
        let limiter = AuthRateLimiter::new(store.clone());
        for _ in 0..MAX_ATTEMPTS {
            limiter.allow("10.0.0.1").await.unwrap();
        }

        // Age the record past the window.
        let stale = AuthAttempt {
            count: MAX_ATTEMPTS,
            last_attempt: Utc::now() - Duration::minutes(WINDOW_MINUTES + 1),
        };
        store
            .set(
                "auth_attempts/10.0.0.1",
                serde_json::to_value(&stale).unwrap(),
            )
            .await
            .unwrap();

        assert!(limiter.allow("10.0.0.1").await.unwrap());
    }
}
