//! Session Bucket Store
//!
//! Session-lifetime storage for one client's minute and day buckets.
//! Buckets are created lazily on first observation, at the *current*
//! configured capacity, and live for as long as the session does. Each
//! granularity is initialized independently, so a session started before a
//! configuration change picks up only the missing bucket without
//! disturbing the other.
//!
//! Session buckets are never shared between clients; the map guard is the
//! only synchronization, and no per-bucket locking is needed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::bucket::{Bucket, Granularity};

/// Key identifying one bucket of one session.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SessionKey {
    /// Client/session identity
    pub session_id: String,

    /// Which window this bucket tracks
    pub granularity: Granularity,
}

impl SessionKey {
    /// Create a new session bucket key
    pub fn new(session_id: &str, granularity: Granularity) -> Self {
        Self {
            session_id: session_id.to_string(),
            granularity,
        }
    }
}

/// In-memory store of per-session buckets.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    buckets: Arc<RwLock<HashMap<SessionKey, Bucket>>>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session's bucket, initializing `{tokens: max,
    /// last_refill: now}` on first touch.
    pub async fn load(
        &self,
        session_id: &str,
        granularity: Granularity,
        max: u64,
        now: u64,
    ) -> Bucket {
        let key = SessionKey::new(session_id, granularity);
        let mut buckets = self.buckets.write().await;
        *buckets.entry(key).or_insert_with(|| Bucket::full(max, now))
    }

    /// Overwrite the session's bucket in place.
    pub async fn save(&self, session_id: &str, granularity: Granularity, bucket: Bucket) {
        let key = SessionKey::new(session_id, granularity);
        let mut buckets = self.buckets.write().await;
        buckets.insert(key, bucket);
    }

    /// Number of tracked buckets (two per active session)
    pub async fn count(&self) -> usize {
        self.buckets.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000;

    #[tokio::test]
    async fn test_first_touch_initializes_full() {
        let store = SessionStore::new();
        let bucket = store.load("sess-1", Granularity::Minute, 10, T0).await;
        assert_eq!(bucket.tokens, 10);
        assert_eq!(bucket.last_refill, T0);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        // Two immediate loads of a never-seen key yield identical buckets
        // and no double-initialization side effects.
        let store = SessionStore::new();
        let first = store.load("sess-1", Granularity::Day, 40, T0).await;
        let second = store.load("sess-1", Granularity::Day, 40, T0).await;
        assert_eq!(first, second);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_existing_bucket_not_reinitialized() {
        let store = SessionStore::new();
        store.load("sess-1", Granularity::Minute, 10, T0).await;

        let mut bucket = store.load("sess-1", Granularity::Minute, 10, T0).await;
        bucket.tokens = 3;
        store.save("sess-1", Granularity::Minute, bucket).await;

        // A later load with a different max must not reset the bucket
        let reloaded = store.load("sess-1", Granularity::Minute, 99, T0 + 5).await;
        assert_eq!(reloaded.tokens, 3);
        assert_eq!(reloaded.last_refill, T0);
    }

    #[tokio::test]
    async fn test_missing_granularity_initialized_independently() {
        // A session that only has a minute bucket (config changed after the
        // session started) gets a fresh day bucket without disturbing it.
        let store = SessionStore::new();
        let mut minute = store.load("sess-1", Granularity::Minute, 10, T0).await;
        minute.tokens = 2;
        store.save("sess-1", Granularity::Minute, minute).await;

        let day = store.load("sess-1", Granularity::Day, 40, T0 + 30).await;
        assert_eq!(day.tokens, 40);
        assert_eq!(day.last_refill, T0 + 30);

        let minute_again = store.load("sess-1", Granularity::Minute, 10, T0 + 30).await;
        assert_eq!(minute_again.tokens, 2);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        let mut a = store.load("sess-a", Granularity::Minute, 10, T0).await;
        a.tokens = 0;
        store.save("sess-a", Granularity::Minute, a).await;

        let b = store.load("sess-b", Granularity::Minute, 10, T0).await;
        assert_eq!(b.tokens, 10);
    }
}
