use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key/value store the widget configurations are parked in between the page
/// render and the autocomplete requests.
#[async_trait]
pub trait WidgetCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Duration);
    async fn delete(&self, key: &str);
}

struct Entry {
    value: Value,
    /// `None` when the ttl reaches past what `Instant` can hold.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl WidgetCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }

        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

pub fn spawn_sweeper(cache: Arc<MemoryCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;

            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired widget cache entries", purged);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stores_and_returns_values() {
        let cache = MemoryCache::new();
        cache
            .set("autocomplete_a", json!({"kind": "model"}), Duration::from_secs(60))
            .await;

        assert_eq!(cache.get("autocomplete_a").await, Some(json!({"kind": "model"})));
        assert_eq!(cache.get("autocomplete_b").await, None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses_and_are_dropped() {
        let cache = MemoryCache::new();
        cache.set("gone", json!(1), Duration::ZERO).await;

        assert_eq!(cache.get("gone").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn oversized_ttls_never_expire() {
        let cache = MemoryCache::new();
        cache.set("forever", json!(1), Duration::MAX).await;

        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.get("forever").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let cache = MemoryCache::new();
        cache.set("key", json!(1), Duration::from_secs(60)).await;
        cache.delete("key").await;

        assert_eq!(cache.get("key").await, None);
    }

    #[tokio::test]
    async fn purge_only_touches_expired_entries() {
        let cache = MemoryCache::new();
        cache.set("stale", json!(1), Duration::ZERO).await;
        cache.set("fresh", json!(2), Duration::from_secs(60)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh").await, Some(json!(2)));
    }
}
