//! Time-bounded layer. Entries become invisible once `now - inserted_at >= ttl`
//! and are dropped lazily on access or by the background sweeper.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

use super::{CacheError, CacheLayer};

struct TtlEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl TtlEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

pub struct TtlLayer {
    name: String,
    entries: DashMap<String, TtlEntry>,
}

impl TtlLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
        }
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        // re-check under the shard write lock so a concurrent fresh set survives
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        None
    }

    pub(crate) fn set_at(&self, key: &str, value: Value, ttl: Duration, now: Instant) {
        self.entries.insert(
            key.to_string(),
            TtlEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
    }

    pub(crate) fn purge_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheLayer for TtlLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.get_at(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        self.set_at(key, value, ttl, Instant::now());
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.purge_at(Instant::now()))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_before_ttl_and_miss_at_ttl() {
        let layer = TtlLayer::new("ttl");
        let t0 = Instant::now();
        let ttl = Duration::from_millis(30_000);
        layer.set_at("notes:all", json!([1, 2]), ttl, t0);

        assert_eq!(layer.get_at("notes:all", t0), Some(json!([1, 2])));
        assert!(layer.get_at("notes:all", t0 + ttl - Duration::from_millis(1)).is_some());
        assert!(layer.get_at("notes:all", t0 + ttl).is_none());
        // removed lazily on the expired read
        assert_eq!(layer.len(), 0);
    }

    #[test]
    fn test_reset_restarts_the_clock() {
        let layer = TtlLayer::new("ttl");
        let t0 = Instant::now();
        let ttl = Duration::from_millis(100);
        layer.set_at("k", json!(1), ttl, t0);
        layer.set_at("k", json!(2), ttl, t0 + Duration::from_millis(80));
        assert_eq!(layer.get_at("k", t0 + Duration::from_millis(150)), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let layer = TtlLayer::new("ttl");
        layer.evict("missing").await.unwrap();
        layer.set("k", json!(1), Duration::from_secs(1)).await.unwrap();
        layer.evict("k").await.unwrap();
        layer.evict("k").await.unwrap();
        assert!(layer.get("k").await.unwrap().is_none());
    }

    #[test]
    fn test_purge() {
        let layer = TtlLayer::new("ttl");
        let t0 = Instant::now();
        layer.set_at("a", json!(1), Duration::from_millis(5), t0);
        layer.set_at("b", json!(2), Duration::from_secs(60), t0);
        assert_eq!(layer.purge_at(t0 + Duration::from_millis(5)), 1);
        assert_eq!(layer.len(), 1);
    }
}
