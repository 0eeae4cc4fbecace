//! Capacity-bounded layer with least-recently-used eviction.
//!
//! Recency is a monotonically increasing tick bumped on every hit and every
//! set; `order` maps tick -> key so the oldest entry is found in O(log n).
//! Entries also remember their expiry so this layer never serves a value
//! the TTL layer would already have dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::{CacheError, CacheLayer};

struct LruEntry {
    value: Value,
    expires_at: Instant,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<String, LruEntry>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LruState {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<LruEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }
}

pub struct LruLayer {
    name: String,
    capacity: usize,
    state: Mutex<LruState>,
}

impl LruLayer {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            Some(entry) => now >= entry.expires_at,
            None => return None,
        };
        if expired {
            state.remove(key);
            return None;
        }

        let tick = state.bump();
        let entry = state.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let value = entry.value.clone();
        state.order.remove(&old_tick);
        state.order.insert(tick, key.to_string());
        Some(value)
    }

    pub(crate) fn set_at(&self, key: &str, value: Value, ttl: Duration, now: Instant) {
        let mut state = self.state.lock();
        state.remove(key);

        while state.entries.len() >= self.capacity {
            let Some((_, oldest)) = state.order.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
            log::debug!("[CACHE] {} evicted least-recently-used {}", self.name, oldest);
        }

        let tick = state.bump();
        state.order.insert(tick, key.to_string());
        state.entries.insert(
            key.to_string(),
            LruEntry {
                value,
                expires_at: now + ttl,
                tick,
            },
        );
    }

    pub(crate) fn purge_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }
}

#[async_trait]
impl CacheLayer for LruLayer {
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
        self.state.lock().remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.purge_at(Instant::now()))
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
