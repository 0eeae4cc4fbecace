//! Layered cache shared by all note reads.
//!
//! A `CacheManager` fronts an ordered list of layers. Reads consult the layers
//! in order and stop at the first hit; writes and evictions fan out to every
//! layer so no layer can serve a value after it was invalidated.
//!
//! Layer failures never reach the caller: a failing `get` is a miss, a
//! failing `set`/`evict` is logged and skipped.

pub mod lru;
pub mod ttl;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

pub use lru::LruLayer;
pub use ttl::TtlLayer;

use crate::config::CacheConfig;

/// A cache layer failed; always absorbed by the manager.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache layer unavailable: {0}")]
    Unavailable(String),

    #[error("cached payload could not be decoded: {0}")]
    Decode(String),
}

/// One storage strategy in the cache stack. Implementations synchronize
/// internally; callers never hold a layer lock across calls.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Removing an absent key is not an error.
    async fn evict(&self, key: &str) -> Result<(), CacheError>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn len(&self) -> usize;
}

const INVALIDATION_SHARDS: usize = 64;

/// Eviction records older than this are dropped by `purge_expired`. Reads
/// that take longer than this to fill the cache could race an old eviction.
const INVALIDATION_HORIZON: Duration = Duration::from_secs(300);

/// Taken before a read falls through to the durable store. A fill carrying a
/// ticket older than the key's last eviction is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

/// Per-key eviction epochs, sharded so unrelated keys never contend.
struct Invalidations {
    epoch: AtomicU64,
    shards: Vec<Mutex<HashMap<String, (u64, Instant)>>>,
}

impl Invalidations {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            shards: (0..INVALIDATION_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, (u64, Instant)>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }
}

/// Snapshot of manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub degraded: u64,
}

pub struct CacheManager {
    key_prefix: String,
    default_ttl: Duration,
    layers: Vec<Arc<dyn CacheLayer>>,
    invalidations: Invalidations,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
}

impl CacheManager {
    pub fn new(key_prefix: impl Into<String>, default_ttl: Duration, layers: Vec<Arc<dyn CacheLayer>>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            default_ttl,
            layers,
            invalidations: Invalidations::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
        }
    }

    /// Standard stack: capacity-bounded LRU first, then the TTL layer.
    pub fn from_config(config: &CacheConfig) -> Self {
        let layers: Vec<Arc<dyn CacheLayer>> = vec![
            Arc::new(LruLayer::new("lru", config.capacity)),
            Arc::new(TtlLayer::new("ttl")),
        ];
        Self::new(config.key_prefix.clone(), config.default_ttl, layers)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Consult layers in order; the first hit wins.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let full_key = self.full_key(key);
        for layer in &self.layers {
            match layer.get(&full_key).await {
                Ok(Some(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("[CACHE] hit {} in layer {}", full_key, layer.name());
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => self.degrade(layer.name(), "get", &full_key, &e),
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::debug!("[CACHE] miss {}", full_key);
        None
    }

    /// Store with the default ttl.
    pub async fn set(&self, key: &str, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        let full_key = self.full_key(key);
        for layer in &self.layers {
            if let Err(e) = layer.set(&full_key, value.clone(), ttl).await {
                self.degrade(layer.name(), "set", &full_key, &e);
            }
        }
    }

    /// Remove the key from every layer. Never fails.
    ///
    /// Also records an eviction epoch so fills whose read began before this
    /// call are discarded by `fill_json`.
    pub async fn evict(&self, key: &str) {
        let full_key = self.full_key(key);
        let mut shard = self.invalidations.shard(&full_key).lock().await;
        let epoch = self.invalidations.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        shard.insert(full_key.clone(), (epoch, Instant::now()));
        for layer in &self.layers {
            if let Err(e) = layer.evict(&full_key).await {
                self.degrade(layer.name(), "evict", &full_key, &e);
            }
        }
        log::debug!("[CACHE] evicted {}", full_key);
    }

    /// Must be taken before reading the source of truth for a later `fill_json`.
    pub fn fill_ticket(&self) -> FillTicket {
        FillTicket(self.invalidations.epoch.load(Ordering::SeqCst))
    }

    /// Populate after a miss, unless the key was evicted since `ticket` was
    /// taken. Returns whether the value was stored.
    pub async fn fill_json<T: Serialize>(&self, key: &str, value: &T, ticket: FillTicket) -> bool {
        let full_key = self.full_key(key);
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                let err = CacheError::Decode(e.to_string());
                self.degrade("manager", "encode", key, &err);
                return false;
            }
        };

        let shard = self.invalidations.shard(&full_key).lock().await;
        if let Some((evicted_at, _)) = shard.get(&full_key) {
            if *evicted_at > ticket.0 {
                log::debug!("[CACHE] discarded stale fill for {}", full_key);
                return false;
            }
        }
        self.set(key, value).await;
        drop(shard);
        true
    }

    /// Typed read. A payload that no longer decodes counts as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                let err = CacheError::Decode(e.to_string());
                self.degrade("manager", "decode", key, &err);
                None
            }
        }
    }

    /// Sweep expired entries from every layer and forget old eviction records.
    pub async fn purge_expired(&self) -> usize {
        for shard in &self.invalidations.shards {
            shard
                .lock()
                .await
                .retain(|_, (_, at)| at.elapsed() < INVALIDATION_HORIZON);
        }

        let mut removed = 0;
        for layer in &self.layers {
            match layer.purge_expired().await {
                Ok(n) => removed += n,
                Err(e) => self.degrade(layer.name(), "purge", "*", &e),
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// Entry count per layer, in lookup order.
    pub fn layer_sizes(&self) -> Vec<(String, usize)> {
        self.layers
            .iter()
            .map(|l| (l.name().to_string(), l.len()))
            .collect()
    }

    /// Spawn a background task that periodically purges expired entries.
    pub fn start_background_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip immediate tick
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    log::debug!("[CACHE] Swept {} expired entries", removed);
                }
            }
        })
    }

    fn degrade(&self, layer: &str, op: &str, key: &str, err: &CacheError) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        log::warn!("[CACHE] layer {} failed on {} {}: {}", layer, op, key, err);
    }
}
