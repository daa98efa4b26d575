//! Cache store contract and the in-memory implementation

use crate::cache::{
    config::CacheConfig,
    entry::{CacheEntry, Freshness},
    invalidation::{InvalidationEvent, InvalidationReason},
    types::{CacheKey, CacheStats, CacheValue, SetOptions},
};
use crate::error::{DeltaCacheError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Storage backend used by the delta cache
///
/// Values are type-erased JSON; the delta cache serializes its own entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Point lookup; `None` on miss or once the entry is no longer servable
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Point write, replacing any previous value under `key`
    async fn set(&self, key: &str, value: CacheValue, options: SetOptions) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize>;

    /// Remove every entry whose key has `budget_id` as one of its `:`-separated segments
    async fn delete_by_budget_id(&self, budget_id: &str) -> Result<usize>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;
}

/// In-memory cache store with TTL, stale-while-revalidate and LRU eviction
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Expiry after TTL plus the optional stale window
/// - LRU eviction when entry or size limits are reached
/// - Prefix and budget-scoped bulk deletion
pub struct MemoryCacheStore {
    /// Cache configuration
    pub(crate) config: CacheConfig,

    /// Internal storage
    store: Arc<RwLock<StoreState>>,
}

struct StoreState {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// LRU tracking: front is least recently used
    lru_queue: VecDeque<CacheKey>,

    /// Current cache statistics
    stats: CacheStats,

    /// Total size of cached data in bytes
    current_size_bytes: usize,
}

impl StoreState {
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(entry.metadata.size_bytes);
        Some(entry)
    }

    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }
}

fn key_has_segment(key: &str, segment: &str) -> bool {
    key.split(':').any(|part| part == segment)
}

impl MemoryCacheStore {
    /// Create a new store with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing memory cache store with config: {:?}", config);

        let store = StoreState {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
            current_size_bytes: 0,
        };

        Self {
            config,
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Insert a value using the configured default TTL
    pub async fn insert(&self, key: CacheKey, value: CacheValue) -> Result<()> {
        self.insert_entry(key, value, SetOptions::default()).await
    }

    async fn insert_entry(&self, key: CacheKey, value: CacheValue, options: SetOptions) -> Result<()> {
        let ttl = options.ttl.unwrap_or_else(|| self.config.ttl_with_jitter());
        let entry = CacheEntry::new(key.clone(), value, ttl, options.stale_while_revalidate);
        let size = entry.metadata.size_bytes;

        if size > self.config.max_size_bytes {
            warn!(
                "Entry {} of {} bytes exceeds cache size limit of {} bytes",
                key, size, self.config.max_size_bytes
            );
            return Err(DeltaCacheError::Store(
                "Cache size limit exceeded".to_string(),
            ));
        }

        let mut store = self.store.write().await;

        // Replacing an entry frees its slot before any eviction decision
        if store.remove_entry(&key).is_some() {
            debug!("Updating existing cache entry: {}", key);
        } else {
            debug!("Inserting new cache entry: {}", key);
        }

        self.evict_if_needed(&mut store, size)?;

        store.entries.insert(key.clone(), entry);
        store.lru_queue.push_back(key);
        store.current_size_bytes += size;

        self.update_stats(&mut store);
        Ok(())
    }

    /// Check if a key exists in the cache (without updating access time)
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store.entries.contains_key(key)
    }

    /// Remove a specific entry from the cache
    pub async fn remove(&self, key: &str) -> Result<Option<CacheValue>> {
        let mut store = self.store.write().await;

        match store.remove_entry(key) {
            Some(entry) => {
                store.stats.invalidations += 1;
                self.update_stats(&mut store);
                debug!("Removed cache entry ({}): {}", InvalidationReason::Manual, key);
                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }

    /// Remove all entries that are past their TTL and stale window
    pub async fn cleanup_expired(&self) -> Result<Vec<InvalidationEvent>> {
        let mut store = self.store.write().await;
        let mut events = Vec::new();

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        if !expired_keys.is_empty() {
            for key in &expired_keys {
                store.remove_entry(key);
            }
            store.stats.evictions_ttl += expired_keys.len() as u64;
            self.update_stats(&mut store);

            let count = expired_keys.len();
            let event = InvalidationEvent::new(InvalidationReason::Expired, expired_keys)
                .with_context(format!("Cleaned up {} expired entries", count));
            events.push(event);

            debug!("Cleaned up {} expired entries", count);
        }

        Ok(events)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        store.stats.clone()
    }

    /// Get current cache size in bytes
    pub async fn size_bytes(&self) -> usize {
        let store = self.store.read().await;
        store.current_size_bytes
    }

    /// Get number of entries in cache
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        let store = self.store.read().await;
        store.entries.is_empty()
    }

    /// Remove every key matching `predicate`, accounting it as an invalidation
    async fn remove_matching<P>(&self, reason: InvalidationReason, predicate: P) -> InvalidationEvent
    where
        P: Fn(&str) -> bool,
    {
        let mut store = self.store.write().await;

        let keys: Vec<CacheKey> = store
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();

        for key in &keys {
            store.remove_entry(key);
        }
        store.stats.invalidations += keys.len() as u64;
        self.update_stats(&mut store);

        info!("Invalidated {} entries ({})", keys.len(), reason);
        InvalidationEvent::new(reason, keys)
    }

    /// Evict entries if needed to make room for a new entry
    fn evict_if_needed(&self, store: &mut StoreState, needed_size: usize) -> Result<()> {
        while store.entries.len() >= self.config.max_entries
            || store.current_size_bytes + needed_size > self.config.max_size_bytes
        {
            match store.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry ({}): {}", InvalidationReason::SizeLimit, key);
                    if let Some(entry) = store.entries.remove(&key) {
                        store.current_size_bytes = store
                            .current_size_bytes
                            .saturating_sub(entry.metadata.size_bytes);
                    }
                    store.stats.evictions_size += 1;
                }
                None => {
                    warn!("Cannot evict more entries, cache size limit exceeded");
                    return Err(DeltaCacheError::Store(
                        "Cache size limit exceeded".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn update_stats(&self, store: &mut StoreState) {
        store.stats.entries = store.entries.len();
        if self.config.enable_metrics {
            store.stats.size_bytes = store.current_size_bytes;
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let mut store = self.store.write().await;

        let freshness = match store.entries.get(key) {
            Some(entry) => entry.freshness(),
            None => {
                debug!("Cache miss: {}", key);
                store.stats.misses += 1;
                return Ok(None);
            }
        };

        if freshness == Freshness::Expired {
            debug!("Cache entry expired: {}", key);
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            store.remove_entry(key);
            self.update_stats(&mut store);
            return Ok(None);
        }

        if freshness == Freshness::Stale {
            debug!("Serving stale cache entry inside revalidation window: {}", key);
            store.stats.stale_served += 1;
        }

        let value = match store.entries.get_mut(key) {
            Some(entry) => {
                entry.mark_accessed();
                entry.value.clone()
            }
            None => return Ok(None),
        };
        store.stats.hits += 1;

        if self.config.enable_lru_eviction {
            store.touch(key);
        }

        debug!("Cache hit: {}", key);
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: CacheValue, options: SetOptions) -> Result<()> {
        self.insert_entry(key.to_string(), value, options).await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let event = self
            .remove_matching(
                InvalidationReason::PrefixMatch {
                    prefix: prefix.to_string(),
                },
                |key| key.starts_with(prefix),
            )
            .await;
        Ok(event.len())
    }

    async fn delete_by_budget_id(&self, budget_id: &str) -> Result<usize> {
        let event = self
            .remove_matching(
                InvalidationReason::BudgetScope {
                    budget_id: budget_id.to_string(),
                },
                |key| key_has_segment(key, budget_id),
            )
            .await;
        Ok(event.len())
    }

    async fn clear(&self) -> Result<()> {
        let event = self
            .remove_matching(InvalidationReason::Cleared, |_| true)
            .await;
        info!("Cleared {} entries from cache", event.len());
        Ok(())
    }
}

/// Spawn the periodic expiry sweep, if enabled in the store's configuration
pub fn spawn_auto_cleanup(cache: Arc<MemoryCacheStore>) -> Option<JoinHandle<()>> {
    if !cache.config.enable_auto_cleanup {
        return None;
    }

    let interval = cache.config.cleanup_interval;
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match cache.cleanup_expired().await {
                Ok(events) => {
                    if !events.is_empty() {
                        debug!("Auto cleanup: {} events", events.len());
                    }
                }
                Err(e) => {
                    warn!("Auto cleanup failed: {}", e);
                }
            }
        }
    }))
}
