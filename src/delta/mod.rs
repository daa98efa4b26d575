//! # Delta-Aware Cache
//!
//! Orchestrates list fetches for budget resources. For each cache key it
//! decides between asking the upstream for a full snapshot or only for the
//! changes since the last seen server knowledge, reconciles the answer with
//! the cached snapshot, and writes the result back to the cache store and
//! the knowledge store.
//!
//! ## Decision outline
//!
//! - a fresh entry short-circuits a forced refresh
//! - a delta is requested only when both a cache entry and a knowledge value exist
//! - a knowledge gap above the configured threshold discards the delta and
//!   refetches the full snapshot
//! - unchanged knowledge reuses the cached snapshot without merging
//!
//! ## Example
//!
//! ```rust
//! use budget_delta_cache::{
//!     merge_flat_entities, CacheConfig, DeltaCache, DeltaCacheConfig, DeltaEntity,
//!     DeltaFetchOptions, DeltaResponse, ResourceType,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Payee {
//!     id: String,
//!     name: String,
//!     deleted: bool,
//! }
//!
//! impl DeltaEntity for Payee {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//!
//!     fn is_deleted(&self) -> bool {
//!         self.deleted
//!     }
//! }
//!
//! # async fn example() -> budget_delta_cache::Result<()> {
//! let cache = DeltaCache::in_memory(CacheConfig::default(), DeltaCacheConfig::default());
//! let key = ResourceType::Payees.list_prefix("budget-1");
//!
//! let result = cache
//!     .fetch_with_delta(
//!         &key,
//!         "budget-1",
//!         |last_knowledge: Option<i64>| async move {
//!             // call the upstream API with `last_knowledge_of_server`
//!             let _ = last_knowledge;
//!             Ok(DeltaResponse::new(Vec::<Payee>::new(), 1))
//!         },
//!         |snapshot, delta, options| Ok(merge_flat_entities(snapshot, delta, options)),
//!         DeltaFetchOptions::with_ttl(ResourceType::Payees.default_ttl()),
//!     )
//!     .await?;
//!
//! println!("{} payees (delta: {})", result.data.len(), result.used_delta);
//! # Ok(())
//! # }
//! ```

mod locks;
pub mod merge;
pub mod types;

pub use merge::{merge_flat_entities, merge_grouped_entities};
pub use types::{
    DeltaCacheEntry, DeltaEntity, DeltaFetchOptions, DeltaFetchResult, DeltaResponse, DeltaStats,
    EqualityFn, GroupedEntity, MergeOptions,
};

use crate::cache::{CacheConfig, CacheStore, MemoryCacheStore, SetOptions};
use crate::config::DeltaCacheConfig;
use crate::error::{DeltaCacheError, Result};
use crate::knowledge::ServerKnowledgeStore;
use crate::resources::ResourceType;
use locks::KeyedLocks;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::StatsCounters;

/// Delta-aware cache over a [`CacheStore`] and a [`ServerKnowledgeStore`]
pub struct DeltaCache {
    store: Arc<dyn CacheStore>,
    knowledge: Arc<ServerKnowledgeStore>,
    config: DeltaCacheConfig,
    stats: StatsCounters,
    locks: KeyedLocks,
}

fn without_deleted<T: DeltaEntity>(data: Vec<T>) -> Vec<T> {
    data.into_iter().filter(|entity| !entity.is_deleted()).collect()
}

impl DeltaCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        knowledge: Arc<ServerKnowledgeStore>,
        config: DeltaCacheConfig,
    ) -> Self {
        info!(
            "Initializing delta cache (delta enabled: {}, knowledge gap threshold: {})",
            config.delta_enabled.is_enabled(),
            config.knowledge_gap_threshold
        );

        Self {
            store,
            knowledge,
            config,
            stats: StatsCounters::default(),
            locks: KeyedLocks::new(),
        }
    }

    /// Delta cache backed by fresh in-memory stores
    pub fn in_memory(cache_config: CacheConfig, config: DeltaCacheConfig) -> Self {
        Self::new(
            Arc::new(MemoryCacheStore::new(cache_config)),
            Arc::new(ServerKnowledgeStore::new()),
            config,
        )
    }

    pub fn config(&self) -> &DeltaCacheConfig {
        &self.config
    }

    pub fn knowledge_store(&self) -> &Arc<ServerKnowledgeStore> {
        &self.knowledge
    }

    pub fn cache_store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Cumulative counters since construction
    pub fn stats(&self) -> DeltaStats {
        self.stats.snapshot()
    }

    /// Fetch a list resource, requesting only changes when possible
    ///
    /// Falls back to [`DeltaCache::fetch_without_delta`] semantics when the
    /// delta feature flag is off at call time. Fetch and merge errors are
    /// returned without writing anything.
    pub async fn fetch_with_delta<T, F, Fut, M>(
        &self,
        cache_key: &str,
        budget_id: &str,
        mut fetcher: F,
        merger: M,
        options: DeltaFetchOptions<T>,
    ) -> Result<DeltaFetchResult<T>>
    where
        T: DeltaEntity + Serialize + DeserializeOwned,
        F: FnMut(Option<i64>) -> Fut,
        Fut: Future<Output = anyhow::Result<DeltaResponse<T>>>,
        M: FnOnce(Vec<T>, Vec<T>, &MergeOptions<T>) -> anyhow::Result<Vec<T>>,
    {
        let ttl = options
            .ttl
            .ok_or_else(|| DeltaCacheError::missing_ttl("fetch_with_delta", cache_key))?;

        let _guard = self.locks.acquire(cache_key).await;

        if !self.config.delta_enabled.is_enabled() {
            debug!("Delta disabled, full refresh path for {}", cache_key);
            return self
                .fetch_full_locked(cache_key, &mut fetcher, ttl, &options)
                .await;
        }

        let force = options.force_full_refresh;
        let cached = match self.read_entry::<T>(cache_key).await? {
            Some(entry) if force && !entry.is_stale() => {
                debug!(
                    "Forced refresh of {} served from fresh cache entry (age {}ms)",
                    cache_key,
                    entry.age_ms()
                );
                return Ok(entry.into_result(true, false));
            }
            other => other,
        };
        let was_cached = cached.is_some();

        let last_knowledge = if force { None } else { self.knowledge.get(cache_key) };
        let can_use_delta = !force && was_cached && last_knowledge.is_some();
        let requested = if can_use_delta { last_knowledge } else { None };

        debug!(
            "Fetching {} (cached: {}, requested knowledge: {:?})",
            cache_key, was_cached, requested
        );
        let mut response = Self::call_fetcher(&mut fetcher, cache_key, requested).await?;

        let knowledge_gap = requested
            .map(|known| response.server_knowledge - known)
            .unwrap_or(0);

        let mut forced_by_gap = false;
        if knowledge_gap > self.config.knowledge_gap_threshold {
            warn!(
                gap = knowledge_gap,
                threshold = self.config.knowledge_gap_threshold,
                budget_id = %budget_id,
                cache_key = %cache_key,
                action = "full-refresh",
                "Knowledge gap too large to merge; discarding delta. Consider a full resync of this budget"
            );
            forced_by_gap = true;
            StatsCounters::increment(&self.stats.knowledge_gap_events);
            response = Self::call_fetcher(&mut fetcher, cache_key, None).await?;
        }

        let received_delta = !forced_by_gap
            && requested.is_some_and(|known| response.server_knowledge > known);

        let DeltaResponse {
            data,
            server_knowledge,
        } = response;

        let (snapshot, used_delta) = match cached {
            Some(entry) if received_delta => {
                debug!(
                    "Merging {} changed entities into {} cached for {}",
                    data.len(),
                    entry.snapshot.len(),
                    cache_key
                );
                let merged = merger(entry.snapshot, data, &options.merge_options).map_err(
                    |source| DeltaCacheError::Merge {
                        cache_key: cache_key.to_string(),
                        source,
                    },
                )?;
                (merged, true)
            }
            Some(entry) if requested.is_some() && !forced_by_gap => {
                debug!("No upstream changes for {}, reusing snapshot", cache_key);
                (entry.snapshot, false)
            }
            _ => (without_deleted(data), false),
        };

        let entry = DeltaCacheEntry::new(
            snapshot,
            server_knowledge,
            ttl,
            options.stale_while_revalidate,
        );
        self.persist(cache_key, &entry).await?;

        if used_delta {
            StatsCounters::increment(&self.stats.merge_operations);
        }
        if can_use_delta {
            StatsCounters::increment(&self.stats.delta_hits);
        } else {
            StatsCounters::increment(&self.stats.delta_misses);
        }

        info!(
            "Delta fetch for {}: {} entities, knowledge {}, cached: {}, delta: {}",
            cache_key,
            entry.snapshot.len(),
            server_knowledge,
            was_cached,
            used_delta
        );

        Ok(entry.into_result(was_cached, used_delta))
    }

    /// Fetch a list resource without ever requesting a delta
    pub async fn fetch_without_delta<T, F, Fut>(
        &self,
        cache_key: &str,
        mut fetcher: F,
        options: DeltaFetchOptions<T>,
    ) -> Result<DeltaFetchResult<T>>
    where
        T: DeltaEntity + Serialize + DeserializeOwned,
        F: FnMut(Option<i64>) -> Fut,
        Fut: Future<Output = anyhow::Result<DeltaResponse<T>>>,
    {
        let ttl = options
            .ttl
            .ok_or_else(|| DeltaCacheError::missing_ttl("fetch_without_delta", cache_key))?;

        let _guard = self.locks.acquire(cache_key).await;
        self.fetch_full_locked(cache_key, &mut fetcher, ttl, &options)
            .await
    }

    /// Drop cached snapshots for a budget, keeping server knowledge
    ///
    /// With a resource type only that resource's lists are dropped.
    pub async fn invalidate(
        &self,
        budget_id: &str,
        resource_type: Option<ResourceType>,
    ) -> Result<usize> {
        let removed = match resource_type {
            Some(resource) => {
                self.store
                    .delete_by_prefix(&resource.list_prefix(budget_id))
                    .await?
            }
            None => self.store.delete_by_budget_id(budget_id).await?,
        };

        info!(
            "Invalidated {} cached entries for budget {} ({:?})",
            removed, budget_id, resource_type
        );
        Ok(removed)
    }

    /// Drop cached snapshots and server knowledge so the next fetch is a full one
    pub async fn force_full_refresh(
        &self,
        budget_id: Option<&str>,
        resource_type: Option<ResourceType>,
    ) -> Result<()> {
        match (budget_id, resource_type) {
            (Some(budget_id), Some(resource)) => {
                let prefix = resource.list_prefix(budget_id);
                self.store.delete_by_prefix(&prefix).await?;
                self.knowledge.reset(Some(&prefix));
            }
            (Some(budget_id), None) => {
                self.store.delete_by_budget_id(budget_id).await?;
                self.knowledge.reset_by_budget_id(budget_id);
            }
            (None, _) => {
                self.store.clear().await?;
                self.knowledge.reset(None);
            }
        }

        info!(
            "Forced full refresh (budget: {:?}, resource: {:?})",
            budget_id, resource_type
        );
        Ok(())
    }

    async fn fetch_full_locked<T, F, Fut>(
        &self,
        cache_key: &str,
        fetcher: &mut F,
        ttl: Duration,
        options: &DeltaFetchOptions<T>,
    ) -> Result<DeltaFetchResult<T>>
    where
        T: DeltaEntity + Serialize + DeserializeOwned,
        F: FnMut(Option<i64>) -> Fut,
        Fut: Future<Output = anyhow::Result<DeltaResponse<T>>>,
    {
        if let Some(entry) = self.read_entry::<T>(cache_key).await? {
            if !options.force_full_refresh || !entry.is_stale() {
                debug!("Cache hit for {}", cache_key);
                return Ok(entry.into_result(true, false));
            }
        }

        let response = Self::call_fetcher(fetcher, cache_key, None).await?;
        let entry = DeltaCacheEntry::new(
            without_deleted(response.data),
            response.server_knowledge,
            ttl,
            options.stale_while_revalidate,
        );
        self.persist(cache_key, &entry).await?;

        info!(
            "Full fetch for {}: {} entities, knowledge {}",
            cache_key,
            entry.snapshot.len(),
            entry.server_knowledge
        );

        Ok(entry.into_result(false, false))
    }

    async fn call_fetcher<T, F, Fut>(
        fetcher: &mut F,
        cache_key: &str,
        last_knowledge: Option<i64>,
    ) -> Result<DeltaResponse<T>>
    where
        F: FnMut(Option<i64>) -> Fut,
        Fut: Future<Output = anyhow::Result<DeltaResponse<T>>>,
    {
        let response = fetcher(last_knowledge)
            .await
            .map_err(|source| DeltaCacheError::Upstream {
                cache_key: cache_key.to_string(),
                source,
            })?;

        if response.server_knowledge < 0 {
            return Err(DeltaCacheError::Validation(format!(
                "upstream reported negative server knowledge {} for '{}'",
                response.server_knowledge, cache_key
            )));
        }

        Ok(response)
    }

    async fn read_entry<T: DeserializeOwned>(
        &self,
        cache_key: &str,
    ) -> Result<Option<DeltaCacheEntry<T>>> {
        match self.store.get(cache_key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Write the entry and its knowledge, or nothing at all
    async fn persist<T: Serialize>(&self, cache_key: &str, entry: &DeltaCacheEntry<T>) -> Result<()> {
        let value = serde_json::to_value(entry)?;
        let options = SetOptions {
            ttl: Some(Duration::from_millis(entry.ttl_ms)),
            stale_while_revalidate: entry.stale_while_revalidate_ms.map(Duration::from_millis),
        };

        self.store.set(cache_key, value, options).await?;
        self.knowledge.update(cache_key, entry.server_knowledge)
    }
}
