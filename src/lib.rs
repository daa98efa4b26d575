//! # Budget Delta Cache (budget-delta-cache)
//!
//! Delta-aware caching for list resources of a personal-budgeting API.
//!
//! ## Features
//!
//! - Per-key server knowledge tracking
//! - Delta requests merged into cached snapshots, with a full-refresh fallback
//!   when the knowledge gap is too large to trust
//! - Pluggable cache store contract with an in-memory implementation
//!   (TTL, stale-while-revalidate window, LRU bound)
//! - Built-in identity-keyed mergers for flat and grouped entities
//! - Per-key single-flight so concurrent fetches of one list never race
//! - Runtime-toggleable feature flag for the delta path
//!
//! ## Delta Fetch
//!
//! ```no_run
//! use budget_delta_cache::{
//!     merge_flat_entities, CacheConfig, CacheKeyBuilder, DeltaCache, DeltaCacheConfig,
//!     DeltaEntity, DeltaFetchOptions, DeltaResponse, ResourceType,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Account {
//!     id: String,
//!     balance: i64,
//!     deleted: bool,
//! }
//!
//! impl DeltaEntity for Account {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//!
//!     fn is_deleted(&self) -> bool {
//!         self.deleted
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     budget_delta_cache::telemetry::init_tracing("info");
//!
//!     let cache = DeltaCache::in_memory(CacheConfig::from_env()?, DeltaCacheConfig::from_env()?);
//!     let key = CacheKeyBuilder::new(ResourceType::Accounts)
//!         .budget("budget-1")
//!         .build();
//!
//!     let result = cache
//!         .fetch_with_delta(
//!             &key,
//!             "budget-1",
//!             |last_knowledge| async move {
//!                 // GET /budgets/budget-1/accounts?last_knowledge_of_server=...
//!                 let _ = last_knowledge;
//!                 Ok(DeltaResponse::new(Vec::<Account>::new(), 42))
//!             },
//!             |snapshot, delta, options| Ok(merge_flat_entities(snapshot, delta, options)),
//!             DeltaFetchOptions::with_ttl(ResourceType::Accounts.default_ttl()),
//!         )
//!         .await?;
//!
//!     println!("{} accounts, {}", result.data.len(), cache.stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Invalidation
//!
//! ```no_run
//! use budget_delta_cache::{CacheConfig, DeltaCache, DeltaCacheConfig, ResourceType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = DeltaCache::in_memory(CacheConfig::default(), DeltaCacheConfig::default());
//!
//!     // Drop snapshots but keep knowledge; the next fetch is a full one
//!     cache.invalidate("budget-1", Some(ResourceType::Payees)).await?;
//!
//!     // Drop snapshots and knowledge for the whole budget
//!     cache.force_full_refresh(Some("budget-1"), None).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod delta;
pub mod error;
pub mod knowledge;
pub mod resources;
pub mod telemetry;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheKey, CacheStats, CacheStore, CacheValue,
    MemoryCacheStore, SetOptions,
};
pub use config::{DeltaCacheConfig, DeltaCacheConfigBuilder, DeltaFeatureFlag};
pub use delta::{
    merge_flat_entities, merge_grouped_entities, DeltaCache, DeltaCacheEntry, DeltaEntity,
    DeltaFetchOptions, DeltaFetchResult, DeltaResponse, DeltaStats, EqualityFn, GroupedEntity,
    MergeOptions,
};
pub use error::{DeltaCacheError, Result};
pub use knowledge::{KnowledgeStoreStats, ServerKnowledgeStore};
pub use resources::{CacheKeyBuilder, ResourceType};
