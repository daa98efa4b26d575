//! # Cache Store
//!
//! The generic key/value layer underneath the delta cache. The delta cache
//! only depends on the [`CacheStore`] trait; [`MemoryCacheStore`] is the
//! process-lifetime implementation used by the tool server.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: per-write time-to-live with an optional
//!   stale-while-revalidate window
//! - **LRU Eviction**: bounded entry count and byte size
//! - **Scoped Invalidation**: prefix deletion and budget-scoped deletion
//! - **Metrics**: hit/miss/eviction counters
//!
//! ## Example
//!
//! ```rust
//! use budget_delta_cache::cache::{CacheConfig, CacheStore, MemoryCacheStore, SetOptions};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> budget_delta_cache::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(300))
//!     .max_entries(1_000)
//!     .build();
//!
//! let cache = MemoryCacheStore::new(config);
//!
//! cache
//!     .set("accounts:list:budget-1", json!([]), SetOptions::with_ttl(Duration::from_secs(60)))
//!     .await?;
//!
//! if let Some(value) = cache.get("accounts:list:budget-1").await? {
//!     println!("Cache hit: {}", value);
//! }
//!
//! cache.delete_by_budget_id("budget-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata, Freshness};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use store::{spawn_auto_cleanup, CacheStore, MemoryCacheStore};
pub use types::{CacheKey, CacheStats, CacheValue, SetOptions};
