//! Core type definitions for the cache store

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cache key type - `{resource}:list:{budget_id}` and friends
pub type CacheKey = String;

/// Cache value type - entries are stored type-erased as JSON
pub type CacheValue = serde_json::Value;

/// Per-write expiry options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Time-to-live; the store default applies when `None`
    pub ttl: Option<Duration>,

    /// Window after expiry during which the entry may still be served
    pub stale_while_revalidate: Option<Duration>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            stale_while_revalidate: None,
        }
    }

    pub fn stale_while_revalidate(mut self, window: Option<Duration>) -> Self {
        self.stale_while_revalidate = window;
        self
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Hits served from an expired entry inside its stale-while-revalidate window
    pub stale_served: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Total size of cached data in bytes
    pub size_bytes: usize,

    /// Number of evictions due to size limits
    pub evictions_size: u64,

    /// Number of evictions due to TTL expiration
    pub evictions_ttl: u64,

    /// Number of manual invalidations
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_size + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, stale_served: {}, entries: {}, size: {} bytes, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.stale_served,
            self.entries,
            self.size_bytes,
            self.total_evictions()
        )
    }
}
