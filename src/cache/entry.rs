//! Store-level cache entry with TTL and stale-while-revalidate support

use crate::cache::types::{CacheKey, CacheValue};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A stored value plus its expiry bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone)]
pub struct CacheMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    /// When the entry stops being fresh
    pub expires_at: DateTime<Utc>,

    /// When the entry stops being servable at all
    pub stale_until: DateTime<Utc>,

    /// Number of times this entry has been accessed
    pub access_count: u64,

    /// Approximate size of the entry in bytes
    pub size_bytes: usize,
}

/// Freshness of an entry at lookup time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Expired but inside the stale-while-revalidate window
    Stale,
    Expired,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::max_value())
}

impl CacheEntry {
    /// Create a new entry expiring after `ttl`, servable for a further `stale_window`
    pub fn new(
        key: CacheKey,
        value: CacheValue,
        ttl: Duration,
        stale_window: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(to_chrono(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let stale_until = match stale_window {
            Some(window) => expires_at
                .checked_add_signed(to_chrono(window))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => expires_at,
        };

        let mut entry = Self {
            key,
            value,
            metadata: CacheMetadata {
                created_at: now,
                accessed_at: now,
                expires_at,
                stale_until,
                access_count: 0,
                size_bytes: 0,
            },
        };
        entry.metadata.size_bytes = entry.calculate_size();
        entry
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness_at(Utc::now())
    }

    pub fn freshness_at(&self, now: DateTime<Utc>) -> Freshness {
        if now <= self.metadata.expires_at {
            Freshness::Fresh
        } else if now <= self.metadata.stale_until {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Check if the entry is past both its TTL and its stale window
    pub fn is_expired(&self) -> bool {
        self.freshness() == Freshness::Expired
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Approximate size: key + serialized value + metadata overhead
    pub fn calculate_size(&self) -> usize {
        self.key.len() + self.value.to_string().len() + std::mem::size_of::<CacheMetadata>()
    }
}
