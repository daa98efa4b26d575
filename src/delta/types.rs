//! Types shared by the delta cache and its callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Contract every cached budget entity fulfils
///
/// The delta cache itself only looks at `is_deleted`; the built-in mergers
/// also key on `id`.
pub trait DeltaEntity {
    /// Stable identity used to reconcile snapshot and delta
    fn id(&self) -> &str;

    /// Tombstone marker for entities deleted upstream
    fn is_deleted(&self) -> bool {
        false
    }
}

/// Entity that owns a nested collection merged by identity as well,
/// e.g. a category group and its categories
pub trait GroupedEntity: DeltaEntity {
    type Child: DeltaEntity;

    fn children_mut(&mut self) -> &mut Vec<Self::Child>;
}

/// What a fetch function hands back: a batch plus the collection's version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaResponse<T> {
    pub data: Vec<T>,
    pub server_knowledge: i64,
}

impl<T> DeltaResponse<T> {
    pub fn new(data: Vec<T>, server_knowledge: i64) -> Self {
        Self {
            data,
            server_knowledge,
        }
    }
}

/// Custom equality a merge function may consult
pub type EqualityFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Options forwarded verbatim to the merge function
pub struct MergeOptions<T> {
    /// Keep tombstoned entities in the merged snapshot
    pub preserve_deleted: bool,

    /// Ignored by the built-in mergers, which compare by `id`
    pub equality: Option<EqualityFn<T>>,
}

impl<T> Default for MergeOptions<T> {
    fn default() -> Self {
        Self {
            preserve_deleted: false,
            equality: None,
        }
    }
}

impl<T> Clone for MergeOptions<T> {
    fn clone(&self) -> Self {
        Self {
            preserve_deleted: self.preserve_deleted,
            equality: self.equality.clone(),
        }
    }
}

impl<T> fmt::Debug for MergeOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOptions")
            .field("preserve_deleted", &self.preserve_deleted)
            .field("equality", &self.equality.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Per-call options for the fetch paths
pub struct DeltaFetchOptions<T> {
    /// Required; `None` stands for a missing or unbounded TTL and is rejected
    pub ttl: Option<Duration>,

    /// Skip delta merging and fetch a full snapshot, unless the cached entry is still fresh
    pub force_full_refresh: bool,

    pub merge_options: MergeOptions<T>,

    pub stale_while_revalidate: Option<Duration>,
}

impl<T> Default for DeltaFetchOptions<T> {
    fn default() -> Self {
        Self {
            ttl: None,
            force_full_refresh: false,
            merge_options: MergeOptions::default(),
            stale_while_revalidate: None,
        }
    }
}

impl<T> fmt::Debug for DeltaFetchOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaFetchOptions")
            .field("ttl", &self.ttl)
            .field("force_full_refresh", &self.force_full_refresh)
            .field("merge_options", &self.merge_options)
            .field("stale_while_revalidate", &self.stale_while_revalidate)
            .finish()
    }
}

impl<T> DeltaFetchOptions<T> {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn force_full_refresh(mut self, force: bool) -> Self {
        self.force_full_refresh = force;
        self
    }

    pub fn merge_options(mut self, options: MergeOptions<T>) -> Self {
        self.merge_options = options;
        self
    }

    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window);
        self
    }
}

/// Outcome of one fetch cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaFetchResult<T> {
    pub data: Vec<T>,

    /// A cache entry existed when the cycle started
    pub was_cached: bool,

    /// The snapshot was produced by merging a delta batch
    pub used_delta: bool,

    pub server_knowledge: i64,
}

/// Snapshot stored in the cache store for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaCacheEntry<T> {
    pub snapshot: Vec<T>,
    pub server_knowledge: i64,
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_while_revalidate_ms: Option<u64>,
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl<T> DeltaCacheEntry<T> {
    pub fn new(
        snapshot: Vec<T>,
        server_knowledge: i64,
        ttl: Duration,
        stale_while_revalidate: Option<Duration>,
    ) -> Self {
        Self {
            snapshot,
            server_knowledge,
            timestamp: Utc::now(),
            ttl_ms: duration_ms(ttl),
            stale_while_revalidate_ms: stale_while_revalidate.map(duration_ms),
        }
    }

    /// Milliseconds since the entry was written
    pub fn age_ms(&self) -> u64 {
        let age = (Utc::now() - self.timestamp).num_milliseconds();
        u64::try_from(age).unwrap_or(0)
    }

    /// Older than its own ttl
    pub fn is_stale(&self) -> bool {
        self.age_ms() > self.ttl_ms
    }

    pub(crate) fn into_result(self, was_cached: bool, used_delta: bool) -> DeltaFetchResult<T> {
        DeltaFetchResult {
            data: self.snapshot,
            was_cached,
            used_delta,
            server_knowledge: self.server_knowledge,
        }
    }
}

/// Cumulative usage counters for one delta cache instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaStats {
    pub delta_hits: u64,
    pub delta_misses: u64,
    pub merge_operations: u64,
    pub knowledge_gap_events: u64,
}

impl DeltaStats {
    /// Share of delta-path cycles that could ask for a delta, as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.delta_hits + self.delta_misses;
        if total == 0 {
            0.0
        } else {
            (self.delta_hits as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for DeltaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeltaStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, merges: {}, knowledge_gaps: {} }}",
            self.delta_hits,
            self.delta_misses,
            self.hit_rate(),
            self.merge_operations,
            self.knowledge_gap_events
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub delta_hits: AtomicU64,
    pub delta_misses: AtomicU64,
    pub merge_operations: AtomicU64,
    pub knowledge_gap_events: AtomicU64,
}

impl StatsCounters {
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeltaStats {
        DeltaStats {
            delta_hits: self.delta_hits.load(Ordering::Relaxed),
            delta_misses: self.delta_misses.load(Ordering::Relaxed),
            merge_operations: self.merge_operations.load(Ordering::Relaxed),
            knowledge_gap_events: self.knowledge_gap_events.load(Ordering::Relaxed),
        }
    }
}
