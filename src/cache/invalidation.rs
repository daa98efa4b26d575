//! Cache invalidation events
//!
//! Every bulk removal performed by the store is described by an
//! [`InvalidationEvent`] carrying the reason and the affected keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry outlived its TTL and stale window
    Expired,

    /// Manual invalidation of a single key
    Manual,

    /// Bulk removal of keys starting with a prefix
    PrefixMatch { prefix: String },

    /// Bulk removal of every key scoped to a budget
    BudgetScope { budget_id: String },

    /// Whole cache cleared
    Cleared,

    /// Evicted due to cache size or entry limits
    SizeLimit,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::PrefixMatch { prefix } => write!(f, "prefix match: {}", prefix),
            InvalidationReason::BudgetScope { budget_id } => {
                write!(f, "budget scope: {}", budget_id)
            }
            InvalidationReason::Cleared => write!(f, "cache cleared"),
            InvalidationReason::SizeLimit => write!(f, "cache size limit reached"),
        }
    }
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
