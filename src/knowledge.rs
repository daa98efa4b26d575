//! Server knowledge bookkeeping
//!
//! Tracks, per cache key, the last version counter ("server knowledge")
//! reported by the upstream API for that resource collection. Records are
//! never expired; they are removed only through the reset operations.

use crate::cache::types::CacheKey;
use crate::error::{DeltaCacheError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Point-in-time copy of the knowledge store contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeStoreStats {
    pub entry_count: usize,
    pub entries: BTreeMap<CacheKey, i64>,
}

/// In-memory mapping from cache key to last observed server knowledge
#[derive(Debug, Default)]
pub struct ServerKnowledgeStore {
    records: RwLock<HashMap<CacheKey, i64>>,
}

impl ServerKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known server knowledge for `key`
    pub fn get(&self, key: &str) -> Option<i64> {
        self.records.read().get(key).copied()
    }

    /// Record `value` for `key`, overwriting any previous value
    pub fn update(&self, key: &str, value: i64) -> Result<()> {
        if value < 0 {
            return Err(DeltaCacheError::Validation(format!(
                "server knowledge for '{}' must be non-negative, got {}",
                key, value
            )));
        }

        let previous = self.records.write().insert(key.to_string(), value);
        debug!(
            "Server knowledge for {}: {:?} -> {}",
            key, previous, value
        );
        Ok(())
    }

    /// Remove records whose key contains `pattern`; everything when `None`
    ///
    /// Matching is plain substring containment.
    pub fn reset(&self, pattern: Option<&str>) -> usize {
        let mut records = self.records.write();

        let removed = match pattern {
            None => {
                let count = records.len();
                records.clear();
                count
            }
            Some(pattern) => {
                let before = records.len();
                records.retain(|key, _| !key.contains(pattern));
                before - records.len()
            }
        };

        info!(
            "Reset {} server knowledge records (pattern: {:?})",
            removed, pattern
        );
        removed
    }

    /// Remove every record scoped to `budget_id` (keys containing `:{budget_id}`)
    pub fn reset_by_budget_id(&self, budget_id: &str) -> usize {
        self.reset(Some(&format!(":{}", budget_id)))
    }

    pub fn stats(&self) -> KnowledgeStoreStats {
        let records = self.records.read();
        KnowledgeStoreStats {
            entry_count: records.len(),
            entries: records.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}
