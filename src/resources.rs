//! Budget resource types and cache key construction
//!
//! List-shaped resources are cached under `{resource}:list:{budget_id}`,
//! optionally followed by `:{name}={value}` parameters for filtered lists.

use crate::cache::types::CacheKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// List-shaped resource collections served through the delta cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Accounts,
    Categories,
    Payees,
    Transactions,
    ScheduledTransactions,
    Months,
}

impl ResourceType {
    pub fn all() -> &'static [ResourceType] {
        &[
            ResourceType::Accounts,
            ResourceType::Categories,
            ResourceType::Payees,
            ResourceType::Transactions,
            ResourceType::ScheduledTransactions,
            ResourceType::Months,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Accounts => "accounts",
            ResourceType::Categories => "categories",
            ResourceType::Payees => "payees",
            ResourceType::Transactions => "transactions",
            ResourceType::ScheduledTransactions => "scheduled_transactions",
            ResourceType::Months => "months",
        }
    }

    /// Suggested TTL for the resource's list snapshot
    ///
    /// Transactions churn the most; payees almost never change.
    pub fn default_ttl(&self) -> Duration {
        match self {
            ResourceType::Transactions => Duration::from_secs(2 * 60),
            ResourceType::Accounts
            | ResourceType::Categories
            | ResourceType::ScheduledTransactions
            | ResourceType::Months => Duration::from_secs(5 * 60),
            ResourceType::Payees => Duration::from_secs(10 * 60),
        }
    }

    /// Prefix shared by every list key of this resource within a budget
    pub fn list_prefix(&self, budget_id: &str) -> CacheKey {
        format!("{}:list:{}", self.as_str(), budget_id)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key builder for budget resource lists
pub struct CacheKeyBuilder {
    resource: ResourceType,
    budget_id: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(resource: ResourceType) -> Self {
        Self {
            resource,
            budget_id: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the owning budget
    pub fn budget(mut self, budget_id: impl Into<String>) -> Self {
        self.budget_id = budget_id.into();
        self
    }

    /// Add a filter parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = self.resource.list_prefix(&self.budget_id);

        for (name, value) in &self.params {
            key.push_str(&format!(":{}={}", name, value));
        }

        key
    }
}
