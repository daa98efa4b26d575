//! Error types for delta cache operations
//!
//! This module defines the error taxonomy for the budget-delta-cache library.
//! Upstream and merge failures keep the caller's original error as their
//! source so tool handlers can downcast and translate it.

use thiserror::Error;

/// Main error type for delta cache operations
#[derive(Error, Debug)]
pub enum DeltaCacheError {
    /// Configuration error - missing ttl, bad environment values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error - rejected input before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller-supplied fetch function failed
    #[error("Upstream fetch failed for {cache_key}: {source}")]
    Upstream {
        cache_key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The caller-supplied merge function failed
    #[error("Merge failed for {cache_key}: {source}")]
    Merge {
        cache_key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cache store failure
    #[error("Cache store error: {0}")]
    Store(String),
}

/// Result type alias for delta cache operations
pub type Result<T> = std::result::Result<T, DeltaCacheError>;

impl From<serde_json::Error> for DeltaCacheError {
    fn from(e: serde_json::Error) -> Self {
        DeltaCacheError::Serialization(e.to_string())
    }
}

impl DeltaCacheError {
    /// Missing or non-finite ttl supplied to one of the fetch paths
    pub(crate) fn missing_ttl(method: &str, cache_key: &str) -> Self {
        DeltaCacheError::Config(format!(
            "{} requires a finite ttl for cache key '{}'",
            method, cache_key
        ))
    }

    /// Whether this error originated in the caller-supplied fetch function
    pub fn is_upstream(&self) -> bool {
        matches!(self, DeltaCacheError::Upstream { .. })
    }
}
