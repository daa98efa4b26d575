//! Configuration for the delta cache orchestrator

use crate::error::{DeltaCacheError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Environment variable toggling the delta algorithm
pub const DELTA_ENABLED_ENV: &str = "DELTA_CACHE_ENABLED";

/// Environment variable overriding the knowledge-gap threshold
pub const KNOWLEDGE_GAP_THRESHOLD_ENV: &str = "DELTA_KNOWLEDGE_GAP_THRESHOLD";

/// Gap between requested and returned server knowledge above which a delta
/// batch is discarded in favour of a full refresh
pub const DEFAULT_KNOWLEDGE_GAP_THRESHOLD: i64 = 100;

/// Shared, runtime-toggleable switch for the delta algorithm
///
/// Clones share the same underlying flag, so a handle kept by the embedding
/// application can flip behaviour for every `DeltaCache` built from it. The
/// value is read on every fetch call.
#[derive(Debug, Clone)]
pub struct DeltaFeatureFlag(Arc<AtomicBool>);

impl DeltaFeatureFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }
}

impl Default for DeltaFeatureFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Configuration for the delta cache
#[derive(Debug, Clone)]
pub struct DeltaCacheConfig {
    /// Gate between the delta algorithm and plain full refreshes
    pub delta_enabled: DeltaFeatureFlag,

    /// Knowledge gap that forces a full resync
    pub knowledge_gap_threshold: i64,
}

impl Default for DeltaCacheConfig {
    fn default() -> Self {
        Self {
            delta_enabled: DeltaFeatureFlag::default(),
            knowledge_gap_threshold: DEFAULT_KNOWLEDGE_GAP_THRESHOLD,
        }
    }
}

impl DeltaCacheConfig {
    /// Create a new builder for delta cache configuration
    pub fn builder() -> DeltaCacheConfigBuilder {
        DeltaCacheConfigBuilder::default()
    }

    /// Load configuration from the process environment (and a `.env` file if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = Self::builder();

        if let Ok(raw) = std::env::var(DELTA_ENABLED_ENV) {
            builder = builder.delta_enabled(parse_bool(DELTA_ENABLED_ENV, &raw)?);
        }

        if let Ok(raw) = std::env::var(KNOWLEDGE_GAP_THRESHOLD_ENV) {
            let threshold = raw.trim().parse::<i64>().map_err(|e| {
                DeltaCacheError::Config(format!(
                    "{} must be an integer, got '{}': {}",
                    KNOWLEDGE_GAP_THRESHOLD_ENV, raw, e
                ))
            })?;
            builder = builder.knowledge_gap_threshold(threshold);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.knowledge_gap_threshold < 0 {
            return Err(DeltaCacheError::Config(
                "knowledge_gap_threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for delta cache configuration
#[derive(Debug, Default)]
pub struct DeltaCacheConfigBuilder {
    delta_enabled: Option<DeltaFeatureFlag>,
    knowledge_gap_threshold: Option<i64>,
}

impl DeltaCacheConfigBuilder {
    /// Start with the delta algorithm on or off
    pub fn delta_enabled(mut self, enabled: bool) -> Self {
        self.delta_enabled = Some(DeltaFeatureFlag::new(enabled));
        self
    }

    /// Share an existing feature flag handle
    pub fn feature_flag(mut self, flag: DeltaFeatureFlag) -> Self {
        self.delta_enabled = Some(flag);
        self
    }

    pub fn knowledge_gap_threshold(mut self, threshold: i64) -> Self {
        self.knowledge_gap_threshold = Some(threshold);
        self
    }

    /// Build the delta cache configuration
    pub fn build(self) -> DeltaCacheConfig {
        let defaults = DeltaCacheConfig::default();

        DeltaCacheConfig {
            delta_enabled: self.delta_enabled.unwrap_or(defaults.delta_enabled),
            knowledge_gap_threshold: self
                .knowledge_gap_threshold
                .unwrap_or(defaults.knowledge_gap_threshold),
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(DeltaCacheError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}
