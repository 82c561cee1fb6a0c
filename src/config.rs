// ⚙️ Ingest Configuration
// Loaded once by the binary, then passed by value into the engine.
//
// Every field has a default, so an empty file (or no file) is valid:
//
//   database_path = "enrollment.db"
//   debug = false
//   [matching]
//   office_match_threshold = 0.85
//   owner_match_threshold = 0.85
//   [workers]
//   worker_count = 4
//   [retry]
//   max_attempts = 3
//   base_backoff_ms = 50

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub database_path: String,
    pub debug: bool,
    pub matching: MatchingConfig,
    pub workers: WorkerConfig,
    pub retry: RetryPolicy,
}

impl IngestConfig {
    pub fn new() -> Self {
        IngestConfig {
            database_path: "enrollment.db".to_string(),
            debug: false,
            matching: MatchingConfig::default(),
            workers: WorkerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Read and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("office_match_threshold", self.matching.office_match_threshold),
            ("owner_match_threshold", self.matching.owner_match_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "matching.{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.workers.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "workers.worker_count must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.workers.worker_count = worker_count;
        self
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MATCHING
// ============================================================================

/// Fuzzy-match acceptance thresholds (score ≥ threshold → same entity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub office_match_threshold: f64,
    pub owner_match_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            office_match_threshold: 0.85,
            owner_match_threshold: 0.85,
        }
    }
}

// ============================================================================
// WORKERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig { worker_count: 4 }
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Retry policy for transient persistence errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << exponent))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 50,
        }
    }
}
