//! Generator scheduling configuration.
//!
//! The thresholds and intervals driving the worker's reseed policy.
//! Defaults follow the pooled-generator design: an aggressive High
//! regime until the first reseed, then multi-second polling.

use crate::sources::Priority;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Scheduling and reseed policy knobs.
///
/// The three `*_reseed_threshold_bytes` fields gate the reseed
/// predicate: at High priority, pool zero alone must exceed the
/// threshold; at Normal and Low, the minimum across all pools must.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Pool-zero bytes required to reseed at High priority.
    pub high_reseed_threshold_bytes: u64,
    /// Minimum per-pool bytes required to reseed at Normal priority.
    pub normal_reseed_threshold_bytes: u64,
    /// Minimum per-pool bytes required to reseed at Low priority.
    pub low_reseed_threshold_bytes: u64,
    /// Inter-cycle sleep at High priority, in milliseconds.
    pub high_poll_interval_ms: u64,
    /// Inter-cycle sleep at Normal priority, in milliseconds.
    pub normal_poll_interval_ms: u64,
    /// Inter-cycle sleep at Low priority, in milliseconds.
    pub low_poll_interval_ms: u64,
    /// Minimum spacing between reseeds, in milliseconds.
    ///
    /// `None` (the default) places no lower bound, so a burst of
    /// entropy can trigger back-to-back reseeds. Classic pooled designs
    /// use 100 ms here; enable it when untrusted sources can flood the
    /// accumulator cheaply.
    pub min_reseed_interval_ms: Option<u64>,
    /// Bounded parallelism for source polling.
    ///
    /// `None` (the default) polls sources sequentially. With `Some(k)`,
    /// up to `k` sources are polled concurrently and their results are
    /// folded into the accumulator in the shuffled order once the whole
    /// cycle's polls have completed.
    pub parallel_poll: Option<usize>,
    /// Consecutive faults after which a source stops being polled.
    ///
    /// `None` (the default) never demotes: a faulting source is skipped
    /// for the cycle and retried on the next one, forever.
    pub fault_demotion_threshold: Option<u32>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            high_reseed_threshold_bytes: 48,
            normal_reseed_threshold_bytes: 96,
            low_reseed_threshold_bytes: 256,
            high_poll_interval_ms: 1,
            normal_poll_interval_ms: 5_000,
            low_poll_interval_ms: 30_000,
            min_reseed_interval_ms: None,
            parallel_poll: None,
            fault_demotion_threshold: None,
        }
    }
}

impl GeneratorConfig {
    /// Reseed threshold for the given priority, in bytes.
    pub fn reseed_threshold_bytes(&self, priority: Priority) -> u64 {
        match priority {
            Priority::High => self.high_reseed_threshold_bytes,
            Priority::Normal => self.normal_reseed_threshold_bytes,
            Priority::Low => self.low_reseed_threshold_bytes,
        }
    }

    /// Inter-cycle sleep for the given priority.
    pub fn poll_interval(&self, priority: Priority) -> Duration {
        let ms = match priority {
            Priority::High => self.high_poll_interval_ms,
            Priority::Normal => self.normal_poll_interval_ms,
            Priority::Low => self.low_poll_interval_ms,
        };
        Duration::from_millis(ms)
    }

    /// Minimum spacing between reseeds, if enforced.
    pub fn min_reseed_interval(&self) -> Option<Duration> {
        self.min_reseed_interval_ms.map(Duration::from_millis)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.high_reseed_threshold_bytes == 0
            || self.normal_reseed_threshold_bytes == 0
            || self.low_reseed_threshold_bytes == 0
        {
            return Err(ConfigError::InvalidThreshold);
        }
        if self.high_poll_interval_ms == 0
            || self.normal_poll_interval_ms == 0
            || self.low_poll_interval_ms == 0
        {
            return Err(ConfigError::InvalidInterval);
        }
        if self.parallel_poll == Some(0) {
            return Err(ConfigError::InvalidParallelism);
        }
        if self.fault_demotion_threshold == Some(0) {
            return Err(ConfigError::InvalidDemotionThreshold);
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: GeneratorConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("reseed thresholds must be non-zero")]
    InvalidThreshold,
    #[error("poll intervals must be non-zero")]
    InvalidInterval,
    #[error("parallel poll bound must be at least 1")]
    InvalidParallelism,
    #[error("fault demotion threshold must be at least 1")]
    InvalidDemotionThreshold,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = GeneratorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_invalid() {
        let mut config = GeneratorConfig::default();
        config.normal_reseed_threshold_bytes = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold)
        ));
    }

    #[test]
    fn test_zero_poll_interval_invalid() {
        let mut config = GeneratorConfig::default();
        config.high_poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval)
        ));
    }

    #[test]
    fn test_zero_parallelism_invalid() {
        let mut config = GeneratorConfig::default();
        config.parallel_poll = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParallelism)
        ));
    }

    #[test]
    fn test_thresholds_follow_priority() {
        let config = GeneratorConfig::default();
        assert_eq!(config.reseed_threshold_bytes(Priority::High), 48);
        assert_eq!(config.reseed_threshold_bytes(Priority::Normal), 96);
        assert_eq!(config.reseed_threshold_bytes(Priority::Low), 256);
        assert!(config.poll_interval(Priority::High) < config.poll_interval(Priority::Normal));
        assert!(config.poll_interval(Priority::Normal) < config.poll_interval(Priority::Low));
    }
}
