//! Metrics collection and registry.

use crate::generator::PooledGenerator;
use crate::sources::Priority;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of generator state for metrics update.
#[derive(Debug, Clone)]
pub struct GeneratorSnapshot {
    /// Process-unique generator identifier.
    pub unique_id: u64,
    /// Total reseeds performed.
    pub reseed_count: u64,
    /// Total bytes served to callers.
    pub bytes_requested: u64,
    /// Current scheduling priority.
    pub priority: Priority,
    /// Entropy banked in pool zero since it last fed a seed.
    pub pool_zero_entropy_bytes: u64,
    /// Minimum entropy across all pools since their last drain.
    pub min_pool_entropy_bytes: u64,
    /// Registered entropy sources.
    pub sources: usize,
}

impl GeneratorSnapshot {
    /// Captures the current state of a generator.
    pub fn from_generator(generator: &PooledGenerator) -> Self {
        Self {
            unique_id: generator.unique_id(),
            reseed_count: generator.reseed_count(),
            bytes_requested: generator.bytes_requested(),
            priority: generator.priority(),
            pool_zero_entropy_bytes: generator.pool_zero_entropy_bytes(),
            min_pool_entropy_bytes: generator.min_pool_entropy_bytes(),
            sources: generator.source_count(),
        }
    }
}

/// Prometheus metrics registry for generator monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    reseed_total: IntCounter,
    bytes_requested_total: IntCounter,
    priority: IntGauge,
    pool_zero_bytes: IntGauge,
    min_pool_bytes: IntGauge,
    sources: IntGauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all generator metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let reseed_total = IntCounter::new(
            "pooled_entropy_reseed_total",
            "Total number of reseeds performed",
        )?;
        let bytes_requested_total = IntCounter::new(
            "pooled_entropy_bytes_requested_total",
            "Total bytes of output served to callers",
        )?;
        let priority = IntGauge::new(
            "pooled_entropy_priority",
            "Current scheduling priority (0=High, 1=Normal, 2=Low)",
        )?;
        let pool_zero_bytes = IntGauge::new(
            "pooled_entropy_pool_zero_bytes",
            "Entropy bytes banked in pool zero since it last fed a seed",
        )?;
        let min_pool_bytes = IntGauge::new(
            "pooled_entropy_min_pool_bytes",
            "Minimum entropy bytes across all pools since their last drain",
        )?;
        let sources = IntGauge::new(
            "pooled_entropy_sources",
            "Number of registered entropy sources",
        )?;

        registry.register(Box::new(reseed_total.clone()))?;
        registry.register(Box::new(bytes_requested_total.clone()))?;
        registry.register(Box::new(priority.clone()))?;
        registry.register(Box::new(pool_zero_bytes.clone()))?;
        registry.register(Box::new(min_pool_bytes.clone()))?;
        registry.register(Box::new(sources.clone()))?;

        Ok(Self {
            registry,
            reseed_total,
            bytes_requested_total,
            priority,
            pool_zero_bytes,
            min_pool_bytes,
            sources,
        })
    }

    /// Updates all metrics from a snapshot of generator state.
    pub fn update(&self, snapshot: &GeneratorSnapshot) {
        // Counters only move forward; increment by the difference.
        let current_reseeds = self.reseed_total.get();
        if snapshot.reseed_count > current_reseeds {
            self.reseed_total.inc_by(snapshot.reseed_count - current_reseeds);
        }

        let current_bytes = self.bytes_requested_total.get();
        if snapshot.bytes_requested > current_bytes {
            self.bytes_requested_total
                .inc_by(snapshot.bytes_requested - current_bytes);
        }

        self.priority.set(match snapshot.priority {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        });
        self.pool_zero_bytes
            .set(snapshot.pool_zero_entropy_bytes as i64);
        self.min_pool_bytes
            .set(snapshot.min_pool_entropy_bytes as i64);
        self.sources.set(snapshot.sources as i64);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> GeneratorSnapshot {
        GeneratorSnapshot {
            unique_id: 7,
            reseed_count: 3,
            bytes_requested: 4096,
            priority: Priority::Normal,
            pool_zero_entropy_bytes: 12,
            min_pool_entropy_bytes: 4,
            sources: 2,
        }
    }

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&sample_snapshot());

        let output = registry.encode().unwrap();
        assert!(output.contains("pooled_entropy_reseed_total 3"));
        assert!(output.contains("pooled_entropy_bytes_requested_total 4096"));
        assert!(output.contains("pooled_entropy_priority 1"));
        assert!(output.contains("pooled_entropy_sources 2"));
    }

    #[test]
    fn test_counters_never_regress() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&sample_snapshot());

        // A stale snapshot must not decrement the counters.
        let mut stale = sample_snapshot();
        stale.reseed_count = 1;
        stale.bytes_requested = 100;
        registry.update(&stale);

        let output = registry.encode().unwrap();
        assert!(output.contains("pooled_entropy_reseed_total 3"));
        assert!(output.contains("pooled_entropy_bytes_requested_total 4096"));
    }

    #[test]
    fn test_snapshot_from_generator() {
        let generator = PooledGenerator::new();
        let snapshot = GeneratorSnapshot::from_generator(&generator);
        assert_eq!(snapshot.reseed_count, 0);
        assert_eq!(snapshot.bytes_requested, 0);
        assert_eq!(snapshot.priority, Priority::High);
        assert_eq!(snapshot.sources, 0);
    }
}
