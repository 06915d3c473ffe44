//! Prometheus metrics for generator monitoring.
//!
//! Exposes the generator's observable state as Prometheus metrics.
//! The library only maintains the registry; serving it over HTTP is
//! left to the embedding application.
//!
//! # Metrics Exposed
//!
//! - `pooled_entropy_reseed_total` - Total reseeds performed
//! - `pooled_entropy_bytes_requested_total` - Bytes served to callers
//! - `pooled_entropy_priority` - Scheduling priority (0=High, 1=Normal, 2=Low)
//! - `pooled_entropy_pool_zero_bytes` - Entropy banked in pool zero
//! - `pooled_entropy_min_pool_bytes` - Minimum entropy across all pools
//! - `pooled_entropy_sources` - Registered entropy sources

mod collector;

pub use collector::{GeneratorSnapshot, MetricsError, MetricsRegistry};
