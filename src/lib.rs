//! Pooled Entropy Generator Library
//!
//! A long-running cryptographic pseudo-random number generator that
//! continually harvests entropy from a set of distrusted sources, banks
//! it across 32 mixing pools, and periodically reseeds a cipher-based
//! deterministic generator whose output is served to callers.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! sources → accumulator (32 pools) → cipher prng → callers
//!              ↑                         ↑
//!              └──── worker/scheduler ───┘
//! ```
//!
//! # Design Principles
//!
//! - **Distrust every source**: pool selection bounds what an adversary
//!   controlling some sources can learn or influence
//! - **Forward secrecy**: the cipher rekeys itself after every request,
//!   so captured state never reveals past output
//! - **Fail-closed**: output is refused until the first reseed completes
//! - **Uses standard primitives**: BLAKE3 pools, SHA-256 key mixing,
//!   ChaCha20 output stream
//!
//! # Example
//!
//! ```no_run
//! use pooled_entropy::{MockSource, PooledGenerator};
//!
//! let generator = PooledGenerator::new();
//! generator.add_source(MockSource::new("demo", vec![0xAA; 64]));
//!
//! // Block until the first reseed unlocks output.
//! generator.start_and_wait_for_nth_seed(1).unwrap();
//!
//! let mut key = [0u8; 32];
//! generator.fill(&mut key).unwrap();
//! generator.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod accumulator;
pub mod generator;
pub mod metrics;
pub mod persist;
pub mod prng;
pub mod sources;

// Re-export commonly used types at crate root
pub use accumulator::{Accumulator, EntropyEvent, NUM_POOLS};
pub use generator::{GeneratorConfig, GeneratorError, PooledGenerator};
pub use prng::{CipherPrng, PrngError};
pub use sources::{EntropySource, MockSource, Priority, SourceError, SourceId, SourceRegistry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
