//! Entropy source contract and registration.
//!
//! This module defines the abstraction over entropy sources and the
//! thread-safe registry the scheduler polls them through. Sources are
//! distrusted by design: a source may be slow, return nothing, fail,
//! or even collude with other sources. The accumulator's pool scheme
//! bounds the damage any of that can do.

mod mock;
mod registry;

pub use mock::MockSource;
pub use registry::{SourceHandle, SourceRegistry};

use thiserror::Error;

/// Errors a source may raise during polling.
///
/// All of these are recovered locally by the scheduler: the source is
/// skipped for the cycle and polling continues with the next one.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source is temporarily unable to produce data.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The poll itself failed (I/O error, protocol error, etc.).
    #[error("poll failed: {0}")]
    PollFailed(String),
    /// The source panicked while being polled.
    #[error("source panicked during poll")]
    Panicked,
}

/// Polling aggressiveness regime.
///
/// Drives both how often the scheduler polls sources and how much
/// accumulated entropy is required before a reseed fires. A generator
/// starts at `High` (not yet adequately seeded) and is demoted to
/// `Normal` by its first successful reseed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Aggressive: poll continuously, reseed as soon as pool zero has
    /// anything usable. Output is not yet trusted in this regime.
    #[default]
    High,
    /// Steady-state operation.
    Normal,
    /// Background trickle for long-idle generators.
    Low,
}

/// Abstract entropy source polled by the scheduler.
///
/// Implementations may perform I/O of arbitrary latency inside `poll`.
/// Returning `Ok(None)` means "nothing new this cycle" and is not a
/// fault. Errors are tolerated and recovered by the scheduler.
pub trait EntropySource: Send {
    /// Stable instance name. Together with the implementing type this
    /// determines the source's identity for pool addressing, so it must
    /// not change over the process lifetime.
    fn name(&self) -> &str;

    /// Polls the source for fresh entropy at the given priority.
    fn poll(&mut self, priority: Priority) -> Result<Option<Vec<u8>>, SourceError>;

    /// Releases any resources held by the source.
    ///
    /// Called exactly once by the registry on teardown. Implementations
    /// must tolerate the default no-op.
    fn release(&mut self) {}
}

/// Stable identity of a registered source.
///
/// A fingerprint over the source's concrete type name and instance name.
/// Used to bind harvested bytes to their origin inside the mixing pools;
/// it carries no secret and is stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId([u8; 32]);

impl SourceId {
    /// Derives the fingerprint from a type name and instance name.
    pub fn derive(type_name: &str, instance_name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(type_name.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(instance_name.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Returns the raw fingerprint bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is enough to tell sources apart in logs.
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
