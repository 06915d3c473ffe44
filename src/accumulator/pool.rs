//! A single mixing pool.

use super::EntropyEvent;

/// Width of a drained pool digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// One mixing pool: an incremental BLAKE3 hash plus counters.
///
/// Events are folded into the hash state as they arrive, so the pool
/// holds a fixed-size commitment to everything it has seen rather than
/// the raw bytes themselves. Draining finalizes the hash to a 32-byte
/// digest and resets the pool to its fresh-empty state.
pub struct Pool {
    hasher: blake3::Hasher,
    bytes_since_drain: u64,
    entropy_estimate_bytes: u64,
}

impl Pool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            bytes_since_drain: 0,
            entropy_estimate_bytes: 0,
        }
    }

    /// Folds an event into the pool.
    ///
    /// The source identity is hashed ahead of the payload so the pool
    /// input is unambiguous about which source supplied which bytes.
    pub fn add(&mut self, event: &EntropyEvent) {
        self.hasher.update(event.source().as_bytes());
        self.hasher.update(event.data());
        self.bytes_since_drain += event.len() as u64;
        // One byte of input is credited at most one byte of entropy;
        // a conservative lower bound for the reseed predicate.
        self.entropy_estimate_bytes += event.len() as u64;
    }

    /// Finalizes and resets the pool, returning its digest.
    pub fn drain(&mut self) -> [u8; DIGEST_LEN] {
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(self.hasher.finalize().as_bytes());
        self.hasher.reset();
        self.bytes_since_drain = 0;
        self.entropy_estimate_bytes = 0;
        digest
    }

    /// Bytes folded in since the pool last contributed to a seed.
    #[inline]
    pub fn bytes_since_drain(&self) -> u64 {
        self.bytes_since_drain
    }

    /// Conservative entropy estimate (bytes) since the last drain.
    #[inline]
    pub fn entropy_estimate_bytes(&self) -> u64 {
        self.entropy_estimate_bytes
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("bytes_since_drain", &self.bytes_since_drain)
            .field("entropy_estimate_bytes", &self.entropy_estimate_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceId;

    fn event(data: &[u8]) -> EntropyEvent {
        EntropyEvent::new(data.to_vec(), SourceId::derive("test::Source", "a"))
    }

    #[test]
    fn test_counters_track_added_bytes() {
        let mut pool = Pool::new();
        pool.add(&event(&[1, 2, 3]));
        pool.add(&event(&[4, 5]));
        assert_eq!(pool.bytes_since_drain(), 5);
        assert_eq!(pool.entropy_estimate_bytes(), 5);
    }

    #[test]
    fn test_drain_resets_to_fresh_empty() {
        let mut pool = Pool::new();
        let empty_digest = pool.drain();

        pool.add(&event(&[1, 2, 3]));
        let filled_digest = pool.drain();
        assert_ne!(filled_digest, empty_digest);
        assert_eq!(pool.bytes_since_drain(), 0);
        assert_eq!(pool.entropy_estimate_bytes(), 0);

        // After draining, the hash state matches a never-used pool.
        assert_eq!(pool.drain(), empty_digest);
    }

    #[test]
    fn test_source_identity_affects_digest() {
        let data = vec![0xAA; 16];
        let a = EntropyEvent::new(data.clone(), SourceId::derive("test::Source", "a"));
        let b = EntropyEvent::new(data, SourceId::derive("test::Source", "b"));

        let mut pool_a = Pool::new();
        let mut pool_b = Pool::new();
        pool_a.add(&a);
        pool_b.add(&b);

        assert_ne!(pool_a.drain(), pool_b.drain());
    }
}
