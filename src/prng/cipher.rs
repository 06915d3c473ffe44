//! ChaCha20-based deterministic generator.
//!
//! Wraps a ChaCha20 counter stream with the reseed-and-rekey discipline
//! the pooled generator depends on: every request is followed by a
//! rekey from the same stream, so the bytes handed out can never be
//! used to reconstruct future output, and a compromised key reveals
//! nothing about past output.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use zeroize::Zeroize;

/// Cipher key width in bytes.
pub const KEY_LEN: usize = 32;

/// Hard cap on a single request, in bytes.
///
/// Bounds how much contiguous counter-stream output leaves under one
/// key; the rekey between requests does the rest.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1 << 20;

/// ChaCha20 block width, for counter accounting.
const BLOCK_LEN: usize = 64;

/// Distinguishes cheap-key instances created in the same instant.
static CHEAP_KEY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Errors that can occur when requesting output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrngError {
    /// The instance requires a seed and none has been provided yet.
    #[error("generator not yet seeded")]
    NotSeeded,
    /// The request exceeds the per-request byte cap.
    #[error("requested {requested} bytes exceeds per-request cap of {max}")]
    RequestTooLarge {
        /// Bytes the caller asked for.
        requested: usize,
        /// The instance's cap.
        max: usize,
    },
}

/// Deterministic stream generator with rekey-after-read.
///
/// Three construction modes:
/// - [`CipherPrng::new_requiring_seed`]: all-zero key, refuses to
///   generate until the first [`reseed`](CipherPrng::reseed);
/// - [`CipherPrng::with_cheap_key`]: keyed from readily-available
///   low-grade material, generates immediately. For internal needs
///   such as shuffling, never for output served to callers;
/// - [`CipherPrng::from_seed_material`]: keyed from caller-provided
///   bytes.
pub struct CipherPrng {
    key: [u8; KEY_LEN],
    stream: ChaCha20Rng,
    block_counter: u128,
    seeded: bool,
}

impl CipherPrng {
    /// Creates an unkeyed instance that refuses to generate until the
    /// first reseed.
    pub fn new_requiring_seed() -> Self {
        let key = [0u8; KEY_LEN];
        Self {
            key,
            stream: ChaCha20Rng::from_seed(key),
            block_counter: 0,
            seeded: false,
        }
    }

    /// Creates an instance keyed from low-grade process-local material.
    ///
    /// The key is a hash of the wall clock, process id, thread id and a
    /// process-wide sequence number. Good enough to make shuffles
    /// unpredictable to an outside observer; not suitable for keys or
    /// any output served to callers.
    pub fn with_cheap_key() -> Self {
        let mut hasher = blake3::Hasher::new();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        hasher.update(&now.as_nanos().to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(format!("{:?}", std::thread::current().id()).as_bytes());
        hasher.update(&CHEAP_KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed).to_le_bytes());

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(hasher.finalize().as_bytes());
        let instance = Self {
            key,
            stream: ChaCha20Rng::from_seed(key),
            block_counter: 1,
            seeded: true,
        };
        key.zeroize();
        instance
    }

    /// Creates an instance keyed from explicit seed material.
    pub fn from_seed_material(material: &[u8]) -> Self {
        let mut instance = Self::new_requiring_seed();
        instance.reseed(material);
        instance
    }

    /// Fills `dest` with output of the counter stream, then rekeys.
    ///
    /// Fails with [`PrngError::NotSeeded`] on a requires-seed instance
    /// before its first reseed, and with [`PrngError::RequestTooLarge`]
    /// when `dest` exceeds [`max_request_bytes`](Self::max_request_bytes).
    /// On success the key has been replaced by further stream output, so
    /// the returned bytes cannot predict anything generated later.
    pub fn generate(&mut self, dest: &mut [u8]) -> Result<(), PrngError> {
        if !self.seeded {
            return Err(PrngError::NotSeeded);
        }
        if dest.len() > DEFAULT_MAX_REQUEST_BYTES {
            return Err(PrngError::RequestTooLarge {
                requested: dest.len(),
                max: DEFAULT_MAX_REQUEST_BYTES,
            });
        }

        self.stream.fill_bytes(dest);
        self.rekey();
        self.block_counter += blocks_for(dest.len() + KEY_LEN);
        Ok(())
    }

    /// Mixes new seed material into the key.
    ///
    /// `key <- SHA-256(key || material)`, counter advanced by one so no
    /// previously used counter value recurs. Never fails; an instance
    /// constructed in requires-seed mode becomes able to generate.
    pub fn reseed(&mut self, material: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(material);
        let mut digest: [u8; KEY_LEN] = hasher.finalize().into();

        self.key.zeroize();
        self.key.copy_from_slice(&digest);
        digest.zeroize();

        self.stream = ChaCha20Rng::from_seed(self.key);
        self.block_counter += 1;
        self.seeded = true;

        tracing::trace!(
            counter = self.block_counter as u64,
            material_bytes = material.len(),
            "Cipher rekeyed from seed material"
        );
    }

    /// Returns the per-request byte cap.
    #[inline]
    pub fn max_request_bytes(&self) -> usize {
        DEFAULT_MAX_REQUEST_BYTES
    }

    /// Returns true once the instance has been keyed.
    #[inline]
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Monotone count of cipher blocks consumed.
    #[inline]
    pub fn block_counter(&self) -> u128 {
        self.block_counter
    }

    /// Replaces the key with fresh output of the current stream.
    fn rekey(&mut self) {
        let mut next = [0u8; KEY_LEN];
        self.stream.fill_bytes(&mut next);
        self.key.zeroize();
        self.key = next;
        self.stream = ChaCha20Rng::from_seed(self.key);
        next.zeroize();
    }

    #[cfg(test)]
    pub(crate) fn key_bytes(&self) -> [u8; KEY_LEN] {
        self.key
    }
}

impl Drop for CipherPrng {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for CipherPrng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The key never appears in debug output.
        f.debug_struct("CipherPrng")
            .field("seeded", &self.seeded)
            .field("block_counter", &self.block_counter)
            .finish_non_exhaustive()
    }
}

impl RngCore for CipherPrng {
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    /// Infallible fill for the `rand` shuffle machinery.
    ///
    /// # Panics
    ///
    /// Panics if the instance requires a seed and none has been
    /// provided; use [`CipherPrng::generate`] for fallible access.
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(DEFAULT_MAX_REQUEST_BYTES) {
            if let Err(e) = self.generate(chunk) {
                panic!("infallible fill on unseeded generator: {e}");
            }
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.generate(dest).map_err(rand_core::Error::new)
    }
}

/// Number of cipher blocks covering `bytes` of output.
fn blocks_for(bytes: usize) -> u128 {
    bytes.div_ceil(BLOCK_LEN) as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_to_generate_before_seed() {
        let mut prng = CipherPrng::new_requiring_seed();
        let mut buf = [0u8; 16];
        assert_eq!(prng.generate(&mut buf), Err(PrngError::NotSeeded));

        prng.reseed(b"some material");
        assert!(prng.generate(&mut buf).is_ok());
    }

    #[test]
    fn test_request_cap_enforced() {
        let mut prng = CipherPrng::from_seed_material(b"seed");
        let mut oversized = vec![0u8; DEFAULT_MAX_REQUEST_BYTES + 1];
        assert!(matches!(
            prng.generate(&mut oversized),
            Err(PrngError::RequestTooLarge { .. })
        ));

        let mut at_cap = vec![0u8; DEFAULT_MAX_REQUEST_BYTES];
        assert!(prng.generate(&mut at_cap).is_ok());
    }

    #[test]
    fn test_key_changes_after_every_generate() {
        let mut prng = CipherPrng::from_seed_material(b"seed");
        let mut buf = [0u8; 64];

        let before = prng.key_bytes();
        prng.generate(&mut buf).unwrap();
        let after = prng.key_bytes();
        assert_ne!(before, after);

        // Even a zero-length request rekeys.
        prng.generate(&mut []).unwrap();
        assert_ne!(after, prng.key_bytes());
    }

    #[test]
    fn test_deterministic_for_same_seed_history() {
        let mut a = CipherPrng::from_seed_material(b"identical");
        let mut b = CipherPrng::from_seed_material(b"identical");

        let mut buf_a = [0u8; 48];
        let mut buf_b = [0u8; 48];
        a.generate(&mut buf_a).unwrap();
        b.generate(&mut buf_b).unwrap();
        assert_eq!(buf_a, buf_b);

        // Streams keep agreeing after the rekey.
        a.generate(&mut buf_a).unwrap();
        b.generate(&mut buf_b).unwrap();
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_reseed_changes_stream() {
        let mut a = CipherPrng::from_seed_material(b"identical");
        let mut b = CipherPrng::from_seed_material(b"identical");
        b.reseed(b"divergence");

        let mut buf_a = [0u8; 32];
        let mut buf_b = [0u8; 32];
        a.generate(&mut buf_a).unwrap();
        b.generate(&mut buf_b).unwrap();
        assert_ne!(buf_a, buf_b);
    }

    #[test]
    fn test_counter_never_regresses() {
        let mut prng = CipherPrng::from_seed_material(b"seed");
        let mut previous = prng.block_counter();
        let mut buf = [0u8; 100];
        for _ in 0..5 {
            prng.generate(&mut buf).unwrap();
            assert!(prng.block_counter() > previous);
            previous = prng.block_counter();
        }
        prng.reseed(b"more");
        assert!(prng.block_counter() > previous);
    }

    #[test]
    fn test_cheap_key_generates_immediately() {
        let mut prng = CipherPrng::with_cheap_key();
        let mut buf = [0u8; 32];
        assert!(prng.generate(&mut buf).is_ok());
        assert_ne!(buf, [0u8; 32]);
    }

    #[test]
    fn test_cheap_key_instances_differ() {
        let mut a = CipherPrng::with_cheap_key();
        let mut b = CipherPrng::with_cheap_key();
        let mut buf_a = [0u8; 32];
        let mut buf_b = [0u8; 32];
        a.generate(&mut buf_a).unwrap();
        b.generate(&mut buf_b).unwrap();
        assert_ne!(buf_a, buf_b);
    }

    #[test]
    fn test_rng_core_shuffle_support() {
        use rand::seq::SliceRandom;

        let mut prng = CipherPrng::with_cheap_key();
        let mut items: Vec<u32> = (0..64).collect();
        let original = items.clone();
        items.shuffle(&mut prng);

        assert_eq!(items.len(), original.len());
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, original);
    }
}
