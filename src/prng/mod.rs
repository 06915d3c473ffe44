//! Cipher-based deterministic PRNG with forward secrecy.
//!
//! The output stage of the generator: a ChaCha20 counter stream that
//! rekeys itself after every request and folds reseed material into its
//! key with SHA-256.

mod cipher;

pub use cipher::{CipherPrng, PrngError, DEFAULT_MAX_REQUEST_BYTES, KEY_LEN};
