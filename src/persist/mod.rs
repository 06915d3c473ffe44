//! Persistent generator state as a checksummed text file.
//!
//! Lets a long-running generator carry accumulated state across process
//! restarts. The format is a line-oriented text file: a header carrying
//! a magic string, format version, body checksum and item count,
//! followed by one `(namespace, key, value)` record per line with
//! base64-encoded values. Writes are atomic: the new content lands in a
//! temporary file that is renamed over the target, with the previous
//! file retained under an `.old` suffix.

mod file;

pub use file::{
    read_state, write_state, PersistError, StateItem, FIELD_SEPARATOR, FILE_VERSION, MAGIC,
};
