//! Text file reader and writer for persisted state.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic string opening every state file.
pub const MAGIC: &str = "PooledEntropyState";

/// Current file format version.
pub const FILE_VERSION: u32 = 1;

/// Field separator within header and record lines (U+001F).
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateItem {
    /// Namespace grouping related keys (e.g. one per component).
    pub namespace: String,
    /// Key, unique within its namespace.
    pub key: String,
    /// Opaque value bytes.
    pub value: Vec<u8>,
}

impl StateItem {
    /// Creates a record.
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Errors reading or writing a state file.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The file has no header line.
    #[error("state file has no header line")]
    MissingHeader,
    /// The header line is malformed.
    #[error("malformed header: {0}")]
    BadHeader(String),
    /// The file carries a version this build cannot read.
    #[error("unsupported state file version {0}")]
    UnsupportedVersion(u32),
    /// The body does not match the header checksum.
    #[error("body checksum mismatch")]
    ChecksumMismatch,
    /// The file body is not valid UTF-8.
    #[error("state file body is not valid utf-8")]
    NotUtf8,
    /// A record line is malformed.
    #[error("malformed record on line {line}: {reason}")]
    BadRecord {
        /// 1-based line number within the file.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// The record count differs from the header's item count.
    #[error("header declares {expected} items, file contains {found}")]
    ItemCountMismatch {
        /// Count declared in the header.
        expected: usize,
        /// Records actually present.
        found: usize,
    },
    /// A namespace or key contains a separator or line terminator.
    #[error("field contains reserved character: {0:?}")]
    ReservedCharacter(String),
}

/// Reads and verifies a state file.
///
/// Accepts any combination of CR/LF line terminators. The checksum is
/// verified over the raw body bytes, from the first line terminator
/// after the header to end of file.
pub fn read_state(path: impl AsRef<Path>) -> Result<Vec<StateItem>, PersistError> {
    let raw = std::fs::read(path.as_ref())?;

    let header_end = raw
        .iter()
        .position(|&b| b == b'\n' || b == b'\r')
        .ok_or(PersistError::MissingHeader)?;
    let header = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| PersistError::BadHeader("header is not valid utf-8".to_string()))?;

    // Skip the header's terminator, treating CRLF as a single break.
    let mut body_start = header_end + 1;
    if raw[header_end] == b'\r' && raw.get(body_start) == Some(&b'\n') {
        body_start += 1;
    }
    let body = &raw[body_start..];

    let expected_count = verify_header(header, body)?;

    let text = std::str::from_utf8(body).map_err(|_| PersistError::NotUtf8)?;
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut items = Vec::with_capacity(expected_count);
    for (index, line) in normalized.split('\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        // Header is line 1; records start on line 2.
        items.push(parse_record(line, index + 2)?);
    }

    if items.len() != expected_count {
        return Err(PersistError::ItemCountMismatch {
            expected: expected_count,
            found: items.len(),
        });
    }

    tracing::debug!(
        path = %path.as_ref().display(),
        items = items.len(),
        "State file read"
    );
    Ok(items)
}

/// Writes a state file atomically.
///
/// The content goes to `<path>.tmp` first; an existing target is
/// rotated to `<path>.old` before the temp file is renamed into place,
/// so a crash mid-swap always leaves a complete file behind.
pub fn write_state(path: impl AsRef<Path>, items: &[StateItem]) -> Result<(), PersistError> {
    let path = path.as_ref();

    let mut body = String::new();
    for item in items {
        check_field(&item.namespace)?;
        check_field(&item.key)?;
        body.push_str(&item.namespace);
        body.push(FIELD_SEPARATOR);
        body.push_str(&item.key);
        body.push(FIELD_SEPARATOR);
        body.push_str(&BASE64.encode(&item.value));
        body.push('\n');
    }

    let checksum = BASE64.encode(Sha256::digest(body.as_bytes()));
    let header = format!(
        "{MAGIC}{FIELD_SEPARATOR}{FILE_VERSION}{FIELD_SEPARATOR}{checksum}{FIELD_SEPARATOR}{}\n",
        items.len()
    );

    let tmp = sibling(path, ".tmp");
    let old = sibling(path, ".old");

    std::fs::write(&tmp, header + &body)?;
    if path.exists() {
        std::fs::rename(path, &old)?;
    }
    std::fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), items = items.len(), "State file written");
    Ok(())
}

/// Validates the header against the body, returning the item count.
fn verify_header(header: &str, body: &[u8]) -> Result<usize, PersistError> {
    let mut fields = header.split(FIELD_SEPARATOR);

    let magic = fields
        .next()
        .ok_or_else(|| PersistError::BadHeader("empty header".to_string()))?;
    if magic != MAGIC {
        return Err(PersistError::BadHeader(format!(
            "unexpected magic string {magic:?}"
        )));
    }

    let version: u32 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PersistError::BadHeader("missing or non-numeric version".to_string()))?;
    if version != FILE_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    let checksum = fields
        .next()
        .ok_or_else(|| PersistError::BadHeader("missing checksum".to_string()))?;
    let declared = BASE64
        .decode(checksum)
        .map_err(|_| PersistError::BadHeader("checksum is not valid base64".to_string()))?;
    if declared != Sha256::digest(body).as_slice() {
        return Err(PersistError::ChecksumMismatch);
    }

    let count: usize = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PersistError::BadHeader("missing or non-numeric item count".to_string()))?;

    Ok(count)
}

/// Parses one record line.
fn parse_record(line: &str, line_number: usize) -> Result<StateItem, PersistError> {
    let mut fields = line.splitn(3, FIELD_SEPARATOR);
    let namespace = fields.next().unwrap_or_default();
    let key = fields.next().ok_or_else(|| PersistError::BadRecord {
        line: line_number,
        reason: "missing key field".to_string(),
    })?;
    let encoded = fields.next().ok_or_else(|| PersistError::BadRecord {
        line: line_number,
        reason: "missing value field".to_string(),
    })?;
    let value = BASE64
        .decode(encoded)
        .map_err(|e| PersistError::BadRecord {
            line: line_number,
            reason: format!("value is not valid base64: {e}"),
        })?;
    Ok(StateItem::new(namespace, key, value))
}

/// Rejects namespaces and keys the line format cannot represent.
fn check_field(field: &str) -> Result<(), PersistError> {
    if field.contains(FIELD_SEPARATOR) || field.contains('\n') || field.contains('\r') {
        return Err(PersistError::ReservedCharacter(field.to_string()));
    }
    Ok(())
}

/// Appends a suffix to the full file name, preserving its extension.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_items() -> Vec<StateItem> {
        vec![
            StateItem::new("prng", "key-hash", vec![0xDE, 0xAD, 0xBE, 0xEF]),
            StateItem::new("accumulator", "reseed-count", 42u64.to_le_bytes().to_vec()),
            StateItem::new("accumulator", "empty-value", Vec::new()),
        ]
    }

    #[test]
    fn test_round_trip_preserves_items() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");

        let items = sample_items();
        write_state(&path, &items).unwrap();
        let restored = read_state(&path).unwrap();
        assert_eq!(restored, items);
    }

    #[test]
    fn test_rewrite_keeps_old_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");

        write_state(&path, &sample_items()).unwrap();
        let replacement = vec![StateItem::new("prng", "key-hash", vec![1, 2, 3])];
        write_state(&path, &replacement).unwrap();

        assert_eq!(read_state(&path).unwrap(), replacement);
        let old = read_state(dir.path().join("state.dat.old")).unwrap();
        assert_eq!(old, sample_items());
    }

    #[test]
    fn test_corrupted_body_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        write_state(&path, &sample_items()).unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 2;
        raw[last] ^= 0x01;
        std::fs::write(&path, raw).unwrap();

        assert!(matches!(
            read_state(&path),
            Err(PersistError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_accepts_crlf_line_endings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        write_state(&path, &sample_items()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let crlf = text.replace('\n', "\r\n");
        std::fs::write(&path, crlf).unwrap();

        // The checksum was computed over LF-terminated body bytes, so
        // rewrite it to match the converted body.
        let raw = std::fs::read_to_string(&path).unwrap();
        let (header, body) = raw.split_once("\r\n").unwrap();
        let checksum = BASE64.encode(Sha256::digest(body.as_bytes()));
        let mut fields: Vec<&str> = header.split(FIELD_SEPARATOR).collect();
        fields[2] = &checksum;
        let patched = format!(
            "{}\r\n{}",
            fields.join(&FIELD_SEPARATOR.to_string()),
            body
        );
        std::fs::write(&path, patched).unwrap();

        assert_eq!(read_state(&path).unwrap(), sample_items());
    }

    #[test]
    fn test_missing_header_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        std::fs::write(&path, b"no terminator at all").unwrap();
        assert!(matches!(
            read_state(&path),
            Err(PersistError::MissingHeader)
        ));
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        std::fs::write(&path, b"SomethingElse\n").unwrap();
        assert!(matches!(read_state(&path), Err(PersistError::BadHeader(_))));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        write_state(&path, &[]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let bumped = text.replacen(
            &format!("{FIELD_SEPARATOR}1{FIELD_SEPARATOR}"),
            &format!("{FIELD_SEPARATOR}99{FIELD_SEPARATOR}"),
            1,
        );
        std::fs::write(&path, bumped).unwrap();

        assert!(matches!(
            read_state(&path),
            Err(PersistError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_item_count_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        write_state(&path, &sample_items()).unwrap();

        // Drop the last record and fix the checksum, leaving the count.
        let text = std::fs::read_to_string(&path).unwrap();
        let (header, body) = text.split_once('\n').unwrap();
        let truncated: String = body
            .lines()
            .take(2)
            .map(|l| format!("{l}\n"))
            .collect();
        let checksum = BASE64.encode(Sha256::digest(truncated.as_bytes()));
        let mut fields: Vec<&str> = header.split(FIELD_SEPARATOR).collect();
        fields[2] = &checksum;
        let patched = format!(
            "{}\n{}",
            fields.join(&FIELD_SEPARATOR.to_string()),
            truncated
        );
        std::fs::write(&path, patched).unwrap();

        assert!(matches!(
            read_state(&path),
            Err(PersistError::ItemCountMismatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_reserved_characters_rejected_on_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        let bad = vec![StateItem::new("name\u{1f}space", "key", vec![1])];
        assert!(matches!(
            write_state(&path, &bad),
            Err(PersistError::ReservedCharacter(_))
        ));
    }

    #[test]
    fn test_empty_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        write_state(&path, &[]).unwrap();
        assert_eq!(read_state(&path).unwrap(), Vec::new());
    }
}
