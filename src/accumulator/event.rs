//! Entropy event type.

use crate::sources::SourceId;

/// A single harvest delivered to the accumulator.
///
/// Pairs an opaque byte sequence of arbitrary length with the stable
/// identity of the source that produced it. The identity is bound into
/// the pool hash together with the payload, so identical payloads from
/// different sources never hash to the same pool input.
#[derive(Clone)]
pub struct EntropyEvent {
    data: Vec<u8>,
    source: SourceId,
}

impl EntropyEvent {
    /// Creates an event from harvested bytes and the source identity.
    pub fn new(data: Vec<u8>, source: SourceId) -> Self {
        Self { data, source }
    }

    /// Returns the harvested bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the number of harvested bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the event carries no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the identity of the originating source.
    #[inline]
    pub fn source(&self) -> SourceId {
        self.source
    }
}

impl std::fmt::Debug for EntropyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print harvested bytes.
        f.debug_struct("EntropyEvent")
            .field("bytes", &self.data.len())
            .field("source", &self.source.to_string())
            .finish()
    }
}
