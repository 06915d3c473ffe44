//! Mock entropy source for testing.

use super::{EntropySource, Priority, SourceError};

/// Mock source that returns a fixed payload on every poll.
///
/// NOT an entropy source - the payload is caller-chosen and fully
/// predictable. Only for exercising the accumulator and scheduler.
#[derive(Debug)]
pub struct MockSource {
    name: String,
    payload: Vec<u8>,
    polls: u64,
}

impl MockSource {
    /// Creates a mock source returning `payload` on every poll.
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
            polls: 0,
        }
    }

    /// Returns how many times the source has been polled.
    pub fn poll_count(&self) -> u64 {
        self.polls
    }
}

impl EntropySource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self, _priority: Priority) -> Result<Option<Vec<u8>>, SourceError> {
        self.polls += 1;
        if self.payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_payload_every_poll() {
        let mut source = MockSource::new("mock", vec![0xAA; 8]);
        assert_eq!(source.poll(Priority::High).unwrap(), Some(vec![0xAA; 8]));
        assert_eq!(source.poll(Priority::Normal).unwrap(), Some(vec![0xAA; 8]));
        assert_eq!(source.poll_count(), 2);
    }

    #[test]
    fn test_empty_payload_means_nothing_new() {
        let mut source = MockSource::new("dry", Vec::new());
        assert_eq!(source.poll(Priority::Normal).unwrap(), None);
    }
}
