//! Thread-safe source registry.
//!
//! The registry owns source handles and hands out shallow snapshots so
//! the scheduler can poll slow sources without holding the registry
//! lock. Sources may be added at any time, including while the
//! scheduler is already polling.

use super::{EntropySource, Priority, SourceError, SourceId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle to a registered source.
///
/// Cloning the handle clones the reference, not the source; a snapshot
/// of the registry is therefore cheap and iterates the same source
/// instances the registry owns.
#[derive(Clone)]
pub struct SourceHandle {
    id: SourceId,
    name: Arc<str>,
    source: Arc<Mutex<Box<dyn EntropySource>>>,
    released: Arc<AtomicBool>,
}

impl SourceHandle {
    /// Returns the source's stable identity.
    #[inline]
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Returns the source's instance name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Polls the underlying source at the given priority.
    ///
    /// A panicking source is caught and reported as
    /// [`SourceError::Panicked`] rather than unwinding into the caller.
    pub fn poll(&self, priority: Priority) -> Result<Option<Vec<u8>>, SourceError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("source released".to_string()));
        }
        let mut source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        catch_unwind(AssertUnwindSafe(|| source.poll(priority)))
            .unwrap_or(Err(SourceError::Panicked))
    }

    /// Invokes the source's release hook, at most once.
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        source.release();
        tracing::debug!(source = %self.name, id = %self.id, "Source released");
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("id", &self.id.to_string())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Thread-safe set of entropy sources.
#[derive(Default)]
pub struct SourceRegistry {
    handles: Mutex<Vec<SourceHandle>>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source and returns its derived identity.
    ///
    /// The identity fingerprints the concrete source type together with
    /// its instance name, so it is stable across polls.
    pub fn add<S: EntropySource + 'static>(&self, source: S) -> SourceId {
        let id = SourceId::derive(std::any::type_name::<S>(), source.name());
        let name: Arc<str> = source.name().into();
        let handle = SourceHandle {
            id,
            name: Arc::clone(&name),
            source: Arc::new(Mutex::new(Box::new(source))),
            released: Arc::new(AtomicBool::new(false)),
        };
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handles.push(handle);
        tracing::info!(source = %name, id = %id, total = handles.len(), "Source registered");
        id
    }

    /// Returns a shallow snapshot of the current handles.
    ///
    /// The registry lock is held only for the clone; polling the
    /// returned handles does not block concurrent `add` calls.
    pub fn snapshot(&self) -> Vec<SourceHandle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of registered sources.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every source exactly once.
    ///
    /// Safe to call repeatedly; handles already released are skipped.
    pub fn release_all(&self) {
        let handles = self.snapshot();
        for handle in &handles {
            handle.release();
        }
    }
}
