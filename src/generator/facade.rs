//! Public generator facade and shared worker state.

use super::config::GeneratorConfig;
use super::worker;
use crate::accumulator::Accumulator;
use crate::prng::{CipherPrng, PrngError};
use crate::sources::{EntropySource, Priority, SourceId, SourceRegistry};
use rand_core::RngCore;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the generator facade.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Output was requested before any reseed completed.
    #[error("no reseed has completed yet")]
    Uninitialised,
    /// The request exceeds the cipher's per-request cap.
    #[error("requested {requested} bytes exceeds per-request cap of {max}")]
    RequestTooLarge {
        /// Bytes the caller asked for.
        requested: usize,
        /// The cipher's cap.
        max: usize,
    },
    /// A blocking wait was interrupted by shutdown.
    #[error("operation cancelled by shutdown")]
    Cancelled,
    /// The generator has been disposed.
    #[error("generator has been disposed")]
    Disposed,
    /// `start` was called on an already-started generator.
    #[error("worker already started")]
    AlreadyStarted,
    /// The operation requires a running worker.
    #[error("worker is not running")]
    NotRunning,
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(String),
}

impl From<PrngError> for GeneratorError {
    fn from(e: PrngError) -> Self {
        match e {
            PrngError::NotSeeded => GeneratorError::Uninitialised,
            PrngError::RequestTooLarge { requested, max } => {
                GeneratorError::RequestTooLarge { requested, max }
            }
        }
    }
}

/// Listener invoked on the worker thread after each reseed.
pub type ReseedListener = Arc<dyn Fn(u64) + Send + Sync>;

/// State shared between the facade and the worker thread.
pub(crate) struct Shared {
    pub(crate) prng: Mutex<CipherPrng>,
    pub(crate) accumulator: Mutex<Accumulator>,
    pub(crate) registry: SourceRegistry,
    priority: AtomicU8,
    reseed_count: AtomicU64,
    bytes_requested: AtomicU64,
    stop: AtomicBool,
    disposed: AtomicBool,
    // Composite wake-or-stop primitive the worker parks on. The flag
    // records a wake that arrived while the worker was not waiting.
    wake_flag: Mutex<bool>,
    wake_cv: Condvar,
    // Reseed broadcast for waiters; the guarded value mirrors
    // `reseed_count` so waits have a proper condition to re-check.
    reseed_signal: Mutex<u64>,
    reseed_cv: Condvar,
    listeners: Mutex<Vec<ReseedListener>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            prng: Mutex::new(CipherPrng::new_requiring_seed()),
            accumulator: Mutex::new(Accumulator::new()),
            registry: SourceRegistry::new(),
            priority: AtomicU8::new(priority_to_u8(Priority::High)),
            reseed_count: AtomicU64::new(0),
            bytes_requested: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            wake_flag: Mutex::new(false),
            wake_cv: Condvar::new(),
            reseed_signal: Mutex::new(0),
            reseed_cv: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn priority(&self) -> Priority {
        priority_from_u8(self.priority.load(Ordering::SeqCst))
    }

    pub(crate) fn set_priority(&self, priority: Priority) {
        self.priority
            .store(priority_to_u8(priority), Ordering::SeqCst);
    }

    /// High drops to Normal after a successful reseed; Normal and Low
    /// are left alone.
    pub(crate) fn demote_after_reseed(&self) {
        let _ = self.priority.compare_exchange(
            priority_to_u8(Priority::High),
            priority_to_u8(Priority::Normal),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub(crate) fn reseed_count(&self) -> u64 {
        self.reseed_count.load(Ordering::SeqCst)
    }

    /// Parks the worker until the timeout elapses, a wake arrives, or
    /// stop is requested. A wake that fired before the call is consumed
    /// immediately instead of being lost.
    pub(crate) fn wait_for_wake(&self, timeout: Duration) {
        let mut flag = self
            .wake_flag
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *flag || self.stop_requested() {
            *flag = false;
            return;
        }
        let (mut flag, _) = self
            .wake_cv
            .wait_timeout(flag, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        *flag = false;
    }

    /// Wakes the worker out of its inter-cycle sleep.
    pub(crate) fn wake_worker(&self) {
        let mut flag = self
            .wake_flag
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *flag = true;
        drop(flag);
        self.wake_cv.notify_all();
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake_cv.notify_all();
        self.reseed_cv.notify_all();
    }

    /// Records a completed reseed and releases every waiter.
    pub(crate) fn publish_reseed(&self, count: u64) {
        let mut signal = self
            .reseed_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *signal = count;
        drop(signal);
        self.reseed_cv.notify_all();
    }

    pub(crate) fn bump_reseed_count(&self) -> u64 {
        self.reseed_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Invokes every listener with unwind protection; a panicking
    /// listener is logged and the rest still run.
    pub(crate) fn fire_reseed_listeners(&self, count: u64) {
        let snapshot: Vec<ReseedListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(count))).is_err() {
                tracing::warn!(reseed = count, "Reseed listener panicked");
            }
        }
    }
}

fn priority_to_u8(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

fn priority_from_u8(value: u8) -> Priority {
    match value {
        0 => Priority::High,
        2 => Priority::Low,
        _ => Priority::Normal,
    }
}

/// Pooled entropy generator.
///
/// Owns the accumulator, the cipher PRNG and the harvesting worker.
/// Callers read output through [`fill`](Self::fill) while the worker
/// polls sources and reseeds in the background; the two only meet at
/// the PRNG lock and the wake signal.
pub struct PooledGenerator {
    shared: Arc<Shared>,
    config: GeneratorConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    unique_id: u64,
}

impl PooledGenerator {
    /// Creates a generator with default configuration.
    ///
    /// The cipher starts unkeyed: [`fill`](Self::fill) fails with
    /// [`GeneratorError::Uninitialised`] until the first reseed, and
    /// priority starts High to make that reseed happen fast.
    pub fn new() -> Self {
        Self::with_config(GeneratorConfig::default())
    }

    /// Creates a generator with the given configuration.
    pub fn with_config(config: GeneratorConfig) -> Self {
        let mut cheap = CipherPrng::with_cheap_key();
        let unique_id = cheap.next_u64();
        tracing::debug!(generator = unique_id, "Generator created");
        Self {
            shared: Arc::new(Shared::new()),
            config,
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
            unique_id,
        }
    }

    /// Returns the generator's process-unique identifier.
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    /// Registers an entropy source, before or after `start`.
    pub fn add_source<S: EntropySource + 'static>(&self, source: S) -> SourceId {
        self.shared.registry.add(source)
    }

    /// Registers a listener fired on the worker thread after each
    /// reseed, once the PRNG lock has been released.
    ///
    /// Handlers should be fast and non-blocking; a panicking handler is
    /// contained and does not stop the worker.
    pub fn on_reseed(&self, listener: impl Fn(u64) + Send + Sync + 'static) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Launches the harvesting worker and returns immediately.
    ///
    /// A second call fails with [`GeneratorError::AlreadyStarted`].
    pub fn start(&self) -> Result<(), GeneratorError> {
        if self.shared.disposed() {
            return Err(GeneratorError::Disposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(GeneratorError::AlreadyStarted);
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("entropy-worker".to_string())
            .spawn(move || worker::run(shared, config))
            .map_err(|e| GeneratorError::WorkerSpawn(e.to_string()))?;

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(generator = self.unique_id, "Generator started");
        Ok(())
    }

    /// Starts the worker if needed and blocks until at least `n`
    /// reseeds have completed.
    pub fn start_and_wait_for_nth_seed(&self, n: u64) -> Result<(), GeneratorError> {
        match self.start() {
            Ok(()) | Err(GeneratorError::AlreadyStarted) => {}
            Err(e) => return Err(e),
        }
        self.wait_for_seed(n)
    }

    /// Forces an out-of-band reseed.
    ///
    /// Priority is driven to High and the worker woken; the call blocks
    /// until the reseed counter has advanced. The worker's own success
    /// path demotes priority back to Normal. Fails with
    /// [`GeneratorError::Disposed`] after shutdown and
    /// [`GeneratorError::NotRunning`] if the worker was never started.
    pub fn reseed(&self) -> Result<(), GeneratorError> {
        if self.shared.disposed() {
            return Err(GeneratorError::Disposed);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(GeneratorError::NotRunning);
        }
        let target = self.shared.reseed_count() + 1;
        self.shared.set_priority(Priority::High);
        self.shared.wake_worker();
        self.wait_for_seed(target)
    }

    /// Fills `dest` with generator output.
    ///
    /// Holds only the PRNG lock; never blocks on the worker. Fails with
    /// [`GeneratorError::Uninitialised`] before the first reseed and
    /// with [`GeneratorError::RequestTooLarge`] past the per-request
    /// cap ([`max_request_bytes`](Self::max_request_bytes)).
    pub fn fill(&self, dest: &mut [u8]) -> Result<(), GeneratorError> {
        if self.shared.disposed() {
            return Err(GeneratorError::Disposed);
        }
        if self.shared.reseed_count() == 0 {
            return Err(GeneratorError::Uninitialised);
        }

        let mut prng = self
            .shared
            .prng
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        prng.generate(dest)?;
        drop(prng);

        self.shared
            .bytes_requested
            .fetch_add(dest.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the cipher's per-request byte cap.
    pub fn max_request_bytes(&self) -> usize {
        self.shared
            .prng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .max_request_bytes()
    }

    /// Completed reseeds so far. Lock-free.
    pub fn reseed_count(&self) -> u64 {
        self.shared.reseed_count()
    }

    /// Total bytes served to callers. Lock-free.
    pub fn bytes_requested(&self) -> u64 {
        self.shared.bytes_requested.load(Ordering::Relaxed)
    }

    /// Current scheduling priority.
    pub fn priority(&self) -> Priority {
        self.shared.priority()
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Entropy banked in pool zero since it last fed a seed.
    pub fn pool_zero_entropy_bytes(&self) -> u64 {
        self.shared
            .accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pool_zero_entropy_bytes()
    }

    /// Minimum entropy across all pools since their last drain.
    pub fn min_pool_entropy_bytes(&self) -> u64 {
        self.shared
            .accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .min_pool_entropy_bytes()
    }

    /// Signals the worker to stop without waiting for it.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Signals the worker to stop and waits for it to exit.
    ///
    /// Safe to call from the worker thread itself (e.g. inside a reseed
    /// listener): the join is skipped and the worker exits on its own
    /// once the listener returns.
    pub fn stop(&self) {
        self.shared.request_stop();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // Called on the worker itself; it will observe the stop
                // flag as soon as the current callback returns.
                return;
            }
            let _ = handle.join();
        }
    }

    /// Disposes the generator: stops the worker and releases every
    /// source exactly once. Idempotent, and safe from any thread
    /// including a reseed listener.
    pub fn shutdown(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();
        self.shared.registry.release_all();
        tracing::info!(generator = self.unique_id, "Generator disposed");
    }

    /// Blocks until `reseed_count >= n`, or fails with `Cancelled` when
    /// stop is requested first.
    fn wait_for_seed(&self, n: u64) -> Result<(), GeneratorError> {
        let mut signal = self
            .shared
            .reseed_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.shared.reseed_count() >= n {
                return Ok(());
            }
            if self.shared.stop_requested() {
                return Err(GeneratorError::Cancelled);
            }
            // Bounded wait so a missed notify can never hang the caller.
            let (guard, _) = self
                .shared
                .reseed_cv
                .wait_timeout(signal, Duration::from_millis(50))
                .unwrap_or_else(PoisonError::into_inner);
            signal = guard;
        }
    }
}

impl Default for PooledGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PooledGenerator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PooledGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledGenerator")
            .field("unique_id", &self.unique_id)
            .field("reseed_count", &self.reseed_count())
            .field("bytes_requested", &self.bytes_requested())
            .field("priority", &self.priority())
            .field("sources", &self.source_count())
            .finish()
    }
}
