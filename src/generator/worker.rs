//! Harvesting worker loop.
//!
//! One long-running thread does all entropy harvesting and all
//! reseeding: snapshot the registry, shuffle, poll every source, feed
//! the accumulator, reseed when the current priority's threshold is
//! met, then park on the wake-or-stop signal until the next cycle.

use super::config::GeneratorConfig;
use super::facade::Shared;
use crate::accumulator::{Accumulator, EntropyEvent};
use crate::prng::CipherPrng;
use crate::sources::{Priority, SourceError, SourceHandle, SourceId};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

/// How long an empty-registry cycle parks before checking again.
const EMPTY_REGISTRY_WAIT: Duration = Duration::from_millis(100);

/// Worker entry point; returns when stop is requested.
pub(super) fn run(shared: Arc<Shared>, config: GeneratorConfig) {
    tracing::debug!("Harvest worker running");

    // Cheap-key instance: only decides polling order, never feeds
    // output served to callers.
    let mut shuffle_rng = CipherPrng::with_cheap_key();
    let mut fault_tallies: HashMap<SourceId, u32> = HashMap::new();
    let mut demoted: HashSet<SourceId> = HashSet::new();
    let mut last_reseed: Option<Instant> = None;

    while !shared.stop_requested() {
        let mut sources = shared.registry.snapshot();
        if sources.is_empty() {
            shared.wait_for_wake(EMPTY_REGISTRY_WAIT);
            continue;
        }

        // In a fixed order the last-polled source has the final say on
        // the cycle's accumulator state, and a malicious source that
        // learns its slot can exploit that.
        sources.shuffle(&mut shuffle_rng);
        sources.retain(|handle| !demoted.contains(&handle.id()));

        let priority = shared.priority();
        match config.parallel_poll {
            Some(bound) => poll_parallel(
                &shared,
                &sources,
                priority,
                bound,
                &config,
                &mut fault_tallies,
                &mut demoted,
            ),
            None => poll_sequential(
                &shared,
                &sources,
                priority,
                &config,
                &mut fault_tallies,
                &mut demoted,
            ),
        }

        if shared.stop_requested() {
            break;
        }

        try_reseed(&shared, &config, &mut last_reseed);

        shared.wait_for_wake(config.poll_interval(shared.priority()));
    }

    tracing::debug!("Harvest worker exited");
}

/// Polls sources one at a time, feeding the accumulator as results
/// arrive. Stop is observed between polls.
fn poll_sequential(
    shared: &Shared,
    sources: &[SourceHandle],
    priority: Priority,
    config: &GeneratorConfig,
    fault_tallies: &mut HashMap<SourceId, u32>,
    demoted: &mut HashSet<SourceId>,
) {
    for handle in sources {
        if shared.stop_requested() {
            return;
        }
        match handle.poll(priority) {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                fault_tallies.remove(&handle.id());
                accumulate(shared, EntropyEvent::new(bytes, handle.id()));
            }
            Ok(_) => {}
            Err(error) => record_fault(handle, &error, config, fault_tallies, demoted),
        }
    }
}

/// Polls sources with bounded parallelism.
///
/// Results are collected first and folded into the accumulator in the
/// shuffled order only after every poll of the cycle has completed, so
/// the accumulator sees the same well-defined ordering as sequential
/// mode.
fn poll_parallel(
    shared: &Shared,
    sources: &[SourceHandle],
    priority: Priority,
    bound: usize,
    config: &GeneratorConfig,
    fault_tallies: &mut HashMap<SourceId, u32>,
    demoted: &mut HashSet<SourceId>,
) {
    let mut results: Vec<Option<Result<Option<Vec<u8>>, SourceError>>> =
        (0..sources.len()).map(|_| None).collect();

    for (batch_index, batch) in sources.chunks(bound).enumerate() {
        if shared.stop_requested() {
            return;
        }
        let batch_results: Vec<Result<Option<Vec<u8>>, SourceError>> =
            std::thread::scope(|scope| {
                let joins: Vec<_> = batch
                    .iter()
                    .map(|handle| scope.spawn(move || handle.poll(priority)))
                    .collect();
                joins
                    .into_iter()
                    .map(|join| join.join().unwrap_or(Err(SourceError::Panicked)))
                    .collect()
            });
        for (offset, result) in batch_results.into_iter().enumerate() {
            results[batch_index * bound + offset] = Some(result);
        }
    }

    for (handle, result) in sources.iter().zip(results) {
        match result {
            Some(Ok(Some(bytes))) if !bytes.is_empty() => {
                fault_tallies.remove(&handle.id());
                accumulate(shared, EntropyEvent::new(bytes, handle.id()));
            }
            Some(Ok(_)) | None => {}
            Some(Err(error)) => record_fault(handle, &error, config, fault_tallies, demoted),
        }
    }
}

fn accumulate(shared: &Shared, event: EntropyEvent) {
    shared
        .accumulator
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .add(&event);
}

/// Tallies a poll failure and demotes the source once the configured
/// consecutive-fault threshold is reached.
fn record_fault(
    handle: &SourceHandle,
    error: &SourceError,
    config: &GeneratorConfig,
    fault_tallies: &mut HashMap<SourceId, u32>,
    demoted: &mut HashSet<SourceId>,
) {
    let tally = fault_tallies.entry(handle.id()).or_insert(0);
    *tally += 1;
    tracing::warn!(
        source = %handle.name(),
        error = %error,
        consecutive = *tally,
        "Source poll failed, skipping for this cycle"
    );
    if let Some(limit) = config.fault_demotion_threshold {
        if *tally >= limit {
            demoted.insert(handle.id());
            tracing::warn!(
                source = %handle.name(),
                faults = *tally,
                "Source demoted after repeated faults"
            );
        }
    }
}

/// True when the current priority's entropy threshold has been met.
pub(crate) fn reseed_due(
    accumulator: &Accumulator,
    priority: Priority,
    config: &GeneratorConfig,
) -> bool {
    let banked = match priority {
        Priority::High => accumulator.pool_zero_entropy_bytes(),
        Priority::Normal | Priority::Low => accumulator.min_pool_entropy_bytes(),
    };
    banked > config.reseed_threshold_bytes(priority)
}

/// Evaluates the reseed predicate and performs the reseed if due.
///
/// The only code path that holds the accumulator and PRNG locks
/// together, in that order. Returns true if a reseed happened.
pub(crate) fn try_reseed(
    shared: &Shared,
    config: &GeneratorConfig,
    last_reseed: &mut Option<Instant>,
) -> bool {
    if shared.stop_requested() {
        return false;
    }
    if let (Some(min), Some(at)) = (config.min_reseed_interval(), *last_reseed) {
        if at.elapsed() < min {
            return false;
        }
    }

    let priority = shared.priority();
    let mut accumulator = shared
        .accumulator
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if !reseed_due(&accumulator, priority, config) {
        return false;
    }

    let seed = accumulator.next_seed();
    let sequence = accumulator.total_reseed_events();
    let mut prng = shared.prng.lock().unwrap_or_else(PoisonError::into_inner);
    prng.reseed(&seed);
    drop(prng);
    drop(accumulator);
    drop(seed);

    let count = shared.bump_reseed_count();
    shared.demote_after_reseed();
    *last_reseed = Some(Instant::now());

    tracing::info!(
        reseed = count,
        sequence = sequence as u64,
        "Cipher reseeded from pools"
    );

    shared.publish_reseed(count);
    shared.fire_reseed_listeners(count);
    true
}
