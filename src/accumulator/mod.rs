//! Multi-pool entropy accumulation.
//!
//! This module banks incoming entropy events across 32 mixing pools and
//! emits seed material on demand. Pool inclusion follows the Fortuna
//! rule: seed number `k` drains exactly the pools whose index `i`
//! satisfies `2^i | k`, so high-numbered pools are drained exponentially
//! rarely. An adversary who controls some sources must keep control for
//! `2^i` consecutive reseeds before pool `i` seeds with only their data.

mod event;
mod pool;

pub use event::EntropyEvent;
pub use pool::{Pool, DIGEST_LEN};

use zeroize::{Zeroize, Zeroizing};

/// Number of mixing pools.
pub const NUM_POOLS: usize = 32;

/// Bank of mixing pools with round-robin event routing.
pub struct Accumulator {
    pools: [Pool; NUM_POOLS],
    total_reseed_events: u128,
    next_pool_for_event: u32,
}

impl Accumulator {
    /// Creates an accumulator with all pools empty.
    pub fn new() -> Self {
        Self {
            pools: std::array::from_fn(|_| Pool::new()),
            total_reseed_events: 0,
            next_pool_for_event: 0,
        }
    }

    /// Routes an event to the next pool in round-robin order.
    ///
    /// Never fails; an empty event still advances the cursor.
    pub fn add(&mut self, event: &EntropyEvent) {
        let index = self.next_pool_for_event as usize;
        self.pools[index].add(event);
        self.next_pool_for_event = (self.next_pool_for_event + 1) % NUM_POOLS as u32;

        tracing::trace!(
            pool = index,
            bytes = event.len(),
            source = %event.source(),
            "Event accumulated"
        );
    }

    /// Drains the Fortuna-selected pools into fresh seed material.
    ///
    /// Increments the reseed sequence number to `k` and concatenates the
    /// digests of every pool `i` with `2^i | k`: pool 0 contributes to
    /// every seed, pool 1 to every second, pool 31 only to every
    /// `2^31`st. Drained pools are reset; the rest are untouched. The
    /// returned buffer is zeroed when dropped.
    pub fn next_seed(&mut self) -> Zeroizing<Vec<u8>> {
        self.total_reseed_events += 1;
        let k = self.total_reseed_events;

        let mut seed = Zeroizing::new(Vec::with_capacity(DIGEST_LEN * 2));
        let mut drained = 0usize;
        for (i, pool) in self.pools.iter_mut().enumerate() {
            // Divisibility by 2^i fails for the first time at the lowest
            // unset bit of k, and stays failed above it.
            if k % (1u128 << i) != 0 {
                break;
            }
            let mut digest = pool.drain();
            seed.extend_from_slice(&digest);
            digest.zeroize();
            drained += 1;
        }

        tracing::debug!(
            reseed_event = k as u64,
            pools_drained = drained,
            seed_bytes = seed.len(),
            "Seed material drained"
        );
        seed
    }

    /// Entropy banked in pool zero since it last fed a seed.
    ///
    /// Drives the reseed predicate in the High priority regime.
    pub fn pool_zero_entropy_bytes(&self) -> u64 {
        self.pools[0].entropy_estimate_bytes()
    }

    /// Minimum entropy across all pools since their last drain.
    ///
    /// Drives the reseed predicate in the Normal and Low regimes:
    /// requiring every pool to hold fresh material bounds how often the
    /// compromise-resistant high-index pools are drained.
    pub fn min_pool_entropy_bytes(&self) -> u64 {
        self.pools
            .iter()
            .map(Pool::entropy_estimate_bytes)
            .min()
            .unwrap_or(0)
    }

    /// Monotone reseed sequence number.
    #[inline]
    pub fn total_reseed_events(&self) -> u128 {
        self.total_reseed_events
    }

    /// Index of the pool the next event will be routed to.
    #[inline]
    pub fn next_pool_for_event(&self) -> u32 {
        self.next_pool_for_event
    }

    /// Per-pool entropy estimates, for observability.
    pub fn pool_entropy_bytes(&self) -> [u64; NUM_POOLS] {
        std::array::from_fn(|i| self.pools[i].entropy_estimate_bytes())
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accumulator")
            .field("total_reseed_events", &self.total_reseed_events)
            .field("next_pool_for_event", &self.next_pool_for_event)
            .field("pool_zero_bytes", &self.pool_zero_entropy_bytes())
            .field("min_pool_bytes", &self.min_pool_entropy_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceId;

    fn event(data: &[u8]) -> EntropyEvent {
        EntropyEvent::new(data.to_vec(), SourceId::derive("test::Source", "a"))
    }

    /// Pools a seed event number `k` should drain.
    fn expected_pools(k: u128) -> Vec<usize> {
        (0..NUM_POOLS).take_while(|&i| k % (1u128 << i) == 0).collect()
    }

    #[test]
    fn test_round_robin_cursor_advances_by_one() {
        let mut accumulator = Accumulator::new();
        for i in 0..(NUM_POOLS as u32 * 2 + 3) {
            assert_eq!(accumulator.next_pool_for_event(), i % NUM_POOLS as u32);
            accumulator.add(&event(&[1]));
        }
    }

    #[test]
    fn test_fortuna_selection_first_four_seeds() {
        assert_eq!(expected_pools(1), vec![0]);
        assert_eq!(expected_pools(2), vec![0, 1]);
        assert_eq!(expected_pools(3), vec![0]);
        assert_eq!(expected_pools(4), vec![0, 1, 2]);

        let mut accumulator = Accumulator::new();
        // Fill every pool so all counters are non-zero.
        for _ in 0..NUM_POOLS {
            accumulator.add(&event(&[0xAA; 10]));
        }

        // k = 1 drains only pool 0.
        accumulator.next_seed();
        let after_first = accumulator.pool_entropy_bytes();
        assert_eq!(after_first[0], 0);
        assert!(after_first[1..].iter().all(|&b| b == 10));

        // k = 2 drains pools 0 and 1.
        accumulator.next_seed();
        let after_second = accumulator.pool_entropy_bytes();
        assert_eq!(after_second[0], 0);
        assert_eq!(after_second[1], 0);
        assert!(after_second[2..].iter().all(|&b| b == 10));
    }

    #[test]
    fn test_seed_length_matches_drained_pools() {
        let mut accumulator = Accumulator::new();
        for k in 1u128..=8 {
            let seed = accumulator.next_seed();
            assert_eq!(seed.len(), expected_pools(k).len() * DIGEST_LEN);
        }
    }

    #[test]
    fn test_reseed_events_strictly_monotone() {
        let mut accumulator = Accumulator::new();
        let mut previous = accumulator.total_reseed_events();
        for _ in 0..10 {
            accumulator.next_seed();
            let current = accumulator.total_reseed_events();
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn test_drained_pool_counters_reset_others_untouched() {
        let mut accumulator = Accumulator::new();
        for _ in 0..NUM_POOLS {
            accumulator.add(&event(&[0x11; 7]));
        }

        accumulator.next_seed(); // k = 1, pools {0}
        assert_eq!(accumulator.pool_zero_entropy_bytes(), 0);
        assert_eq!(accumulator.min_pool_entropy_bytes(), 0);
        assert_eq!(accumulator.pool_entropy_bytes()[5], 7);
    }

    #[test]
    fn test_min_pool_requires_every_pool_fed() {
        let mut accumulator = Accumulator::new();

        // 25 bytes per event: a full round leaves min = 25, short
        // rounds leave min = 0.
        for _ in 0..(NUM_POOLS - 1) {
            accumulator.add(&event(&[0xAA; 25]));
        }
        assert_eq!(accumulator.min_pool_entropy_bytes(), 0);

        accumulator.add(&event(&[0xAA; 25]));
        assert_eq!(accumulator.min_pool_entropy_bytes(), 25);

        // Three more full rounds push every pool past 96 bytes.
        for _ in 0..(NUM_POOLS * 3) {
            accumulator.add(&event(&[0xAA; 25]));
        }
        assert!(accumulator.min_pool_entropy_bytes() > 96);
    }

    #[test]
    fn test_seed_depends_on_accumulated_events() {
        let mut a = Accumulator::new();
        let mut b = Accumulator::new();
        a.add(&event(&[0xAA; 32]));
        b.add(&event(&[0xBB; 32]));
        assert_ne!(a.next_seed().to_vec(), b.next_seed().to_vec());

        // Same history produces the same seed material.
        let mut c = Accumulator::new();
        let mut d = Accumulator::new();
        c.add(&event(&[0xAA; 32]));
        d.add(&event(&[0xAA; 32]));
        assert_eq!(c.next_seed().to_vec(), d.next_seed().to_vec());
    }
}
