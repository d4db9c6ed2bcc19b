//! Globally unique, unordered 64-bit identifiers.
//!
//! An identifier packs a process-unique timestamp counter together with the
//! id of the instance that minted it:
//!
//! ```text
//! | 0 | reversed counter (48 bits) | instance id (15 bits) |
//! ```
//!
//! The counter is drawn from the wall clock in 10µs units and is forced to
//! increase strictly across every generator in the process, so two
//! identifiers minted by the same instance can never collide. The counter
//! bits are reversed so that consecutive identifiers scatter across the key
//! space instead of clustering at its tail.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::unix_micros;

const INSTANCE_BITS: u32 = 15;
const COUNTER_BITS: u32 = 48;
const INSTANCE_MASK: u64 = (1 << INSTANCE_BITS) - 1;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

static LAST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mints identifiers that are unique across all instances of a cluster,
/// provided every instance uses a distinct instance id. Identifiers carry no
/// useful ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniqueIdGenerator {
    instance_id: u64,
}

impl UniqueIdGenerator {
    /// Create a generator for the given instance. Only the low 15 bits of the
    /// instance id are used.
    pub fn new(instance_id: u32) -> Self {
        Self {
            instance_id: instance_id as u64 & INSTANCE_MASK,
        }
    }

    /// The (masked) instance id embedded in every identifier.
    pub fn instance_id(&self) -> u32 {
        self.instance_id as u32
    }

    /// Produce the next identifier.
    pub fn generate(&self) -> u64 {
        let counter = next_counter() & COUNTER_MASK;
        let scattered = counter.reverse_bits() >> (u64::BITS - COUNTER_BITS);
        (scattered << INSTANCE_BITS) | self.instance_id
    }
}

fn next_counter() -> u64 {
    let now = unix_micros() / 10;
    let mut previous = LAST_COUNTER.load(Ordering::Relaxed);
    loop {
        let next = now.max(previous + 1);
        match LAST_COUNTER.compare_exchange_weak(
            previous,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(actual) => previous = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn it_never_repeats_an_identifier_within_a_process() {
        let generator = UniqueIdGenerator::new(7);
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            assert!(seen.insert(generator.generate()));
        }
    }

    #[test]
    fn it_embeds_the_instance_id() {
        let generator = UniqueIdGenerator::new(42);

        assert_eq!(generator.generate() & INSTANCE_MASK, 42);
        assert_eq!(generator.instance_id(), 42);
    }

    #[test]
    fn it_keeps_the_sign_bit_clear() {
        let generator = UniqueIdGenerator::new(u32::MAX);

        for _ in 0..1_000 {
            assert_eq!(generator.generate() >> 63, 0);
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn it_stays_unique_across_threads() {
        let generator = UniqueIdGenerator::new(3);
        let mut tasks = Vec::new();

        for _ in 0..4 {
            tasks.push(tokio::spawn(async move {
                (0..2_500).map(|_| generator.generate()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(seen.insert(id));
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn distinct_instances_mint_distinct_identifiers(a in 0u32..(1 << 15), b in 0u32..(1 << 15)) {
            proptest::prop_assume!(a != b);
            let first = UniqueIdGenerator::new(a).generate();
            let second = UniqueIdGenerator::new(b).generate();
            proptest::prop_assert_ne!(first, second);
        }
    }
}
