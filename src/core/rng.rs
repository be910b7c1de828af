//! Random Number Generation
//!
//! Uses Xorshift128+ for fast, reproducible randomness. Every combat roll in
//! the process draws from one [`SharedRng`]; tests swap in a seeded or
//! scripted [`RollSource`].

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Source of inclusive integer rolls used by combat resolution.
pub trait RollSource: Send + Sync {
    /// Roll a uniformly distributed integer in `[min, max]`.
    fn roll(&self, min: i32, max: i32) -> i32;
}

/// PRNG using the Xorshift128+ algorithm.
///
/// Given the same seed, this RNG produces the exact same sequence on any
/// platform.
///
/// # Example
///
/// ```
/// use duel_lobby::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(12345);
/// let a = rng.next_u64();
/// let mut again = DeterministicRng::new(12345);
/// assert_eq!(a, again.next_u64());
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // State must never be all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Modulo bias is negligible for the tiny ranges combat uses
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a process seed from a fresh UUID and the wall clock.
pub fn derive_entropy_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let mut hasher = Sha256::new();
    hasher.update(b"DUEL_LOBBY_SEED_V1");
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(nanos.to_le_bytes());
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}

/// Process-wide, thread-safe generator shared by every session.
#[derive(Debug)]
pub struct SharedRng {
    inner: Mutex<DeterministicRng>,
}

impl SharedRng {
    /// Create a shared generator from an explicit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(DeterministicRng::new(seed)),
        }
    }

    /// Create a shared generator seeded from ambient entropy.
    pub fn from_entropy() -> Self {
        Self::new(derive_entropy_seed())
    }
}

impl RollSource for SharedRng {
    fn roll(&self, min: i32, max: i32) -> i32 {
        // A panic while holding the lock cannot leave the state torn
        let mut rng = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.next_int_range(min, max)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_int_range_inclusive() {
        let mut rng = DeterministicRng::new(5678);
        let mut seen = [false; 7];

        for _ in 0..2000 {
            let val = rng.next_int_range(2, 8);
            assert!((2..=8).contains(&val));
            seen[(val - 2) as usize] = true;
        }

        // Both bounds are reachable
        assert!(seen.iter().all(|s| *s));

        assert_eq!(rng.next_int_range(5, 5), 5);
    }

    #[test]
    fn test_shared_rng_matches_single_generator() {
        let shared = SharedRng::new(42);
        let mut local = DeterministicRng::new(42);

        for _ in 0..100 {
            assert_eq!(shared.roll(2, 4), local.next_int_range(2, 4));
        }
    }

    #[test]
    fn test_shared_rng_across_threads() {
        let shared = std::sync::Arc::new(SharedRng::new(7));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rng = shared.clone();
                std::thread::spawn(move || {
                    (0..250).map(|_| rng.roll(2, 8)).collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            for val in handle.join().unwrap() {
                assert!((2..=8).contains(&val));
            }
        }
    }

    #[test]
    fn test_entropy_seeds_differ() {
        assert_ne!(derive_entropy_seed(), derive_entropy_seed());
    }
}
