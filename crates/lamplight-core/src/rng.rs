//! Deterministic per-turn randomness.
//!
//! Every random decision in a turn (`rand(p)` in expressions, `Random`
//! effect branches, event pool chance and member draws) consumes one
//! stream: a `ChaCha8Rng` seeded from `(game_id, run_id, turn_index)`.
//! Consumers draw sequentially in pipeline order, nested `Random` effects
//! in depth-first encounter order. Replaying a turn with the same key and
//! the same inputs therefore reproduces every draw exactly.
//!
//! The stream is never reseeded implicitly and never rewound; a new turn
//! gets a new stream keyed by its own index, so snapshots taken at turn
//! boundaries need only the turn counter to resume byte-for-byte.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// The deterministic draw stream for one turn.
#[derive(Debug, Clone)]
pub struct TurnRng {
    rng: ChaCha8Rng,
    draws: u64,
}

impl TurnRng {
    /// Derives the stream for a turn.
    ///
    /// # Example
    ///
    /// ```
    /// use lamplight_core::rng::TurnRng;
    ///
    /// let mut a = TurnRng::for_turn("demo", "run-1", 7);
    /// let mut b = TurnRng::for_turn("demo", "run-1", 7);
    /// assert_eq!(a.bernoulli(0.5), b.bernoulli(0.5));
    /// ```
    #[must_use]
    pub fn for_turn(game_id: &str, run_id: &str, turn: u32) -> Self {
        Self {
            rng: ChaCha8Rng::from_seed(derive_seed(game_id, run_id, turn)),
            draws: 0,
        }
    }

    /// Bernoulli draw: true with probability `p`.
    ///
    /// `p <= 0` is always false and `p >= 1` always true, but both still
    /// consume one draw so the stream position stays independent of the
    /// probability values content happens to use.
    pub fn bernoulli(&mut self, p: f64) -> bool {
        self.draws += 1;
        let sample: f64 = self.rng.gen();
        sample < p
    }

    /// Weighted index draw. Returns `None` when every weight is zero.
    pub fn weighted_index(&mut self, weights: &[u32]) -> Option<usize> {
        let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
        if total == 0 {
            return None;
        }
        self.draws += 1;
        let mut pick = self.rng.gen_range(0..total);
        for (i, &w) in weights.iter().enumerate() {
            let w = u64::from(w);
            if pick < w {
                return Some(i);
            }
            pick -= w;
        }
        // Unreachable: pick < total and the loop exhausts total.
        None
    }

    /// Number of draws consumed so far this turn.
    #[must_use]
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl wick::DrawSource for TurnRng {
    fn bernoulli(&mut self, p: f64) -> bool {
        TurnRng::bernoulli(self, p)
    }
}

/// Derives a 32-byte ChaCha seed from the turn key.
///
/// Uses FNV-1a rather than `DefaultHasher`: SipHash keys can change
/// between Rust releases, and replays must stay portable.
fn derive_seed(game_id: &str, run_id: &str, turn: u32) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for (i, chunk) in seed.chunks_mut(8).enumerate() {
        let mut h = fnv1a(0xcbf2_9ce4_8422_2325 ^ (i as u64).wrapping_mul(0x100_0000_01b3));
        h.write(game_id.as_bytes());
        h.write(&[0xff]);
        h.write(run_id.as_bytes());
        h.write(&[0xff]);
        h.write(&turn.to_le_bytes());
        chunk.copy_from_slice(&h.finish().to_le_bytes());
    }
    seed
}

struct Fnv1a(u64);

fn fnv1a(basis: u64) -> Fnv1a {
    Fnv1a(basis)
}

impl Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(0x100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_stream() {
        let mut a = TurnRng::for_turn("game", "run", 3);
        let mut b = TurnRng::for_turn("game", "run", 3);
        for _ in 0..64 {
            assert_eq!(a.bernoulli(0.5), b.bernoulli(0.5));
        }
        assert_eq!(a.draws(), 64);
    }

    #[test]
    fn different_turns_differ() {
        let draws_for = |turn: u32| {
            let mut rng = TurnRng::for_turn("game", "run", turn);
            (0..64).map(|_| rng.bernoulli(0.5)).collect::<Vec<_>>()
        };
        assert_ne!(draws_for(1), draws_for(2));
    }

    #[test]
    fn different_runs_differ() {
        let mut a = TurnRng::for_turn("game", "run-a", 1);
        let mut b = TurnRng::for_turn("game", "run-b", 1);
        let va: Vec<bool> = (0..64).map(|_| a.bernoulli(0.5)).collect();
        let vb: Vec<bool> = (0..64).map(|_| b.bernoulli(0.5)).collect();
        assert_ne!(va, vb);
    }

    #[test]
    fn extreme_probabilities_still_draw() {
        let mut rng = TurnRng::for_turn("game", "run", 1);
        assert!(!rng.bernoulli(0.0));
        assert!(rng.bernoulli(1.0));
        assert_eq!(rng.draws(), 2);
    }

    #[test]
    fn weighted_index_respects_zero_total() {
        let mut rng = TurnRng::for_turn("game", "run", 1);
        assert_eq!(rng.weighted_index(&[0, 0]), None);
        assert_eq!(rng.draws(), 0, "a zero-total draw must not consume the stream");
    }

    #[test]
    fn weighted_index_within_bounds() {
        let mut rng = TurnRng::for_turn("game", "run", 1);
        for _ in 0..100 {
            let i = rng.weighted_index(&[70, 30]).unwrap();
            assert!(i < 2);
        }
    }

    #[test]
    fn weighted_index_reproducible() {
        let picks = |_: ()| {
            let mut rng = TurnRng::for_turn("game", "run", 9);
            (0..32).map(|_| rng.weighted_index(&[70, 30]).unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(picks(()), picks(()));
    }
}
