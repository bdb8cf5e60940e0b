//! Shuffled example scheduling.
//!
//! Each epoch walks the training set in a fresh random order, without
//! replacement, in fixed-size packages. `ShuffledSampler` owns the
//! permutation of example indices and reshuffles (Fisher–Yates) whenever the
//! permutation is exhausted, so a partial final package transparently wraps
//! into the next pass.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Serves training-example indices in shuffled order without replacement.
#[derive(Debug)]
pub struct ShuffledSampler {
    positions: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl ShuffledSampler {
    /// Build a sampler over `len` examples.
    ///
    /// The caller guarantees `len > 0` (trainers validate data emptiness up
    /// front).
    pub fn new(len: usize, mut rng: StdRng) -> Self {
        debug_assert!(len > 0, "sampler requires at least one example");
        let mut positions: Vec<usize> = (0..len).collect();
        positions.shuffle(&mut rng);
        Self { positions, cursor: 0, rng }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Reshuffle the permutation and restart from its beginning.
    pub fn refresh(&mut self) {
        self.positions.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    /// Next example index; reshuffles when the permutation is exhausted.
    pub fn next_index(&mut self) -> usize {
        if self.cursor >= self.positions.len() {
            self.refresh();
        }
        let index = self.positions[self.cursor];
        self.cursor += 1;
        index
    }
}

/// Packages per epoch: `ceil(examples / package_size)`.
#[inline]
pub fn packages_count(examples: usize, package_size: usize) -> usize {
    debug_assert!(package_size > 0);
    let mut count = examples / package_size;
    if examples % package_size != 0 {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn one_pass_visits_every_index_exactly_once() {
        let mut sampler = ShuffledSampler::new(17, StdRng::seed_from_u64(7));
        sampler.refresh();
        let mut seen = vec![0usize; 17];
        for _ in 0..17 {
            seen[sampler.next_index()] += 1;
        }
        assert!(seen.iter().all(|&c| c == 1), "not a permutation: {seen:?}");
    }

    #[test]
    fn exhaustion_reshuffles_and_keeps_serving() {
        let mut sampler = ShuffledSampler::new(5, StdRng::seed_from_u64(3));
        let mut counts = vec![0usize; 5];
        for _ in 0..15 {
            counts[sampler.next_index()] += 1;
        }
        // Three full passes: every index served exactly three times.
        assert!(counts.iter().all(|&c| c == 3), "{counts:?}");
    }

    #[test]
    fn seeded_sampler_is_deterministic() {
        let mut a = ShuffledSampler::new(11, StdRng::seed_from_u64(42));
        let mut b = ShuffledSampler::new(11, StdRng::seed_from_u64(42));
        for _ in 0..25 {
            assert_eq!(a.next_index(), b.next_index());
        }
    }

    #[test]
    fn packages_count_rounds_up() {
        assert_eq!(packages_count(10, 5), 2);
        assert_eq!(packages_count(11, 5), 3);
        assert_eq!(packages_count(4, 8), 1);
    }
}
