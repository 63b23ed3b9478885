//! Tower height selection.
//!
//! A uniformly random machine word has `n` leading zero bits with probability
//! `2^-(n + 1)`, so `1 + leading_zeros(word)` is a geometric height with a one
//! in two chance of each additional level.

use std::cell::RefCell;

use rand::rngs::{SmallRng, StdRng};
use rand::{RngCore, SeedableRng};

/// The tallest tower a 64-bit word can produce.
pub const MAX_HEIGHT: usize = u64::BITS as usize;

/// A source of uniformly distributed machine words.
pub trait RandomSource {
    /// Returns the next uniformly random word.
    fn next_word(&mut self) -> u64;
}

impl RandomSource for SmallRng {
    #[inline]
    fn next_word(&mut self) -> u64 {
        self.next_u64()
    }
}

impl RandomSource for StdRng {
    #[inline]
    fn next_word(&mut self) -> u64 {
        self.next_u64()
    }
}

impl<R: RandomSource + ?Sized> RandomSource for Box<R> {
    #[inline]
    fn next_word(&mut self) -> u64 {
        (**self).next_word()
    }
}

/// Converts a random word into a tower height in `1..=cap`.
#[inline]
pub fn tower_height(word: u64, cap: usize) -> usize {
    let height = 1 + word.leading_zeros() as usize;
    height.min(cap.clamp(1, MAX_HEIGHT))
}

thread_local! {
    // One generator per thread; dropped with the thread.
    static THREAD_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
}

/// Draws a tower height from the calling thread's generator.
pub(crate) fn thread_tower_height(cap: usize) -> usize {
    THREAD_RNG.with(|rng| tower_height(rng.borrow_mut().next_word(), cap))
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::thread::spawn;

    use super::*;

    #[test]
    fn test_tower_height_from_leading_zeros() {
        assert_eq!(tower_height(u64::MAX, MAX_HEIGHT), 1);
        assert_eq!(tower_height(1 << 63, MAX_HEIGHT), 1);
        assert_eq!(tower_height(1 << 62, MAX_HEIGHT), 2);
        assert_eq!(tower_height(1, MAX_HEIGHT), 64);
        assert_eq!(tower_height(0, MAX_HEIGHT), 64);
    }

    #[test]
    fn test_tower_height_respects_cap() {
        assert_eq!(tower_height(0, 12), 12);
        assert_eq!(tower_height(1 << 60, 2), 2);
        assert_eq!(tower_height(0, 0), 1);
        assert_eq!(tower_height(0, 1_000), MAX_HEIGHT);
    }

    #[test]
    fn test_height_distribution_is_geometric() {
        // Roughly half of all towers should have height one, a quarter
        // height two, and so on.
        let mut rng = SmallRng::seed_from_u64(1337);
        let draws = 100_000;
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            let height = tower_height(rng.next_word(), MAX_HEIGHT);
            if height <= counts.len() {
                counts[height - 1] += 1;
            }
        }
        let mut expected = draws / 2;
        for (i, count) in counts.iter().enumerate() {
            let diff = count.abs_diff(expected);
            assert!(
                diff < expected / 10,
                "height: {}, count: {}, expected: {}",
                i + 1,
                count,
                expected
            );
            expected /= 2;
        }
    }

    #[test]
    fn test_thread_generators_are_independent() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                spawn(|| {
                    THREAD_RNG.with(|rng| {
                        let mut rng = rng.borrow_mut();
                        (0..4).map(|_| rng.next_word()).collect::<Vec<u64>>()
                    })
                })
            })
            .collect();
        let streams: HashSet<Vec<u64>> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(streams.len(), 4);
        assert!(thread_tower_height(MAX_HEIGHT) >= 1);
    }
}
