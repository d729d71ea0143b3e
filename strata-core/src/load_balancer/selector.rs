//! Random selection with exclusion of already-tried backends.

use rand::Rng;

/// The registry indices not yet tried for one logical read.
///
/// Every pick removes the chosen index, so a backend can never be selected
/// twice for the same request and the set empties after exactly `len` picks.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    remaining: Vec<usize>,
}

impl CandidateSet {
    /// All indices `0..len` are candidates.
    pub fn new(len: usize) -> Self {
        Self {
            remaining: (0..len).collect(),
        }
    }

    /// How many candidates are left.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// True once every candidate has been picked.
    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Choose uniformly among the remaining indices and exclude the choice.
    pub fn pick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<usize> {
        if self.remaining.is_empty() {
            return None;
        }
        let slot = rng.gen_range(0..self.remaining.len());
        Some(self.remaining.swap_remove(slot))
    }
}
