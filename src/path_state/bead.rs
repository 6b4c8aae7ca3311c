use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses a single bead in the worldline store by its (time slice,
/// storage row) pair, without holding a reference into the store.
///
/// Locators are plain values: comparable, hashable and orderable, so moves
/// can detect reaching a worm end or wrapping around in imaginary time by
/// comparing them. The ordering is slice-major.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeadLocator {
    /// Imaginary-time slice index.
    pub slice: usize,
    /// Storage row index. Rows are storage slots, not physical particles:
    /// a worldline may span several rows through its links.
    pub particle: usize,
}

impl BeadLocator {
    pub fn new(slice: usize, particle: usize) -> Self {
        Self { slice, particle }
    }
}

impl fmt::Display for BeadLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(t{},p{})", self.slice, self.particle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_ordering_is_slice_major() {
        let a = BeadLocator::new(0, 5);
        let b = BeadLocator::new(1, 0);
        assert!(a < b);
        assert_eq!(a, BeadLocator::new(0, 5));
    }
}
