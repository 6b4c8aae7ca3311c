use serde::{Deserialize, Serialize};

/// The ensemble sector of a worldline configuration.
///
/// `Z` is the diagonal sector (all worldlines closed), `G` the off-diagonal
/// sector (exactly one open worm with a head and a tail).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sector {
    Z,
    G,
}

/// The sector precondition of a Monte Carlo move.
///
/// A move whose constraint does not allow the current sector reports
/// "not attempted" and leaves the configuration untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectorConstraint {
    /// Operates only on closed (diagonal) configurations.
    Z,
    /// Operates only on worm (off-diagonal) configurations.
    G,
    /// Operates on any configuration.
    Any,
}

impl SectorConstraint {
    pub fn allows(self, sector: Sector) -> bool {
        match self {
            SectorConstraint::Z => sector == Sector::Z,
            SectorConstraint::G => sector == Sector::G,
            SectorConstraint::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_allows() {
        assert!(SectorConstraint::Z.allows(Sector::Z));
        assert!(!SectorConstraint::Z.allows(Sector::G));
        assert!(SectorConstraint::G.allows(Sector::G));
        assert!(!SectorConstraint::G.allows(Sector::Z));
        assert!(SectorConstraint::Any.allows(Sector::Z));
        assert!(SectorConstraint::Any.allows(Sector::G));
    }
}
