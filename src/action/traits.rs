use crate::path_state::bead::BeadLocator;
use crate::path_state::traits::WormPath;

/// The kinetic and potential contributions of a bead range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionPair {
    pub kinetic: f64,
    pub potential: f64,
}

impl ActionPair {
    pub fn total(&self) -> f64 {
        self.kinetic + self.potential
    }
}

/// One-body external potential.
pub trait OneBodyPotential {
    fn one_body_potential(&self, position: &[f64]) -> f64;
}

/// The action oracle consumed by the move engine.
///
/// Implementations must be pure: the returned values depend only on the
/// current bead positions, with no side effects on the worldline store.
/// The move engine evaluates differences of these values before and after
/// a proposed mutation; it never persists them beyond an attempt.
pub trait ActionOracle<W: WormPath> {
    /// Potential action carried by a single bead.
    fn bead_potential(&self, path: &W, bead: BeadLocator) -> f64;

    /// Kinetic action carried by the link between two adjacent beads.
    fn link_kinetic(&self, path: &W, from: BeadLocator, to: BeadLocator) -> f64;

    /// Action of the range starting at `start` and following `slices`
    /// forward links: kinetic over the walked links, potential over every
    /// visited bead including both endpoints. `None` if the walk reaches a
    /// worm end first.
    fn segment_action(&self, path: &W, start: BeadLocator, slices: usize) -> Option<ActionPair> {
        let mut pair = ActionPair {
            kinetic: 0.0,
            potential: self.bead_potential(path, start),
        };
        let mut bead = start;
        for _ in 0..slices {
            let following = path.next(bead)?;
            pair.kinetic += self.link_kinetic(path, bead, following);
            pair.potential += self.bead_potential(path, following);
            bead = following;
        }
        Some(pair)
    }
}
