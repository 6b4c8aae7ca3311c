use super::traits::{ActionOracle, OneBodyPotential};
use crate::path_state::bead::BeadLocator;
use crate::path_state::traits::WormPath;
use crate::space::traits::Space;

/// A potential that is identically zero: free particles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroPotential;

impl OneBodyPotential for ZeroPotential {
    fn one_body_potential(&self, _position: &[f64]) -> f64 {
        0.0
    }
}

/// Isotropic harmonic trap centred at the origin.
#[derive(Debug, Clone, Copy)]
pub struct HarmonicPotential {
    pub spring_constant: f64,
}

impl OneBodyPotential for HarmonicPotential {
    fn one_body_potential(&self, position: &[f64]) -> f64 {
        0.5 * self.spring_constant * position.iter().map(|&x| x * x).sum::<f64>()
    }
}

/// The primitive approximation of the action.
///
/// Potential action of a bead is `tau * V(r)`; kinetic action of a link is
/// the spring term `|Δr|² / (2 · two_lambda_tau)` with the nearest-image
/// displacement. The constant normalization of the free propagator is
/// dropped: it cancels in every ratio where the link count is unchanged and
/// is otherwise absorbed into the worm constant of the ensemble moves.
#[derive(Debug, Clone)]
pub struct PrimitiveAction<SP, V> {
    space: SP,
    potential: V,
    tau: f64,
    two_lambda_tau: f64,
}

impl<SP: Space, V: OneBodyPotential> PrimitiveAction<SP, V> {
    /// # Panics
    /// Panics if `tau` or `two_lambda_tau` is not positive.
    pub fn new(space: SP, potential: V, tau: f64, two_lambda_tau: f64) -> Self {
        assert!(tau > 0.0, "tau must be positive");
        assert!(two_lambda_tau > 0.0, "two_lambda_tau must be positive");
        Self {
            space,
            potential,
            tau,
            two_lambda_tau,
        }
    }
}

impl<W, SP, V> ActionOracle<W> for PrimitiveAction<SP, V>
where
    W: WormPath,
    SP: Space,
    V: OneBodyPotential,
{
    fn bead_potential(&self, path: &W, bead: BeadLocator) -> f64 {
        let position = path.position(bead);
        let position = position
            .as_slice()
            .expect("bead position views are contiguous");
        self.tau * self.potential.one_body_potential(position)
    }

    fn link_kinetic(&self, path: &W, from: BeadLocator, to: BeadLocator) -> f64 {
        let diff = self.space.difference(path.position(to), path.position(from));
        diff.iter().map(|&d| d * d).sum::<f64>() / (2.0 * self.two_lambda_tau)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_state::traits::WorldLinePositionAccess;
    use crate::path_state::worldlines::WorldLines;
    use crate::space::free_space::FreeSpace;

    #[test]
    fn test_harmonic_bead_potential() {
        let mut path = WorldLines::new(1, 4, 2);
        path.set_position(BeadLocator::new(0, 0), &[3.0, 4.0]);
        let action = PrimitiveAction::new(
            FreeSpace::new(2),
            HarmonicPotential { spring_constant: 2.0 },
            0.1,
            1.0,
        );
        // tau * 0.5 * k * r^2 = 0.1 * 0.5 * 2.0 * 25.0
        let u = action.bead_potential(&path, BeadLocator::new(0, 0));
        assert!((u - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_link_kinetic_spring() {
        let mut path = WorldLines::new(1, 4, 2);
        path.set_position(BeadLocator::new(1, 0), &[1.0, -1.0]);
        let action = PrimitiveAction::new(FreeSpace::new(2), ZeroPotential, 0.1, 0.5);
        let k = action.link_kinetic(&path, BeadLocator::new(0, 0), BeadLocator::new(1, 0));
        // |dr|^2 / (2 * 0.5) = 2.0
        assert!((k - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_segment_action_walks_links() {
        let mut path = WorldLines::new(1, 4, 1);
        for t in 0..4 {
            path.set_position(BeadLocator::new(t, 0), &[t as f64]);
        }
        let action = PrimitiveAction::new(
            FreeSpace::new(1),
            HarmonicPotential { spring_constant: 2.0 },
            1.0,
            1.0,
        );
        let pair = action
            .segment_action(&path, BeadLocator::new(0, 0), 2)
            .unwrap();
        // Two unit-length links: kinetic 2 * (1 / 2) = 1.
        assert!((pair.kinetic - 1.0).abs() < 1e-12);
        // Potential over beads at x = 0, 1, 2: 0 + 1 + 4 = 5.
        assert!((pair.potential - 5.0).abs() < 1e-12);
    }
}
