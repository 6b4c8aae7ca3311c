use super::move_base::{metropolis, random_active_bead, Move, MoveStats};
use super::sampling::bisection_position;
use crate::action::traits::ActionOracle;
use crate::path_state::sector::SectorConstraint;
use crate::path_state::snapshot::PathSnapshot;
use crate::path_state::traits::{
    WorldLineDimensions, WorldLineLinkAccess, WorldLinePositionAccess, WorldLineWormAccess,
};
use crate::system::traits::SystemAccess;
use log::debug;
use rand::Rng;

/// Multilevel bisection resampling of a worldline segment.
///
/// The segment spans `2^num_levels` links with fixed endpoints. Levels are
/// processed coarsest first: level `l` places the midpoints between beads
/// `2^l` slices apart, sampled as Gaussians around the midpoint of their
/// current neighbours, and the level is accepted or rejected on the
/// potential change of just those beads. An early rejection rolls the whole
/// attempt back before the expensive fine levels run. The product of the
/// per-level tests reproduces the acceptance of sampling the full bridge
/// in one shot.
pub struct BisectionMove {
    pub num_levels: usize,
    stats: MoveStats,
}

impl BisectionMove {
    /// # Panics
    /// Panics if `num_levels` is zero.
    pub fn new(num_levels: usize) -> Self {
        assert!(num_levels >= 1, "bisection needs at least one level");
        Self {
            num_levels,
            stats: MoveStats::new(),
        }
    }

    pub fn segment_links(&self) -> usize {
        1 << self.num_levels
    }
}

impl<S, A, R> Move<S, A, R> for BisectionMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "bisection"
    }

    fn sector_constraint(&self) -> SectorConstraint {
        SectorConstraint::Any
    }

    fn attempt_move(&mut self, system: &mut S, action: &A, rng: &mut R) -> bool {
        let path = system.path();
        if !<Self as Move<S, A, R>>::sector_constraint(self).allows(path.sector()) {
            return false;
        }
        self.stats.attempt();

        let links = self.segment_links();
        if links >= path.time_slices() {
            return false;
        }
        let start = match random_active_bead(path, rng) {
            Some(bead) => bead,
            None => return false,
        };
        // The full chain of links + 1 beads; a worm end inside it means the
        // segment cannot be bridged.
        let mut chain = Vec::with_capacity(links + 1);
        chain.push(start);
        let mut bead = start;
        for _ in 0..links {
            bead = match path.next(bead) {
                Some(next) => next,
                None => return false,
            };
            chain.push(bead);
        }

        let two_lambda_tau = system.two_lambda_tau(start.particle);
        let mut snapshot = PathSnapshot::capture(path);
        for &bead in &chain[1..links] {
            snapshot.record(path, bead);
        }

        for level in (1..=self.num_levels).rev() {
            self.stats.attempt_level(level);
            let stride = 1usize << (level - 1);
            // Midpoints between the beads already fixed at this resolution.
            let mut level_delta = 0.0;
            let mut index = stride;
            while index < links {
                let bead = chain[index];
                let old_potential = action.bead_potential(system.path(), bead);
                let new_position = {
                    let path = system.path();
                    bisection_position(
                        path.position(chain[index - stride]),
                        path.position(chain[index + stride]),
                        // Variance of the bridge midpoint over 2^level links.
                        0.5 * two_lambda_tau * stride as f64,
                        rng,
                    )
                };
                system.path_mut().assign_position(bead, new_position.view());
                level_delta += action.bead_potential(system.path(), bead) - old_potential;
                index += 2 * stride;
            }
            if !metropolis(rng, (-level_delta).exp()) {
                debug!("bisection from {start}: rejected at level {level}");
                snapshot.restore(system.path_mut());
                return false;
            }
            self.stats.accept_level(level);
        }
        debug!("bisection from {start}: accepted {links} links");
        self.stats.accept();
        true
    }

    fn stats(&self) -> &MoveStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut MoveStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::primitive::{HarmonicPotential, PrimitiveAction, ZeroPotential};
    use crate::path_state::bead::BeadLocator;
    use crate::path_state::traits::*;
    use crate::path_state::worldlines::WorldLines;
    use crate::space::free_space::FreeSpace;
    use crate::system::uniform_system::UniformSystem;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bisection_free_particles_always_accepts() {
        let mut system = UniformSystem {
            space: FreeSpace::new(2),
            path: WorldLines::new(2, 8, 2),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        let action = PrimitiveAction::new(FreeSpace::new(2), ZeroPotential, 0.1, 0.2);
        let mut rng = StdRng::seed_from_u64(19);
        let mut bisection = BisectionMove::new(2);
        for _ in 0..100 {
            assert!(bisection.attempt_move(&mut system, &action, &mut rng));
            assert!(system.path.is_consistent());
        }
        assert_eq!(bisection.stats.num_accepted_level(1), 100);
        assert_eq!(bisection.stats.num_accepted_level(2), 100);
    }

    #[test]
    fn test_bisection_three_levels_on_two_particles() {
        // Two rows of sixteen slices with a three-level (eight-link)
        // segment: the chain fits the loop without revisiting any bead.
        let mut system = UniformSystem {
            space: FreeSpace::new(1),
            path: WorldLines::new(2, 16, 1),
            tau: 0.05,
            two_lambda_tau: 0.1,
        };
        let action = PrimitiveAction::new(
            FreeSpace::new(1),
            HarmonicPotential { spring_constant: 1.0 },
            0.05,
            0.1,
        );
        let mut rng = StdRng::seed_from_u64(23);
        let mut bisection = BisectionMove::new(3);
        let mut accepted = 0;
        for _ in 0..200 {
            let before = system.path.clone();
            if bisection.attempt_move(&mut system, &action, &mut rng) {
                accepted += 1;
            } else {
                assert_eq!(system.path, before);
            }
            assert!(system.path.is_consistent());
        }
        assert!(accepted > 0);
        // Coarser levels are attempted at least as often as finer ones.
        let stats = &bisection.stats;
        assert!(stats.num_attempted_level(3) >= stats.num_attempted_level(2));
        assert!(stats.num_attempted_level(2) >= stats.num_attempted_level(1));
    }

    #[test]
    fn test_bisection_rejects_segment_spanning_loop() {
        let mut system = UniformSystem {
            space: FreeSpace::new(1),
            path: WorldLines::new(1, 4, 1),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        let action = PrimitiveAction::new(FreeSpace::new(1), ZeroPotential, 0.1, 0.2);
        let mut rng = StdRng::seed_from_u64(5);
        let mut bisection = BisectionMove::new(2);
        assert!(!bisection.attempt_move(&mut system, &action, &mut rng));
        assert_eq!(bisection.stats.num_attempted(), 1);
        assert_eq!(bisection.stats.num_attempted_level(2), 0);
    }

    #[test]
    fn test_bisection_endpoints_never_move() {
        let mut system = UniformSystem {
            space: FreeSpace::new(1),
            path: WorldLines::new(1, 16, 1),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        for t in 0..16 {
            system.path.set_position(BeadLocator::new(t, 0), &[t as f64]);
        }
        let action = PrimitiveAction::new(FreeSpace::new(1), ZeroPotential, 0.1, 0.2);
        let mut rng = StdRng::seed_from_u64(41);
        let mut bisection = BisectionMove::new(2);
        let before = system.path.clone();
        bisection.attempt_move(&mut system, &action, &mut rng);
        // At most the three interior beads of one four-link segment moved.
        let mut changed = Vec::new();
        for t in 0..16 {
            let bead = BeadLocator::new(t, 0);
            if system.path.position(bead) != before.position(bead) {
                changed.push(t);
            }
        }
        assert!(changed.len() <= 3);
    }
}
