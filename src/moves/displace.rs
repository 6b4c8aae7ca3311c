use super::move_base::{metropolis, random_active_bead, Move, MoveStats};
use crate::action::traits::ActionOracle;
use crate::path_state::bead::BeadLocator;
use crate::path_state::sector::SectorConstraint;
use crate::path_state::snapshot::PathSnapshot;
use crate::path_state::traits::{
    WorldLineDimensions, WorldLineLinkAccess, WorldLinePositionAccess, WorldLineWormAccess,
    WormPath,
};
use crate::system::traits::SystemAccess;
use log::debug;
use ndarray::Array1;
use rand::Rng;

/// Every bead of the worldline fragment `start` belongs to, in forward walk
/// order. For a closed loop this is the full permutation cycle; for a worm
/// it is the tail-to-head chain, gathered by walking both directions.
fn worldline_beads<W: WormPath>(path: &W, start: BeadLocator) -> Vec<BeadLocator> {
    let bound = path.particles() * path.time_slices();
    let mut beads = vec![start];
    let mut bead = start;
    while let Some(next) = path.next(bead) {
        if next == start {
            return beads;
        }
        beads.push(next);
        bead = next;
        assert!(beads.len() <= bound, "worldline walk did not terminate");
    }
    bead = start;
    while let Some(prev) = path.prev(bead) {
        beads.push(prev);
        bead = prev;
        assert!(beads.len() <= bound, "worldline walk did not terminate");
    }
    beads
}

/// Rigid displacement of a single bead.
///
/// Picks an active bead uniformly, shifts it by a uniform vector in the cube
/// `[-max_displacement, max_displacement]^D` and accepts on the change of
/// the bead's local action: its potential plus the kinetic terms of the
/// links it carries. Works in both sectors; worm ends simply have one link
/// fewer.
pub struct DisplaceMove {
    pub max_displacement: f64,
    stats: MoveStats,
}

impl DisplaceMove {
    pub fn new(max_displacement: f64) -> Self {
        Self {
            max_displacement,
            stats: MoveStats::new(),
        }
    }
}

impl<S, A, R> Move<S, A, R> for DisplaceMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "displace"
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

        let bead = match random_active_bead(path, rng) {
            Some(bead) => bead,
            None => return false,
        };

        let local_action = |path: &S::WorldLine| {
            let mut total = action.bead_potential(path, bead);
            if let Some(prev) = path.prev(bead) {
                total += action.link_kinetic(path, prev, bead);
            }
            if let Some(next) = path.next(bead) {
                total += action.link_kinetic(path, bead, next);
            }
            total
        };
        let old_action = local_action(path);

        let new_position: Array1<f64> = path
            .position(bead)
            .iter()
            .map(|&x| x + rng.gen_range(-self.max_displacement..=self.max_displacement))
            .collect();

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, bead);
        system
            .path_mut()
            .assign_position(bead, new_position.view());

        let new_action = local_action(system.path());
        let ratio = (old_action - new_action).exp();
        debug!("displace {bead}: ratio {ratio:.6e}");
        if metropolis(rng, ratio) {
            self.stats.accept();
            true
        } else {
            snapshot.restore(system.path_mut());
            false
        }
    }

    fn stats(&self) -> &MoveStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut MoveStats {
        &mut self.stats
    }
}

/// Rigid translation of a whole worldline fragment.
///
/// Picks an active bead, gathers the closed cycle or worm chain it belongs
/// to and shifts every bead by one common uniform vector. Link vectors are
/// unchanged by a rigid shift, so the ratio is purely potential.
pub struct CenterOfMassMove {
    pub max_displacement: f64,
    stats: MoveStats,
}

impl CenterOfMassMove {
    pub fn new(max_displacement: f64) -> Self {
        Self {
            max_displacement,
            stats: MoveStats::new(),
        }
    }
}

impl<S, A, R> Move<S, A, R> for CenterOfMassMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "center_of_mass"
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

        let start = match random_active_bead(path, rng) {
            Some(bead) => bead,
            None => return false,
        };
        let beads = worldline_beads(path, start);

        let old_potential: f64 = beads
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();

        let shift: Array1<f64> = (0..path.spatial_dimensions())
            .map(|_| rng.gen_range(-self.max_displacement..=self.max_displacement))
            .collect();

        let mut snapshot = PathSnapshot::capture(path);
        for &bead in &beads {
            snapshot.record(path, bead);
        }
        let path = system.path_mut();
        for &bead in &beads {
            let shifted = &path.position(bead) + &shift;
            path.assign_position(bead, shifted.view());
        }

        let path = system.path();
        let new_potential: f64 = beads
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();
        let ratio = (old_potential - new_potential).exp();
        debug!(
            "center_of_mass from {start}: {} beads, ratio {ratio:.6e}",
            beads.len()
        );
        if metropolis(rng, ratio) {
            self.stats.accept();
            true
        } else {
            snapshot.restore(system.path_mut());
            false
        }
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
    use crate::path_state::traits::*;
    use crate::path_state::worldlines::WorldLines;
    use crate::space::free_space::FreeSpace;
    use crate::system::uniform_system::UniformSystem;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn harmonic_system(
        particles: usize,
        slices: usize,
    ) -> (
        UniformSystem<FreeSpace, WorldLines>,
        PrimitiveAction<FreeSpace, HarmonicPotential>,
    ) {
        let system = UniformSystem {
            space: FreeSpace::new(2),
            path: WorldLines::new(particles, slices, 2),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        let action = PrimitiveAction::new(
            FreeSpace::new(2),
            HarmonicPotential { spring_constant: 1.0 },
            0.1,
            0.2,
        );
        (system, action)
    }

    #[test]
    fn test_displace_rejection_restores_state() {
        let (mut system, action) = harmonic_system(2, 4);
        let mut rng = StdRng::seed_from_u64(100);
        let mut displace = DisplaceMove::new(0.5);
        let mut rejected = 0;
        let mut accepted = 0;
        for _ in 0..200 {
            let before = system.path.clone();
            if Move::<_, _, StdRng>::attempt_move(&mut displace, &mut system, &action, &mut rng) {
                accepted += 1;
            } else {
                rejected += 1;
                assert_eq!(system.path, before);
            }
            assert!(system.path.is_consistent());
        }
        // Large displacements against a trap produce both outcomes.
        assert!(accepted > 0);
        assert!(rejected > 0);
        assert_eq!(displace.stats.num_attempted(), 200);
        assert_eq!(displace.stats.num_accepted(), accepted);
    }

    #[test]
    fn test_center_of_mass_free_particles_always_accepts() {
        let mut system = UniformSystem {
            space: FreeSpace::new(2),
            path: WorldLines::new(2, 4, 2),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        let action = PrimitiveAction::new(FreeSpace::new(2), ZeroPotential, 0.1, 0.2);
        let mut rng = StdRng::seed_from_u64(4);
        let mut com = CenterOfMassMove::new(0.7);
        for _ in 0..50 {
            assert!(Move::<_, _, StdRng>::attempt_move(
                &mut com,
                &mut system,
                &action,
                &mut rng
            ));
        }
        assert_eq!(com.stats.acceptance_ratio(), 1.0);
    }

    #[test]
    fn test_worldline_beads_closed_loop() {
        let path = WorldLines::new(3, 5, 1);
        let beads = worldline_beads(&path, BeadLocator::new(2, 1));
        assert_eq!(beads.len(), 5);
        assert!(beads.iter().all(|b| b.particle == 1));
    }

    #[test]
    fn test_worldline_beads_worm_chain() {
        let mut path = WorldLines::new(1, 6, 1);
        let head = BeadLocator::new(3, 0);
        let tail = BeadLocator::new(4, 0);
        path.set_next(head, None);
        path.set_prev(tail, None);
        path.set_worm(Some(head), Some(tail));
        // Start mid-chain: the walk must still gather all 6 beads.
        let beads = worldline_beads(&path, BeadLocator::new(1, 0));
        assert_eq!(beads.len(), 6);
    }
}
