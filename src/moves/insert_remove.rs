use super::move_base::{metropolis, Move, MoveStats};
use super::sampling::free_particle_position;
use crate::action::traits::ActionOracle;
use crate::path_state::sector::SectorConstraint;
use crate::path_state::snapshot::PathSnapshot;
use crate::path_state::traits::{
    WorldLineDimensions, WorldLineLinkAccess, WorldLinePositionAccess, WorldLineStatusAccess,
    WorldLineWormAccess, WormPath,
};
use crate::space::traits::Space;
use crate::system::traits::SystemAccess;
use log::debug;
use rand::Rng;

/// Inserts a fresh worm into a closed configuration.
///
/// Draws a tail slice uniformly, a tail position uniformly over the cell
/// and a worm of `1..=2^num_levels` links grown by free-particle steps.
/// The grand-canonical weight of the created beads enters through the
/// chemical potential; the volume and slice multiplicities balance the
/// uniform draws. Spaces of infinite volume cannot host an insertion: the
/// uniform position draw fails and the attempt rejects.
pub struct InsertMove {
    pub num_levels: usize,
    pub worm_constant: f64,
    pub chemical_potential: f64,
    stats: MoveStats,
}

impl InsertMove {
    pub fn new(num_levels: usize, worm_constant: f64, chemical_potential: f64) -> Self {
        Self {
            num_levels,
            worm_constant,
            chemical_potential,
            stats: MoveStats::new(),
        }
    }

    pub fn max_links(&self) -> usize {
        1 << self.num_levels
    }
}

impl<S, A, R> Move<S, A, R> for InsertMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "insert"
    }

    fn sector_constraint(&self) -> SectorConstraint {
        SectorConstraint::Z
    }

    fn attempt_move(&mut self, system: &mut S, action: &A, rng: &mut R) -> bool {
        let path = system.path();
        if !<Self as Move<S, A, R>>::sector_constraint(self).allows(path.sector()) {
            return false;
        }
        self.stats.attempt();

        let tail_position = match system.space().sample_position(rng) {
            Some(position) => position,
            None => return false,
        };
        let slices = path.time_slices();
        let links = rng.gen_range(1..=self.max_links());
        let tail_slice = rng.gen_range(0..slices);

        let mut snapshot = PathSnapshot::capture(path);
        let tail = system.path_mut().ensure_slot(tail_slice);
        snapshot.record(system.path(), tail);
        let two_lambda_tau = system.two_lambda_tau(tail.particle);
        {
            let path = system.path_mut();
            path.assign_position(tail, tail_position.view());
            path.set_active(tail, true);
        }
        let mut new_potential = action.bead_potential(system.path(), tail);

        let mut prev = tail;
        let mut prev_pos = tail_position;
        for j in 1..=links {
            let slot = system.path_mut().ensure_slot((tail_slice + j) % slices);
            snapshot.record(system.path(), slot);
            let pos = free_particle_position(prev_pos.view(), two_lambda_tau, rng);
            let path = system.path_mut();
            path.assign_position(slot, pos.view());
            path.set_active(slot, true);
            path.link(prev, slot);
            new_potential += action.bead_potential(system.path(), slot);
            prev = slot;
            prev_pos = pos;
        }
        system.path_mut().set_worm(Some(prev), Some(tail));

        let beads = (links + 1) as f64;
        let ratio = self.worm_constant
            * system.space().volume()
            * (slices * self.max_links()) as f64
            * (-new_potential + self.chemical_potential * system.tau() * beads).exp();
        debug!("insert {links} links at slice {tail_slice}: ratio {ratio:.6e}");
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

/// Removes the worm outright, restoring a closed configuration.
///
/// Only worms of at most `2^num_levels` links are candidates, mirroring the
/// lengths [`InsertMove`] proposes. Every worm bead is deactivated and
/// unlinked; the exact inverse of an insertion.
pub struct RemoveMove {
    pub num_levels: usize,
    pub worm_constant: f64,
    pub chemical_potential: f64,
    stats: MoveStats,
}

impl RemoveMove {
    pub fn new(num_levels: usize, worm_constant: f64, chemical_potential: f64) -> Self {
        Self {
            num_levels,
            worm_constant,
            chemical_potential,
            stats: MoveStats::new(),
        }
    }

    pub fn max_links(&self) -> usize {
        1 << self.num_levels
    }
}

impl<S, A, R> Move<S, A, R> for RemoveMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "remove"
    }

    fn sector_constraint(&self) -> SectorConstraint {
        SectorConstraint::G
    }

    fn attempt_move(&mut self, system: &mut S, action: &A, rng: &mut R) -> bool {
        let path = system.path();
        if !<Self as Move<S, A, R>>::sector_constraint(self).allows(path.sector()) {
            return false;
        }
        self.stats.attempt();

        let beads = match path.worm_bead_count() {
            Some(count) => count,
            None => return false,
        };
        let links = beads - 1;
        if links == 0 || links > self.max_links() {
            return false;
        }
        let head = path.worm_head().expect("off-diagonal sector has a worm");
        let slices = path.time_slices();

        let mut old_potential = 0.0;
        let mut worm = Vec::with_capacity(beads);
        let mut bead = Some(head);
        while let Some(b) = bead {
            old_potential += action.bead_potential(path, b);
            worm.push(b);
            bead = path.prev(b);
        }

        let ratio = (old_potential - self.chemical_potential * system.tau() * beads as f64).exp()
            / (self.worm_constant
                * system.space().volume()
                * (slices * self.max_links()) as f64);
        debug!("remove {links} links: ratio {ratio:.6e}");

        let mut snapshot = PathSnapshot::capture(path);
        for &b in &worm {
            snapshot.record(path, b);
        }
        let path = system.path_mut();
        for &b in &worm {
            path.set_active(b, false);
            path.set_next(b, None);
            path.set_prev(b, None);
        }
        path.set_worm(None, None);

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
    use crate::action::primitive::{PrimitiveAction, ZeroPotential};
    use crate::path_state::bead::BeadLocator;
    use crate::path_state::sector::Sector;
    use crate::path_state::traits::*;
    use crate::path_state::worldlines::WorldLines;
    use crate::space::free_space::FreeSpace;
    use crate::space::periodic_box::PeriodicBox;
    use crate::system::uniform_system::UniformSystem;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    fn boxed_system(particles: usize, slices: usize) -> UniformSystem<PeriodicBox, WorldLines> {
        UniformSystem {
            space: PeriodicBox::new(vec![1.0, 1.0]),
            path: WorldLines::new(particles, slices, 2),
            tau: 0.1,
            two_lambda_tau: 0.02,
        }
    }

    fn boxed_action() -> PrimitiveAction<PeriodicBox, ZeroPotential> {
        PrimitiveAction::new(PeriodicBox::new(vec![1.0, 1.0]), ZeroPotential, 0.1, 0.02)
    }

    /// Counts how often the oracle is consulted.
    struct CountingAction {
        calls: Cell<usize>,
    }

    impl<W: WormPath> ActionOracle<W> for CountingAction {
        fn bead_potential(&self, _path: &W, _bead: crate::path_state::bead::BeadLocator) -> f64 {
            self.calls.set(self.calls.get() + 1);
            0.0
        }

        fn link_kinetic(
            &self,
            _path: &W,
            _from: crate::path_state::bead::BeadLocator,
            _to: crate::path_state::bead::BeadLocator,
        ) -> f64 {
            self.calls.set(self.calls.get() + 1);
            0.0
        }
    }

    #[test]
    fn test_insert_remove_roundtrip() {
        let mut system = boxed_system(1, 8);
        let action = boxed_action();
        let mut rng = StdRng::seed_from_u64(71);
        let mut insert = InsertMove::new(2, 1.0, 0.0);
        let mut remove = RemoveMove::new(2, 1.0, 0.0);
        let closed_active = system.path.active_beads();

        let mut inserted = false;
        for _ in 0..500 {
            if insert.attempt_move(&mut system, &action, &mut rng) {
                inserted = true;
                break;
            }
        }
        assert!(inserted, "insert never accepted");
        assert_eq!(system.path.sector(), Sector::G);
        assert!(system.path.is_consistent());
        assert!(system.path.active_beads() > closed_active);

        let mut removed = false;
        for _ in 0..500 {
            if remove.attempt_move(&mut system, &action, &mut rng) {
                removed = true;
                break;
            }
        }
        assert!(removed, "remove never accepted");
        assert_eq!(system.path.sector(), Sector::Z);
        assert_eq!(system.path.active_beads(), closed_active);
        assert!(system.path.is_consistent());
    }

    #[test]
    fn test_insert_rejected_in_worm_sector_without_action_calls() {
        let mut system = boxed_system(1, 8);
        // Open the single loop into a worm by hand.
        let head = BeadLocator::new(2, 0);
        let tail = BeadLocator::new(3, 0);
        system.path.set_next(head, None);
        system.path.set_prev(tail, None);
        system.path.set_worm(Some(head), Some(tail));

        let action = CountingAction { calls: Cell::new(0) };
        let mut rng = StdRng::seed_from_u64(5);
        let mut insert = InsertMove::new(2, 1.0, 0.0);
        assert!(!insert.attempt_move(&mut system, &action, &mut rng));
        // Precondition violation: no attempt counted, no action evaluated.
        assert_eq!(insert.stats.num_attempted(), 0);
        assert_eq!(action.calls.get(), 0);
    }

    #[test]
    fn test_insert_never_accepted_in_infinite_volume() {
        let mut system = UniformSystem {
            space: FreeSpace::new(2),
            path: WorldLines::new(1, 8, 2),
            tau: 0.1,
            two_lambda_tau: 0.02,
        };
        let action = PrimitiveAction::new(FreeSpace::new(2), ZeroPotential, 0.1, 0.02);
        let mut rng = StdRng::seed_from_u64(6);
        let mut insert = InsertMove::new(2, 1.0, 0.0);
        let before = system.path.clone();
        for _ in 0..50 {
            assert!(!insert.attempt_move(&mut system, &action, &mut rng));
        }
        assert_eq!(system.path, before);
        assert_eq!(insert.stats.num_attempted(), 50);
    }

    /// Rows with distinct diffusion constants.
    struct TwoMassSystem {
        space: PeriodicBox,
        path: WorldLines,
        two_lambda_tau: [f64; 2],
    }

    impl SystemAccess for TwoMassSystem {
        type Space = PeriodicBox;
        type WorldLine = WorldLines;

        fn space(&self) -> &PeriodicBox {
            &self.space
        }

        fn path(&self) -> &WorldLines {
            &self.path
        }

        fn path_mut(&mut self) -> &mut WorldLines {
            &mut self.path
        }

        fn tau(&self) -> f64 {
            0.1
        }

        fn two_lambda_tau(&self, particle: usize) -> f64 {
            self.two_lambda_tau[particle.min(1)]
        }
    }

    #[test]
    fn test_insert_grows_with_the_new_rows_constant() {
        // Row 0 is fully occupied, so the worm lands on a fresh row whose
        // diffusion constant is zero: every grown bead must sit exactly on
        // the sampled tail position.
        let mut system = TwoMassSystem {
            space: PeriodicBox::new(vec![1.0, 1.0]),
            path: WorldLines::new(1, 8, 2),
            two_lambda_tau: [0.2, 0.0],
        };
        let action = boxed_action();
        let mut rng = StdRng::seed_from_u64(12);
        let mut insert = InsertMove::new(2, 1.0, 0.0);
        assert!(insert.attempt_move(&mut system, &action, &mut rng));
        assert!(system.path.is_consistent());

        let tail = system.path.worm_tail().unwrap();
        assert_eq!(tail.particle, 1);
        let tail_pos = system.path.position(tail).to_owned();
        let mut bead = tail;
        while let Some(next) = system.path.next(bead) {
            bead = next;
            assert_eq!(system.path.position(bead), tail_pos);
        }
    }

    #[test]
    fn test_remove_rejects_long_worm() {
        let mut system = boxed_system(1, 16);
        let action = boxed_action();
        let mut rng = StdRng::seed_from_u64(7);
        // A worm of 6 links on the full loop remainder: too long for
        // num_levels = 2.
        let head = BeadLocator::new(9, 0);
        let tail = BeadLocator::new(3, 0);
        for t in (0..3).chain(10..16) {
            let bead = BeadLocator::new(t, 0);
            system.path.set_active(bead, false);
            system.path.set_next(bead, None);
            system.path.set_prev(bead, None);
        }
        system.path.set_prev(tail, None);
        system.path.set_next(head, None);
        system.path.set_worm(Some(head), Some(tail));
        assert!(system.path.is_consistent());

        let mut remove = RemoveMove::new(2, 1.0, 0.0);
        assert!(!remove.attempt_move(&mut system, &action, &mut rng));
        assert_eq!(remove.stats.num_attempted(), 1);
        assert_eq!(system.path.sector(), Sector::G);
    }
}
