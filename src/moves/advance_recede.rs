use super::move_base::{metropolis, Move, MoveStats};
use super::sampling::free_particle_position;
use crate::action::traits::ActionOracle;
use crate::path_state::bead::BeadLocator;
use crate::path_state::sector::SectorConstraint;
use crate::path_state::snapshot::PathSnapshot;
use crate::path_state::traits::{
    WorldLineDimensions, WorldLineLinkAccess, WorldLinePositionAccess, WorldLineStatusAccess,
    WorldLineWormAccess, WormPath,
};
use crate::system::traits::SystemAccess;
use log::debug;
use rand::Rng;

/// Grows the worm head forward by free-particle steps.
///
/// Draws `1..=2^num_levels` links and appends that many beads past the
/// head, each a Gaussian step from its predecessor. The sampled kinetic
/// factors cancel; the ratio is the new potential against the
/// grand-canonical credit for the created beads.
pub struct AdvanceHeadMove {
    pub num_levels: usize,
    pub chemical_potential: f64,
    stats: MoveStats,
}

impl AdvanceHeadMove {
    pub fn new(num_levels: usize, chemical_potential: f64) -> Self {
        Self {
            num_levels,
            chemical_potential,
            stats: MoveStats::new(),
        }
    }
}

/// Shrinks the worm head by deactivating its last beads.
///
/// The exact inverse of [`AdvanceHeadMove`]; rejected outright when the
/// worm would be consumed past its tail.
pub struct RecedeHeadMove {
    pub num_levels: usize,
    pub chemical_potential: f64,
    stats: MoveStats,
}

impl RecedeHeadMove {
    pub fn new(num_levels: usize, chemical_potential: f64) -> Self {
        Self {
            num_levels,
            chemical_potential,
            stats: MoveStats::new(),
        }
    }
}

/// Shrinks the worm from the tail side, advancing the tail forward.
pub struct AdvanceTailMove {
    pub num_levels: usize,
    pub chemical_potential: f64,
    stats: MoveStats,
}

impl AdvanceTailMove {
    pub fn new(num_levels: usize, chemical_potential: f64) -> Self {
        Self {
            num_levels,
            chemical_potential,
            stats: MoveStats::new(),
        }
    }
}

/// Grows the worm from the tail side, receding the tail backward with
/// free-particle steps. The exact inverse of [`AdvanceTailMove`].
pub struct RecedeTailMove {
    pub num_levels: usize,
    pub chemical_potential: f64,
    stats: MoveStats,
}

impl RecedeTailMove {
    pub fn new(num_levels: usize, chemical_potential: f64) -> Self {
        Self {
            num_levels,
            chemical_potential,
            stats: MoveStats::new(),
        }
    }
}

fn draw_links<R: Rng>(num_levels: usize, rng: &mut R) -> usize {
    rng.gen_range(1..=(1usize << num_levels))
}

/// Appends `links` free-step beads at a worm end. `forward` grows past the
/// head; otherwise the growth runs backward from the tail. Returns the new
/// end bead and the potential gathered by the new beads.
fn grow_end<S, A, R>(
    system: &mut S,
    action: &A,
    snapshot: &mut PathSnapshot,
    end: BeadLocator,
    links: usize,
    forward: bool,
    rng: &mut R,
) -> (BeadLocator, f64)
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    let slices = system.path().time_slices();
    let two_lambda_tau = system.two_lambda_tau(end.particle);
    let mut prev = end;
    let mut prev_pos = system.path().position(end).to_owned();
    let mut new_potential = 0.0;
    // The old end bead gets relinked below; save it before the first link.
    snapshot.record(system.path(), end);
    for j in 1..=links {
        let slice = if forward {
            (end.slice + j) % slices
        } else {
            (end.slice + slices - j % slices) % slices
        };
        let slot = system.path_mut().ensure_slot(slice);
        snapshot.record(system.path(), slot);
        let pos = free_particle_position(prev_pos.view(), two_lambda_tau, rng);
        let path = system.path_mut();
        path.assign_position(slot, pos.view());
        path.set_active(slot, true);
        if forward {
            path.link(prev, slot);
        } else {
            path.link(slot, prev);
        }
        new_potential += action.bead_potential(system.path(), slot);
        prev = slot;
        prev_pos = pos;
    }
    (prev, new_potential)
}

/// Deactivates `count` beads walking from `end` toward the worm interior.
/// Returns the bead exposed as the new end and the removed potential.
fn shrink_end<S, A>(
    system: &mut S,
    action: &A,
    snapshot: &mut PathSnapshot,
    end: BeadLocator,
    count: usize,
    forward: bool,
) -> (BeadLocator, f64)
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
{
    let path = system.path();
    let mut removed = Vec::with_capacity(count);
    let mut old_potential = 0.0;
    let mut bead = end;
    for _ in 0..count {
        removed.push(bead);
        old_potential += action.bead_potential(path, bead);
        bead = if forward {
            path.next(bead).expect("shrink walk stays on the worm")
        } else {
            path.prev(bead).expect("shrink walk stays on the worm")
        };
    }
    let new_end = bead;
    snapshot.record(path, new_end);
    for &b in &removed {
        snapshot.record(path, b);
    }
    let path = system.path_mut();
    for &b in &removed {
        path.set_active(b, false);
        path.set_next(b, None);
        path.set_prev(b, None);
    }
    if forward {
        path.set_prev(new_end, None);
    } else {
        path.set_next(new_end, None);
    }
    (new_end, old_potential)
}

impl<S, A, R> Move<S, A, R> for AdvanceHeadMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "advance_head"
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

        let (head, tail) = match (path.worm_head(), path.worm_tail()) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return false,
        };
        let links = draw_links(self.num_levels, rng);
        let mut snapshot = PathSnapshot::capture(path);
        let (new_head, new_potential) =
            grow_end(system, action, &mut snapshot, head, links, true, rng);
        system.path_mut().set_worm(Some(new_head), Some(tail));

        let ratio =
            (-new_potential + self.chemical_potential * system.tau() * links as f64).exp();
        debug!("advance_head {links} links: ratio {ratio:.6e}");
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

impl<S, A, R> Move<S, A, R> for RecedeHeadMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "recede_head"
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

        let (head, tail) = match (path.worm_head(), path.worm_tail()) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return false,
        };
        let links = draw_links(self.num_levels, rng);
        let worm_beads = path.worm_bead_count().expect("off-diagonal sector has a worm");
        if links >= worm_beads {
            return false;
        }
        let mut snapshot = PathSnapshot::capture(path);
        let (new_head, old_potential) =
            shrink_end(system, action, &mut snapshot, head, links, false);
        system.path_mut().set_worm(Some(new_head), Some(tail));

        let ratio =
            (old_potential - self.chemical_potential * system.tau() * links as f64).exp();
        debug!("recede_head {links} links: ratio {ratio:.6e}");
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

impl<S, A, R> Move<S, A, R> for AdvanceTailMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "advance_tail"
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

        let (head, tail) = match (path.worm_head(), path.worm_tail()) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return false,
        };
        let links = draw_links(self.num_levels, rng);
        let worm_beads = path.worm_bead_count().expect("off-diagonal sector has a worm");
        if links >= worm_beads {
            return false;
        }
        let mut snapshot = PathSnapshot::capture(path);
        let (new_tail, old_potential) =
            shrink_end(system, action, &mut snapshot, tail, links, true);
        system.path_mut().set_worm(Some(head), Some(new_tail));

        let ratio =
            (old_potential - self.chemical_potential * system.tau() * links as f64).exp();
        debug!("advance_tail {links} links: ratio {ratio:.6e}");
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

impl<S, A, R> Move<S, A, R> for RecedeTailMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "recede_tail"
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

        let (head, tail) = match (path.worm_head(), path.worm_tail()) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return false,
        };
        let links = draw_links(self.num_levels, rng);
        let mut snapshot = PathSnapshot::capture(path);
        let (new_tail, new_potential) =
            grow_end(system, action, &mut snapshot, tail, links, false, rng);
        system.path_mut().set_worm(Some(head), Some(new_tail));

        let ratio =
            (-new_potential + self.chemical_potential * system.tau() * links as f64).exp();
        debug!("recede_tail {links} links: ratio {ratio:.6e}");
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
