use super::move_base::{metropolis, random_active_bead, Move, MoveStats};
use super::sampling::{
    bridge_target, free_propagator, sample_winding_sector, staging_position, winding_cumulant,
};
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

/// Opens a worm by removing a segment from a closed configuration.
///
/// Picks a bead, a gap of `1..=2^num_levels` links, deactivates the beads
/// strictly inside the gap and cuts the links, leaving the picked bead as
/// the head and the bead past the gap as the tail. The acceptance ratio
/// carries the worm constant, the bead and gap choice multiplicities, the
/// removed potential and kinetic weight, the grand-canonical factor for the
/// removed beads, and the winding-summed propagator the reverse close would
/// use as its proposal normalization.
pub struct OpenMove {
    pub num_levels: usize,
    pub worm_constant: f64,
    pub chemical_potential: f64,
    pub max_wind: i32,
    stats: MoveStats,
}

impl OpenMove {
    pub fn new(num_levels: usize, worm_constant: f64, chemical_potential: f64, max_wind: i32) -> Self {
        Self {
            num_levels,
            worm_constant,
            chemical_potential,
            max_wind,
            stats: MoveStats::new(),
        }
    }

    pub fn max_gap(&self) -> usize {
        1 << self.num_levels
    }
}

impl<S, A, R> Move<S, A, R> for OpenMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "open"
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

        let max_gap = self.max_gap();
        let gap = rng.gen_range(1..=max_gap);
        if gap >= path.time_slices() {
            return false;
        }
        let head = match random_active_bead(path, rng) {
            Some(bead) => bead,
            None => return false,
        };

        let two_lambda_tau = system.two_lambda_tau(head.particle);
        let n_active = path.active_beads() as f64;

        // Weight of everything the gap removes: the kinetic propagators of
        // its links and the potential of its interior beads.
        let mut link_weight = 1.0;
        let mut removed_potential = 0.0;
        let mut interior = Vec::with_capacity(gap - 1);
        let mut bead = head;
        for _ in 0..gap {
            let next = match path.next(bead) {
                Some(next) => next,
                None => return false,
            };
            link_weight *= free_propagator(
                system.space(),
                path.position(bead),
                path.position(next),
                two_lambda_tau,
            );
            bead = next;
            if interior.len() + 1 < gap {
                interior.push(bead);
                removed_potential += action.bead_potential(path, bead);
            }
        }
        let tail = bead;

        let max_wind = if system.space().is_periodic() { self.max_wind } else { 0 };
        let (_, _, sigma_norm) = winding_cumulant(
            system.space(),
            path.position(head),
            path.position(tail),
            gap,
            two_lambda_tau,
            max_wind,
        );

        let ratio = self.worm_constant
            * n_active
            * max_gap as f64
            * (removed_potential - self.chemical_potential * system.tau() * (gap - 1) as f64).exp()
            * link_weight
            / sigma_norm;
        debug!("open {head} gap {gap}: ratio {ratio:.6e}");

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, head);
        snapshot.record(path, tail);
        for &b in &interior {
            snapshot.record(path, b);
        }
        let path = system.path_mut();
        for &b in &interior {
            path.set_active(b, false);
            path.set_next(b, None);
            path.set_prev(b, None);
        }
        path.set_next(head, None);
        path.set_prev(tail, None);
        path.set_worm(Some(head), Some(tail));

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

/// Closes the worm by bridging from head to tail.
///
/// Rejects when the slice gap exceeds `2^num_levels` links. Otherwise
/// samples a winding image of the tail from the propagator tower, fills the
/// gap with a staged bridge on freshly activated slots and relinks the
/// chain. Exact inverse of [`OpenMove`].
pub struct CloseMove {
    pub num_levels: usize,
    pub worm_constant: f64,
    pub chemical_potential: f64,
    pub max_wind: i32,
    stats: MoveStats,
}

impl CloseMove {
    pub fn new(num_levels: usize, worm_constant: f64, chemical_potential: f64, max_wind: i32) -> Self {
        Self {
            num_levels,
            worm_constant,
            chemical_potential,
            max_wind,
            stats: MoveStats::new(),
        }
    }

    pub fn max_gap(&self) -> usize {
        1 << self.num_levels
    }
}

impl<S, A, R> Move<S, A, R> for CloseMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "close"
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
        let slices = path.time_slices();
        let mut gap = (tail.slice + slices - head.slice) % slices;
        if gap == 0 {
            gap = slices;
        }
        let max_gap = self.max_gap();
        if gap > max_gap || gap >= slices {
            return false;
        }

        let two_lambda_tau = system.two_lambda_tau(head.particle);
        let max_wind = if system.space().is_periodic() { self.max_wind } else { 0 };
        let head_pos = path.position(head).to_owned();
        let tail_pos = path.position(tail).to_owned();
        let (sector, sigma_norm) = sample_winding_sector(
            system.space(),
            head_pos.view(),
            tail_pos.view(),
            gap,
            two_lambda_tau,
            max_wind,
            rng,
        );
        let target = bridge_target(system.space(), head_pos.view(), tail_pos.view(), sector.view());

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, head);
        snapshot.record(path, tail);

        let mut new_potential = 0.0;
        let mut prev = head;
        let mut prev_pos = head_pos;
        for j in 1..gap {
            let slice = (head.slice + j) % slices;
            let slot = system.path_mut().ensure_slot(slice);
            snapshot.record(system.path(), slot);
            let pos = staging_position(prev_pos.view(), target.view(), gap - j, two_lambda_tau, rng);
            let path = system.path_mut();
            path.assign_position(slot, pos.view());
            path.set_active(slot, true);
            path.link(prev, slot);
            new_potential += action.bead_potential(system.path(), slot);
            prev = slot;
            prev_pos = pos;
        }
        let path = system.path_mut();
        path.link(prev, tail);
        path.set_worm(None, None);

        let n_active = system.path().active_beads() as f64;
        let ratio = sigma_norm
            * (-new_potential + self.chemical_potential * system.tau() * (gap - 1) as f64).exp()
            / (self.worm_constant * n_active * max_gap as f64);
        debug!("close gap {gap}: ratio {ratio:.6e}");
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

/// Opens a worm whose head and tail share a time slice.
///
/// The canonical counterpart of [`OpenMove`]: the gap always spans one full
/// turn of the time circle, so head and tail land on the same slice and
/// closing always restores the exact particle number. Picks a bead as the
/// head, walks a full turn to the bead sharing its slice, removes every
/// bead strictly between and leaves the landing bead as the tail. On a
/// 1-cycle the walk returns to the picked bead and the worm degenerates to
/// a single bead.
pub struct CanonicalOpenMove {
    pub worm_constant: f64,
    pub max_wind: i32,
    stats: MoveStats,
}

impl CanonicalOpenMove {
    pub fn new(worm_constant: f64, max_wind: i32) -> Self {
        Self {
            worm_constant,
            max_wind,
            stats: MoveStats::new(),
        }
    }
}

impl<S, A, R> Move<S, A, R> for CanonicalOpenMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "canonical_open"
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

        let slices = path.time_slices();
        let head = match random_active_bead(path, rng) {
            Some(bead) => bead,
            None => return false,
        };
        let two_lambda_tau = system.two_lambda_tau(head.particle);
        let n_active = path.active_beads() as f64;

        // One full turn: the removed segment's kinetic weight, its interior
        // potential and the bead closing the turn as the tail.
        let mut link_weight = 1.0;
        let mut removed_potential = 0.0;
        let mut interior = Vec::with_capacity(slices - 1);
        let mut bead = head;
        for _ in 0..slices {
            let next = match path.next(bead) {
                Some(next) => next,
                None => return false,
            };
            link_weight *= free_propagator(
                system.space(),
                path.position(bead),
                path.position(next),
                two_lambda_tau,
            );
            bead = next;
            if interior.len() + 1 < slices {
                interior.push(bead);
                removed_potential += action.bead_potential(path, bead);
            }
        }
        let tail = bead;
        debug_assert_eq!(tail.slice, head.slice);

        let max_wind = if system.space().is_periodic() { self.max_wind } else { 0 };
        let (_, _, sigma_norm) = winding_cumulant(
            system.space(),
            path.position(head),
            path.position(tail),
            slices,
            two_lambda_tau,
            max_wind,
        );

        let ratio =
            self.worm_constant * n_active * removed_potential.exp() * link_weight / sigma_norm;
        debug!("canonical_open {head}: ratio {ratio:.6e}");

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, head);
        snapshot.record(path, tail);
        for &b in &interior {
            snapshot.record(path, b);
        }
        let path = system.path_mut();
        for &b in &interior {
            path.set_active(b, false);
            path.set_next(b, None);
            path.set_prev(b, None);
        }
        path.set_next(head, None);
        path.set_prev(tail, None);
        path.set_worm(Some(head), Some(tail));

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

/// Closes a worm whose ends share a time slice by bridging one full turn.
///
/// Rejects any other worm shape; same-slice ends are the configuration a
/// [`CanonicalOpenMove`] leaves behind. Samples a winding image of the
/// tail, restages one bead per missing slice and relinks the chain. Exact
/// inverse of [`CanonicalOpenMove`].
pub struct CanonicalCloseMove {
    pub worm_constant: f64,
    pub max_wind: i32,
    stats: MoveStats,
}

impl CanonicalCloseMove {
    pub fn new(worm_constant: f64, max_wind: i32) -> Self {
        Self {
            worm_constant,
            max_wind,
            stats: MoveStats::new(),
        }
    }
}

impl<S, A, R> Move<S, A, R> for CanonicalCloseMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "canonical_close"
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
        if head.slice != tail.slice {
            return false;
        }
        let slices = path.time_slices();

        let two_lambda_tau = system.two_lambda_tau(head.particle);
        let max_wind = if system.space().is_periodic() { self.max_wind } else { 0 };
        let head_pos = path.position(head).to_owned();
        let tail_pos = path.position(tail).to_owned();
        let (sector, sigma_norm) = sample_winding_sector(
            system.space(),
            head_pos.view(),
            tail_pos.view(),
            slices,
            two_lambda_tau,
            max_wind,
            rng,
        );
        let target = bridge_target(system.space(), head_pos.view(), tail_pos.view(), sector.view());

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, head);
        snapshot.record(path, tail);

        let mut new_potential = 0.0;
        let mut prev = head;
        let mut prev_pos = head_pos;
        for j in 1..slices {
            let slice = (head.slice + j) % slices;
            let slot = system.path_mut().ensure_slot(slice);
            snapshot.record(system.path(), slot);
            let pos =
                staging_position(prev_pos.view(), target.view(), slices - j, two_lambda_tau, rng);
            let path = system.path_mut();
            path.assign_position(slot, pos.view());
            path.set_active(slot, true);
            path.link(prev, slot);
            new_potential += action.bead_potential(system.path(), slot);
            prev = slot;
            prev_pos = pos;
        }
        let path = system.path_mut();
        path.link(prev, tail);
        path.set_worm(None, None);

        let n_active = system.path().active_beads() as f64;
        let ratio = sigma_norm * (-new_potential).exp() / (self.worm_constant * n_active);
        debug!("canonical_close: ratio {ratio:.6e}");
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
