use super::move_base::{metropolis, random_active_bead, Move, MoveStats};
use super::sampling::{
    bridge_target, free_particle_position, sample_winding_sector, staging_position,
};
use crate::action::traits::ActionOracle;
use crate::path_state::bead::BeadLocator;
use crate::path_state::sector::SectorConstraint;
use crate::path_state::snapshot::PathSnapshot;
use crate::path_state::traits::{
    WorldLineDimensions, WorldLineLinkAccess, WorldLinePositionAccess, WorldLineWormAccess,
    WormPath,
};
use crate::space::traits::Space;
use crate::system::traits::SystemAccess;
use log::debug;
use rand::Rng;

/// Collects `links + 1` beads walking forward from `start`. `None` if the
/// walk reaches a worm end first.
fn collect_chain<W: WormPath>(path: &W, start: BeadLocator, links: usize) -> Option<Vec<BeadLocator>> {
    let mut chain = Vec::with_capacity(links + 1);
    chain.push(start);
    let mut bead = start;
    for _ in 0..links {
        bead = path.next(bead)?;
        chain.push(bead);
    }
    Some(chain)
}

/// Resamples the interior beads of `chain` as a staged bridge from the
/// first to the last bead, whose positions stay fixed. When the space is
/// periodic the bridge may target any image of the endpoint within
/// `max_wind`, sampled with its free-propagator weight; the winding-sector
/// probabilities cancel between forward and reverse proposals, so moves
/// built on this helper accept on the potential change alone.
fn restage_interior<S, R>(
    system: &mut S,
    chain: &[BeadLocator],
    max_wind: i32,
    rng: &mut R,
) where
    S: SystemAccess,
    R: Rng,
{
    let links = chain.len() - 1;
    let two_lambda_tau = system.two_lambda_tau(chain[0].particle);
    let path = system.path();
    let start_pos = path.position(chain[0]).to_owned();
    let end_pos = path.position(chain[links]).to_owned();
    let max_wind = if system.space().is_periodic() { max_wind } else { 0 };
    let (sector, _) = sample_winding_sector(
        system.space(),
        start_pos.view(),
        end_pos.view(),
        links,
        two_lambda_tau,
        max_wind,
        rng,
    );
    let target = bridge_target(system.space(), start_pos.view(), end_pos.view(), sector.view());

    let mut prev_pos = start_pos;
    for (j, &bead) in chain.iter().enumerate().take(links).skip(1) {
        let pos = staging_position(prev_pos.view(), target.view(), links - j, two_lambda_tau, rng);
        system.path_mut().assign_position(bead, pos.view());
        prev_pos = pos;
    }
}

/// Staged resampling of a worldline segment with fixed endpoints.
///
/// Picks an active bead, follows `stage_length` forward links and redraws
/// the interior beads with a Levy bridge. The exactly-sampled kinetic
/// factors cancel, leaving a pure potential Metropolis ratio. In a periodic
/// box the bridge may also target a wound image of the endpoint, which is
/// how this move changes the winding number.
pub struct StagingMove {
    pub stage_length: usize,
    pub max_wind: i32,
    stats: MoveStats,
}

impl StagingMove {
    /// # Panics
    /// Panics if `stage_length < 2`: a shorter stage has no interior.
    pub fn new(stage_length: usize, max_wind: i32) -> Self {
        assert!(stage_length >= 2, "a stage needs at least one interior bead");
        Self {
            stage_length,
            max_wind,
            stats: MoveStats::new(),
        }
    }
}

impl<S, A, R> Move<S, A, R> for StagingMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "staging"
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

        // Walking fewer links than there are slices cannot revisit a bead.
        if self.stage_length >= path.time_slices() {
            return false;
        }
        let start = match random_active_bead(path, rng) {
            Some(bead) => bead,
            None => return false,
        };
        let chain = match collect_chain(path, start, self.stage_length) {
            Some(chain) => chain,
            None => return false,
        };

        let interior = &chain[1..self.stage_length];
        let old_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();

        let mut snapshot = PathSnapshot::capture(path);
        for &bead in interior {
            snapshot.record(path, bead);
        }
        restage_interior(system, &chain, self.max_wind, rng);

        let path = system.path();
        let new_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();
        let ratio = (old_potential - new_potential).exp();
        debug!("staging from {start}: ratio {ratio:.6e}");
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

/// Staged resampling of a worm end.
///
/// Redraws the last `stage_length` links at the head or the first
/// `stage_length` links at the tail, chosen with equal probability. The
/// end bead itself moves: it is drawn as a free-particle step from the
/// anchor, then the interior is bridged to it. Proposal densities are
/// symmetric, so the ratio is again purely potential.
pub struct EndStagingMove {
    pub stage_length: usize,
    stats: MoveStats,
}

impl EndStagingMove {
    pub fn new(stage_length: usize) -> Self {
        assert!(stage_length >= 1, "a stage needs at least one link");
        Self {
            stage_length,
            stats: MoveStats::new(),
        }
    }
}

impl<S, A, R> Move<S, A, R> for EndStagingMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "end_staging"
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

        let length = self.stage_length;
        let redraw_head = rng.gen_bool(0.5);
        // Walking from the end toward the interior of the worm; `None` means
        // the worm is shorter than the stage.
        let (end, chain) = if redraw_head {
            let head = match path.worm_head() {
                Some(head) => head,
                None => return false,
            };
            let anchor = match path.retreat(head, length) {
                Some(anchor) => anchor,
                None => return false,
            };
            let chain = collect_chain(path, anchor, length)
                .expect("retreat walk implies the forward chain exists");
            (head, chain)
        } else {
            let tail = match path.worm_tail() {
                Some(tail) => tail,
                None => return false,
            };
            let chain = match collect_chain(path, tail, length) {
                Some(mut chain) => {
                    // Anchor first, end bead last, as in the head case.
                    chain.reverse();
                    chain
                }
                None => return false,
            };
            (tail, chain)
        };

        // All beads but the anchor are redrawn.
        let redrawn = &chain[1..];
        let old_potential: f64 = redrawn
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();

        let mut snapshot = PathSnapshot::capture(path);
        for &bead in redrawn {
            snapshot.record(path, bead);
        }

        let two_lambda_tau = system.two_lambda_tau(end.particle);
        let anchor_pos = system.path().position(chain[0]).to_owned();
        let new_end = free_particle_position(anchor_pos.view(), two_lambda_tau * length as f64, rng);
        let mut prev_pos = anchor_pos;
        for (j, &bead) in chain.iter().enumerate().take(length).skip(1) {
            let pos = staging_position(prev_pos.view(), new_end.view(), length - j, two_lambda_tau, rng);
            system.path_mut().assign_position(bead, pos.view());
            prev_pos = pos;
        }
        system.path_mut().assign_position(end, new_end.view());

        let path = system.path();
        let new_potential: f64 = redrawn
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();
        let ratio = (old_potential - new_potential).exp();
        debug!(
            "end_staging at {} end: ratio {ratio:.6e}",
            if redraw_head { "head" } else { "tail" }
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

/// Staged resampling of an interior worm segment.
///
/// Like [`StagingMove`] but the segment is drawn entirely from the worm
/// chain, keeping both worm ends fixed. Useful when the worm is long and
/// the closed-loop staging rarely lands on it.
pub struct MidStagingMove {
    pub stage_length: usize,
    pub max_wind: i32,
    stats: MoveStats,
}

impl MidStagingMove {
    pub fn new(stage_length: usize, max_wind: i32) -> Self {
        assert!(stage_length >= 2, "a stage needs at least one interior bead");
        Self {
            stage_length,
            max_wind,
            stats: MoveStats::new(),
        }
    }
}

impl<S, A, R> Move<S, A, R> for MidStagingMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "mid_staging"
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

        let head = match path.worm_head() {
            Some(head) => head,
            None => return false,
        };
        let worm_beads = path
            .worm_bead_count()
            .expect("off-diagonal sector has a worm");
        if worm_beads < self.stage_length + 1 {
            return false;
        }
        // Offset of the segment's start from the tail, uniform over all
        // placements that keep both ends strictly inside the worm walk.
        let placements = worm_beads - self.stage_length;
        let offset = rng.gen_range(0..placements);
        let start = path
            .retreat(head, self.stage_length + offset)
            .expect("segment placement stays on the worm");
        let chain = collect_chain(path, start, self.stage_length)
            .expect("segment placement stays on the worm");

        let interior = &chain[1..self.stage_length];
        let old_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();

        let mut snapshot = PathSnapshot::capture(path);
        for &bead in interior {
            snapshot.record(path, bead);
        }
        restage_interior(system, &chain, self.max_wind, rng);

        let path = system.path();
        let new_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();
        let ratio = (old_potential - new_potential).exp();
        debug!("mid_staging offset {offset}: ratio {ratio:.6e}");
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
