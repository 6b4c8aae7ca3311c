use super::move_base::{metropolis, Move, MoveStats};
use super::sampling::{bridge_target, free_propagator, staging_position};
use crate::action::traits::ActionOracle;
use crate::path_state::bead::BeadLocator;
use crate::path_state::sector::SectorConstraint;
use crate::path_state::snapshot::PathSnapshot;
use crate::path_state::traits::{
    WorldLineDimensions, WorldLineLinkAccess, WorldLinePositionAccess, WorldLineStatusAccess,
    WorldLineWormAccess, WormPath,
};
use crate::space::traits::Space;
use crate::system::traits::SystemAccess;
use log::debug;
use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Free-propagator weights of the pivot candidates at `pivot_slice`, seen
/// from a worm end at `from_pos` on row `from_particle` across `links` time
/// steps.
///
/// A candidate weighs zero when the `links`-step walk from it back toward
/// the worm end runs into a break, which excludes chains crossing the worm
/// ends. The walk direction is backward for head swaps and forward for tail
/// swaps. Returns the candidates, their weights and the total, which is the
/// tower normalization `Sigma` of the Metropolis ratio.
fn pivot_weights<'a, S>(
    system: &'a S,
    from_pos: ArrayView1<'a, f64>,
    from_particle: usize,
    pivot_slice: usize,
    links: usize,
    backward: bool,
) -> (Vec<BeadLocator>, Vec<f64>, f64)
where
    S: SystemAccess,
{
    let path = system.path();
    let sigma_sq = system.two_lambda_tau(from_particle) * links as f64;
    let mut candidates = Vec::new();
    let mut weights = Vec::new();
    let mut total = 0.0;
    for particle in path.active_particles_at(pivot_slice) {
        let pivot = BeadLocator::new(pivot_slice, particle);
        let reachable = if backward {
            path.retreat(pivot, links).is_some()
        } else {
            path.advance(pivot, links).is_some()
        };
        let weight = if reachable {
            free_propagator(system.space(), from_pos, path.position(pivot), sigma_sq)
        } else {
            0.0
        };
        candidates.push(pivot);
        weights.push(weight);
        total += weight;
    }
    (candidates, weights, total)
}

/// Tower-samples one candidate proportionally to its weight.
fn sample_pivot<R: Rng>(
    candidates: &[BeadLocator],
    weights: &[f64],
    total: f64,
    rng: &mut R,
) -> BeadLocator {
    let mut u = rng.gen::<f64>() * total;
    let mut fallback = None;
    for (candidate, &weight) in candidates.iter().zip(weights) {
        if weight <= 0.0 {
            continue;
        }
        fallback = Some(*candidate);
        u -= weight;
        if u <= 0.0 {
            return *candidate;
        }
    }
    // Rounding can push the scan past the end of the tower; fall back to
    // the last candidate that actually carries weight.
    fallback.expect("a positive total implies a positive-weight candidate")
}

/// Rebridges the interior of `chain` from `from_pos` to the fixed position
/// of the chain's last bead, using the nearest image as the target.
fn rebridge<S, R>(system: &mut S, from_pos: &Array1<f64>, chain: &[BeadLocator], rng: &mut R)
where
    S: SystemAccess,
    R: Rng,
{
    let links = chain.len() - 1;
    let two_lambda_tau = system.two_lambda_tau(chain[0].particle);
    let zero_sector = Array1::<i32>::zeros(system.space().spatial_dimensions());
    let pivot_pos = system.path().position(chain[links]).to_owned();
    let target = bridge_target(
        system.space(),
        from_pos.view(),
        pivot_pos.view(),
        zero_sector.view(),
    );
    let mut prev_pos = from_pos.clone();
    for (j, &bead) in chain.iter().enumerate().take(links).skip(1) {
        let pos = staging_position(prev_pos.view(), target.view(), links - j, two_lambda_tau, rng);
        system.path_mut().assign_position(bead, pos.view());
        prev_pos = pos;
    }
}

/// Reconnects the worm head onto another worldline.
///
/// A pivot bead `2^num_levels` slices ahead of the head is tower-sampled by
/// free-propagator weight. The chain that used to reach the pivot is cut at
/// its start, which becomes the new head, and the head is bridged to the
/// pivot instead. Accepts on the potential change of the rebridged interior
/// times the ratio of the forward and reverse tower normalizations, the
/// latter evaluated after the reconnection. This is the move that mixes
/// permutation cycles.
pub struct SwapHeadMove {
    pub num_levels: usize,
    stats: MoveStats,
}

impl SwapHeadMove {
    pub fn new(num_levels: usize) -> Self {
        Self {
            num_levels,
            stats: MoveStats::new(),
        }
    }

    pub fn swap_links(&self) -> usize {
        1 << self.num_levels
    }
}

impl<S, A, R> Move<S, A, R> for SwapHeadMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "swap_head"
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

        let links = self.swap_links();
        if links >= path.time_slices() {
            return false;
        }
        let (head, tail) = match (path.worm_head(), path.worm_tail()) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return false,
        };
        let pivot_slice = (head.slice + links) % path.time_slices();
        let head_pos = path.position(head).to_owned();
        let (candidates, weights, sigma_head) =
            pivot_weights(system, head_pos.view(), head.particle, pivot_slice, links, true);
        if sigma_head <= 0.0 {
            return false;
        }
        let pivot = sample_pivot(&candidates, &weights, sigma_head, rng);
        let swap = system
            .path()
            .retreat(pivot, links)
            .expect("sampled pivot has a complete backward chain");

        // The chain that currently feeds the pivot, swap end first.
        let path = system.path();
        let mut chain = Vec::with_capacity(links + 1);
        chain.push(swap);
        let mut bead = swap;
        for _ in 0..links {
            bead = path.next(bead).expect("pivot chain is fully linked");
            chain.push(bead);
        }

        let interior = &chain[1..links];
        let old_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, head);
        snapshot.record(path, swap);
        snapshot.record(path, chain[1]);
        for &b in interior {
            snapshot.record(path, b);
        }
        {
            let path = system.path_mut();
            path.link(head, chain[1]);
            path.set_next(swap, None);
            path.set_worm(Some(swap), Some(tail));
        }
        rebridge(system, &head_pos, &chain, rng);

        let path = system.path();
        let new_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();
        let swap_pos = path.position(swap).to_owned();
        let (_, _, sigma_swap) =
            pivot_weights(system, swap_pos.view(), swap.particle, pivot_slice, links, true);
        let ratio = sigma_head / sigma_swap * (old_potential - new_potential).exp();
        debug!("swap_head via {pivot}: ratio {ratio:.6e}");
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

/// Reconnects the worm tail onto another worldline; the mirror image of
/// [`SwapHeadMove`], pivoting `2^num_levels` slices behind the tail.
pub struct SwapTailMove {
    pub num_levels: usize,
    stats: MoveStats,
}

impl SwapTailMove {
    pub fn new(num_levels: usize) -> Self {
        Self {
            num_levels,
            stats: MoveStats::new(),
        }
    }

    pub fn swap_links(&self) -> usize {
        1 << self.num_levels
    }
}

impl<S, A, R> Move<S, A, R> for SwapTailMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "swap_tail"
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

        let links = self.swap_links();
        let slices = path.time_slices();
        if links >= slices {
            return false;
        }
        let (head, tail) = match (path.worm_head(), path.worm_tail()) {
            (Some(head), Some(tail)) => (head, tail),
            _ => return false,
        };
        let pivot_slice = (tail.slice + slices - links % slices) % slices;
        let tail_pos = path.position(tail).to_owned();
        let (candidates, weights, sigma_tail) =
            pivot_weights(system, tail_pos.view(), tail.particle, pivot_slice, links, false);
        if sigma_tail <= 0.0 {
            return false;
        }
        let pivot = sample_pivot(&candidates, &weights, sigma_tail, rng);
        let swap = system
            .path()
            .advance(pivot, links)
            .expect("sampled pivot has a complete forward chain");

        // The chain the pivot currently feeds, pivot first.
        let path = system.path();
        let mut chain = Vec::with_capacity(links + 1);
        chain.push(pivot);
        let mut bead = pivot;
        for _ in 0..links {
            bead = path.next(bead).expect("pivot chain is fully linked");
            chain.push(bead);
        }
        debug_assert_eq!(chain[links], swap);

        let interior = &chain[1..links];
        let old_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, tail);
        snapshot.record(path, swap);
        snapshot.record(path, chain[links - 1]);
        for &b in interior {
            snapshot.record(path, b);
        }
        {
            let path = system.path_mut();
            path.link(chain[links - 1], tail);
            path.set_prev(swap, None);
            path.set_worm(Some(head), Some(swap));
        }
        // Bridge from the pivot to the relocated endpoint, the tail.
        let pivot_pos = system.path().position(pivot).to_owned();
        let mut tail_chain = chain.clone();
        tail_chain[links] = tail;
        rebridge(system, &pivot_pos, &tail_chain, rng);

        let path = system.path();
        let new_potential: f64 = interior
            .iter()
            .map(|&b| action.bead_potential(path, b))
            .sum();
        let swap_pos = path.position(swap).to_owned();
        let (_, _, sigma_swap) =
            pivot_weights(system, swap_pos.view(), swap.particle, pivot_slice, links, false);
        let ratio = sigma_tail / sigma_swap * (old_potential - new_potential).exp();
        debug!("swap_tail via {pivot}: ratio {ratio:.6e}");
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

/// Relocates the break across worldlines without moving a bead.
///
/// Picks a link crossing the head's slice boundary uniformly, hands its
/// continuation to the head and leaves the link's origin as the new head.
/// The only action change is the kinetic term of the exchanged link, and
/// the candidate multiplicity is the same before and after, so the ratio
/// is a single kinetic exponential.
pub struct SwapBreakMove {
    stats: MoveStats,
}

impl SwapBreakMove {
    pub fn new() -> Self {
        Self {
            stats: MoveStats::new(),
        }
    }
}

impl Default for SwapBreakMove {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A, R> Move<S, A, R> for SwapBreakMove
where
    S: SystemAccess,
    A: ActionOracle<S::WorldLine>,
    R: Rng,
{
    fn name(&self) -> &'static str {
        "swap_break"
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
        let candidates: Vec<(BeadLocator, BeadLocator)> = path
            .active_particles_at(head.slice)
            .into_iter()
            .map(|p| BeadLocator::new(head.slice, p))
            .filter(|&a| a != head)
            .filter_map(|a| path.next(a).map(|b| (a, b)))
            .collect();
        if candidates.is_empty() {
            return false;
        }
        let (a, b) = candidates[rng.gen_range(0..candidates.len())];

        let old_kinetic = action.link_kinetic(path, a, b);
        let new_kinetic = action.link_kinetic(path, head, b);
        let ratio = (old_kinetic - new_kinetic).exp();
        debug!("swap_break {a} -> {b}: ratio {ratio:.6e}");

        let mut snapshot = PathSnapshot::capture(path);
        snapshot.record(path, head);
        snapshot.record(path, a);
        snapshot.record(path, b);
        let path = system.path_mut();
        path.link(head, b);
        path.set_next(a, None);
        path.set_worm(Some(a), Some(tail));

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
