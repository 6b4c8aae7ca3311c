use crate::path_state::bead::BeadLocator;
use crate::path_state::sector::SectorConstraint;
use crate::path_state::traits::{WorldLineDimensions, WorldLineStatusAccess, WormPath};
use crate::system::traits::SystemAccess;
use rand::Rng;
use serde::Serialize;

/// Accept/reject bookkeeping shared by every move.
///
/// Counters are split between the flat attempted/accepted pair and the
/// per-level pairs used by multilevel moves, where level `l` touches
/// `2^l` beads. All ratios are defined as `0.0` when nothing has been
/// attempted; that is a valid value, not an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveStats {
    num_attempted: usize,
    num_accepted: usize,
    attempted_level: Vec<usize>,
    accepted_level: Vec<usize>,
}

impl MoveStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one attempt.
    pub fn attempt(&mut self) {
        self.num_attempted += 1;
    }

    /// Counts one acceptance.
    pub fn accept(&mut self) {
        self.num_accepted += 1;
    }

    /// Counts one attempt at the given bisection level.
    pub fn attempt_level(&mut self, level: usize) {
        if self.attempted_level.len() <= level {
            self.attempted_level.resize(level + 1, 0);
            self.accepted_level.resize(level + 1, 0);
        }
        self.attempted_level[level] += 1;
    }

    /// Counts one acceptance at the given bisection level.
    pub fn accept_level(&mut self, level: usize) {
        if self.accepted_level.len() <= level {
            self.attempted_level.resize(level + 1, 0);
            self.accepted_level.resize(level + 1, 0);
        }
        self.accepted_level[level] += 1;
    }

    pub fn num_attempted(&self) -> usize {
        self.num_attempted
    }

    pub fn num_accepted(&self) -> usize {
        self.num_accepted
    }

    pub fn num_attempted_level(&self, level: usize) -> usize {
        self.attempted_level.get(level).copied().unwrap_or(0)
    }

    pub fn num_accepted_level(&self, level: usize) -> usize {
        self.accepted_level.get(level).copied().unwrap_or(0)
    }

    /// Accepted over attempted; `0.0` when nothing was attempted.
    pub fn acceptance_ratio(&self) -> f64 {
        if self.num_attempted == 0 {
            0.0
        } else {
            self.num_accepted as f64 / self.num_attempted as f64
        }
    }

    /// Per-level acceptance ratio; `0.0` when the level was never attempted.
    pub fn acceptance_ratio_level(&self, level: usize) -> f64 {
        let attempted = self.num_attempted_level(level);
        if attempted == 0 {
            0.0
        } else {
            self.num_accepted_level(level) as f64 / attempted as f64
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The contract every Monte Carlo move implements.
///
/// A move is a closed unit: `attempt_move` checks the sector precondition
/// (a violation returns `false` without counting an attempt and without
/// evaluating the action), proposes a candidate mutation of the worldline
/// store, computes the Metropolis ratio from the action delta and the
/// forward/reverse proposal densities, and either keeps the mutation or
/// rolls it back through a [`PathSnapshot`](crate::path_state::snapshot::PathSnapshot)
/// so a rejection leaves the store exactly as found.
///
/// A failed proposal (no eligible bead, incompatible worm gap, ...) counts
/// as attempted-and-rejected, equivalent to an ordinary rejection.
pub trait Move<S, A, R>
where
    S: SystemAccess,
    R: Rng,
{
    /// The move's registry name.
    fn name(&self) -> &'static str;

    /// Which sector the move operates on.
    fn sector_constraint(&self) -> SectorConstraint;

    /// Attempt the move. Returns `true` on acceptance.
    fn attempt_move(&mut self, system: &mut S, action: &A, rng: &mut R) -> bool;

    fn stats(&self) -> &MoveStats;

    fn stats_mut(&mut self) -> &mut MoveStats;

    /// Accepted over attempted for this move; `0.0` when unattempted.
    fn acceptance_ratio(&self) -> f64 {
        self.stats().acceptance_ratio()
    }

    fn num_attempted(&self) -> usize {
        self.stats().num_attempted()
    }

    fn num_accepted(&self) -> usize {
        self.stats().num_accepted()
    }

    /// Resets this move's counters.
    fn reset_accept(&mut self) {
        self.stats_mut().reset();
    }
}

/// Metropolis acceptance test.
///
/// Draws one uniform variate and accepts iff it falls below `ratio`.
/// Non-finite ratios (NaN or infinite, from degenerate action evaluations)
/// reject automatically so the chain keeps running.
pub fn metropolis<R: Rng>(rng: &mut R, ratio: f64) -> bool {
    if !ratio.is_finite() || ratio <= 0.0 {
        return false;
    }
    rng.gen::<f64>() < ratio
}

/// Draws a bead uniformly among the active beads of the store.
///
/// Uses rejection sampling over the arena with a bounded number of tries,
/// then falls back to an explicit scan. `None` when no bead is active.
pub(crate) fn random_active_bead<W, R>(path: &W, rng: &mut R) -> Option<BeadLocator>
where
    W: WormPath,
    R: Rng,
{
    let rows = path.particles();
    let slices = path.time_slices();
    if path.active_beads() == 0 {
        return None;
    }
    for _ in 0..8 * rows * slices {
        let bead = BeadLocator::new(rng.gen_range(0..slices), rng.gen_range(0..rows));
        if path.is_active(bead) {
            return Some(bead);
        }
    }
    // Extremely sparse arena: pick uniformly from the explicit list.
    let active: Vec<BeadLocator> = (0..rows)
        .flat_map(|p| (0..slices).map(move |t| BeadLocator::new(t, p)))
        .filter(|&b| path.is_active(b))
        .collect();
    Some(active[rng.gen_range(0..active.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_state::traits::WorldLineStatusAccess;
    use crate::path_state::worldlines::WorldLines;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_ratio_zero_when_unattempted() {
        let stats = MoveStats::new();
        assert_eq!(stats.acceptance_ratio(), 0.0);
        assert_eq!(stats.acceptance_ratio_level(3), 0.0);
    }

    #[test]
    fn test_ratio_in_unit_interval() {
        let mut stats = MoveStats::new();
        for i in 0..10 {
            stats.attempt();
            if i % 3 == 0 {
                stats.accept();
            }
        }
        let r = stats.acceptance_ratio();
        assert!((0.0..=1.0).contains(&r));
        assert_eq!(stats.num_attempted(), 10);
        assert_eq!(stats.num_accepted(), 4);
    }

    #[test]
    fn test_level_counters_grow_on_demand() {
        let mut stats = MoveStats::new();
        stats.attempt_level(2);
        stats.accept_level(2);
        assert_eq!(stats.num_attempted_level(2), 1);
        assert_eq!(stats.acceptance_ratio_level(2), 1.0);
        assert_eq!(stats.num_attempted_level(5), 0);
    }

    #[test]
    fn test_metropolis_rejects_non_finite() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(!metropolis(&mut rng, f64::NAN));
        assert!(!metropolis(&mut rng, f64::INFINITY));
        assert!(!metropolis(&mut rng, -1.0));
        assert!(!metropolis(&mut rng, 0.0));
        assert!(metropolis(&mut rng, 1.0));
    }

    #[test]
    fn test_random_active_bead_skips_inactive() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut path = WorldLines::new(2, 4, 1);
        for t in 0..4 {
            path.set_active(crate::path_state::bead::BeadLocator::new(t, 0), false);
        }
        for _ in 0..50 {
            let bead = random_active_bead(&path, &mut rng).unwrap();
            assert_eq!(bead.particle, 1);
        }
    }
}
