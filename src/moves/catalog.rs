use super::move_base::Move;
use crate::system::traits::SystemAccess;
use log::info;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;
use serde::Serialize;

/// A serializable per-move statistics row, for run reports.
#[derive(Debug, Clone, Serialize)]
pub struct MoveStatistics {
    pub name: String,
    pub attempted: usize,
    pub accepted: usize,
    pub acceptance_ratio: f64,
}

/// The weighted registry of the move set.
///
/// Owns the moves as trait objects together with their selection weights
/// and the cross-move totals. Totals belong to the catalog, not to any
/// move: they only change through [`MoveCatalog::attempt_random`] and are
/// cleared explicitly with [`MoveCatalog::reset_statistics`]. A sector
/// precondition violation does not count as an attempt, so the totals stay
/// meaningful when the registry mixes Z-only and G-only moves.
pub struct MoveCatalog<S, A, R>
where
    S: SystemAccess,
    R: Rng,
{
    moves: Vec<Box<dyn Move<S, A, R>>>,
    weights: Vec<f64>,
    weighted_index: Option<WeightedIndex<f64>>,
    total_attempted: usize,
    total_accepted: usize,
}

impl<S, A, R> MoveCatalog<S, A, R>
where
    S: SystemAccess,
    R: Rng,
{
    pub fn new() -> Self {
        Self {
            moves: Vec::new(),
            weights: Vec::new(),
            weighted_index: None,
            total_attempted: 0,
            total_accepted: 0,
        }
    }

    /// Registers a move with a selection weight.
    ///
    /// # Panics
    /// Panics if `weight` is not positive.
    pub fn push<M>(&mut self, candidate_move: M, weight: f64)
    where
        M: Move<S, A, R> + 'static,
    {
        assert!(weight > 0.0, "Weight must be positive");
        self.moves.push(Box::new(candidate_move));
        self.weights.push(weight);
        self.weighted_index = Some(
            WeightedIndex::new(&self.weights).expect("positive weights form a valid distribution"),
        );
    }

    /// Reweights an already registered move.
    ///
    /// # Panics
    /// Panics if the index is out of bounds or the weight is not positive.
    pub fn set_weight(&mut self, index: usize, weight: f64) {
        assert!(weight > 0.0, "Weight must be positive");
        assert!(index < self.weights.len(), "Index out of bounds");
        self.weights[index] = weight;
        self.weighted_index = Some(
            WeightedIndex::new(&self.weights).expect("positive weights form a valid distribution"),
        );
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Draws a move from the weighted distribution and attempts it.
    /// Returns `true` on acceptance; `false` covers rejection, proposal
    /// failure and sector skips alike.
    pub fn attempt_random(&mut self, system: &mut S, action: &A, rng: &mut R) -> bool {
        let index = match &self.weighted_index {
            Some(weighted_index) => weighted_index.sample(rng),
            None => return false,
        };
        let candidate_move = &mut self.moves[index];
        let attempted_before = candidate_move.stats().num_attempted();
        let accepted = candidate_move.attempt_move(system, action, rng);
        self.total_attempted += candidate_move.stats().num_attempted() - attempted_before;
        if accepted {
            self.total_accepted += 1;
        }
        accepted
    }

    pub fn by_name(&self, name: &str) -> Option<&dyn Move<S, A, R>> {
        self.moves
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    pub fn total_attempted(&self) -> usize {
        self.total_attempted
    }

    pub fn total_accepted(&self) -> usize {
        self.total_accepted
    }

    /// Accepted over attempted across the whole catalog; `0.0` before any
    /// attempt.
    pub fn total_acceptance_ratio(&self) -> f64 {
        if self.total_attempted == 0 {
            0.0
        } else {
            self.total_accepted as f64 / self.total_attempted as f64
        }
    }

    /// One statistics row per registered move, in registration order.
    pub fn statistics(&self) -> Vec<MoveStatistics> {
        self.moves
            .iter()
            .map(|m| MoveStatistics {
                name: m.name().to_string(),
                attempted: m.num_attempted(),
                accepted: m.num_accepted(),
                acceptance_ratio: m.acceptance_ratio(),
            })
            .collect()
    }

    /// Clears the catalog totals and every move's counters.
    pub fn reset_statistics(&mut self) {
        info!(
            "resetting move statistics after {} attempts",
            self.total_attempted
        );
        self.total_attempted = 0;
        self.total_accepted = 0;
        for m in &mut self.moves {
            m.reset_accept();
        }
    }
}

impl<S, A, R> Default for MoveCatalog<S, A, R>
where
    S: SystemAccess,
    R: Rng,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::primitive::{PrimitiveAction, ZeroPotential};
    use crate::moves::displace::DisplaceMove;
    use crate::moves::open_close::{CloseMove, OpenMove};
    use crate::moves::staging::StagingMove;
    use crate::path_state::traits::*;
    use crate::path_state::worldlines::WorldLines;
    use crate::space::free_space::FreeSpace;
    use crate::system::uniform_system::UniformSystem;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestSystem = UniformSystem<FreeSpace, WorldLines>;
    type TestAction = PrimitiveAction<FreeSpace, ZeroPotential>;

    fn catalog() -> MoveCatalog<TestSystem, TestAction, StdRng> {
        let mut catalog = MoveCatalog::new();
        catalog.push(DisplaceMove::new(0.3), 2.0);
        catalog.push(StagingMove::new(3, 0), 2.0);
        catalog.push(OpenMove::new(2, 0.1, 0.0, 0), 1.0);
        catalog.push(CloseMove::new(2, 0.1, 0.0, 0), 1.0);
        catalog
    }

    #[test]
    fn test_totals_match_per_move_counters() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut system = UniformSystem {
            space: FreeSpace::new(2),
            path: WorldLines::new(2, 8, 2),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        let action = PrimitiveAction::new(FreeSpace::new(2), ZeroPotential, 0.1, 0.2);
        let mut rng = StdRng::seed_from_u64(7);
        let mut catalog = catalog();

        let mut accepted = 0;
        for _ in 0..500 {
            if catalog.attempt_random(&mut system, &action, &mut rng) {
                accepted += 1;
            }
            assert!(system.path.is_consistent());
        }
        let per_move_attempts: usize = catalog.statistics().iter().map(|s| s.attempted).sum();
        assert_eq!(catalog.total_attempted(), per_move_attempts);
        assert_eq!(catalog.total_accepted(), accepted);
        // Sector-skipped draws never reach the counters.
        assert!(catalog.total_attempted() <= 500);
    }

    #[test]
    fn test_reset_statistics_clears_everything() {
        let mut system = UniformSystem {
            space: FreeSpace::new(2),
            path: WorldLines::new(2, 8, 2),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        let action = PrimitiveAction::new(FreeSpace::new(2), ZeroPotential, 0.1, 0.2);
        let mut rng = StdRng::seed_from_u64(8);
        let mut catalog = catalog();
        for _ in 0..100 {
            catalog.attempt_random(&mut system, &action, &mut rng);
        }
        assert!(catalog.total_attempted() > 0);
        catalog.reset_statistics();
        assert_eq!(catalog.total_attempted(), 0);
        assert_eq!(catalog.total_accepted(), 0);
        assert_eq!(catalog.total_acceptance_ratio(), 0.0);
        for row in catalog.statistics() {
            assert_eq!(row.attempted, 0);
            assert_eq!(row.accepted, 0);
        }
    }

    #[test]
    fn test_by_name_finds_registered_moves() {
        let catalog = catalog();
        assert!(catalog.by_name("open").is_some());
        assert!(catalog.by_name("staging").is_some());
        assert!(catalog.by_name("swap_head").is_none());
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn test_statistics_serialize_to_json() {
        let catalog = catalog();
        let rows = catalog.statistics();
        let json = serde_json::to_string(&rows).unwrap();
        assert!(json.contains("\"name\":\"displace\""));
        assert!(json.contains("\"attempted\":0"));
    }

    #[test]
    fn test_empty_catalog_never_accepts() {
        let mut system = UniformSystem {
            space: FreeSpace::new(2),
            path: WorldLines::new(1, 4, 2),
            tau: 0.1,
            two_lambda_tau: 0.2,
        };
        let action = PrimitiveAction::new(FreeSpace::new(2), ZeroPotential, 0.1, 0.2);
        let mut rng = StdRng::seed_from_u64(9);
        let mut catalog: MoveCatalog<TestSystem, TestAction, StdRng> = MoveCatalog::new();
        assert!(!catalog.attempt_random(&mut system, &action, &mut rng));
        assert_eq!(catalog.total_attempted(), 0);
    }
}
