use crate::path_state::traits::WormPath;
use crate::space::traits::Space;

/// Access to the pieces of a simulated system the move engine reads and
/// mutates: the spatial geometry, the worldline store and the imaginary-time
/// discretization constants.
pub trait SystemAccess {
    type Space: Space;
    type WorldLine: WormPath;

    fn space(&self) -> &Self::Space;
    fn path(&self) -> &Self::WorldLine;
    fn path_mut(&mut self) -> &mut Self::WorldLine;

    /// The imaginary-time step.
    fn tau(&self) -> f64;

    /// `2 λ τ` for the given particle row, the variance scale of one
    /// free-particle time step.
    fn two_lambda_tau(&self, particle: usize) -> f64;
}
