use super::traits::SystemAccess;
use crate::path_state::traits::WormPath;
use crate::space::traits::Space;

/// A system of identical particles: one diffusion constant for every row.
pub struct UniformSystem<S, W>
where
    S: Space,
    W: WormPath,
{
    pub space: S,
    pub path: W,
    pub tau: f64,
    pub two_lambda_tau: f64,
}

impl<S, W> SystemAccess for UniformSystem<S, W>
where
    S: Space,
    W: WormPath,
{
    type Space = S;
    type WorldLine = W;

    fn space(&self) -> &Self::Space {
        &self.space
    }

    fn path(&self) -> &Self::WorldLine {
        &self.path
    }

    fn path_mut(&mut self) -> &mut Self::WorldLine {
        &mut self.path
    }

    fn tau(&self) -> f64 {
        self.tau
    }

    fn two_lambda_tau(&self, _: usize) -> f64 {
        self.two_lambda_tau
    }
}
