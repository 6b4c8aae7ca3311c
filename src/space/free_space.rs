use super::traits::Space;
use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Unrestricted Euclidean space in D dimensions.
///
/// Differences are plain vector differences and all winding numbers vanish.
/// The volume is infinite, so moves whose acceptance ratio carries a volume
/// factor (e.g. worm insertion) are never accepted in free space.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeSpace {
    dimensions: usize,
}

impl FreeSpace {
    /// Creates a new `FreeSpace` with the given number of spatial dimensions.
    ///
    /// # Panics
    /// Panics if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Self {
        assert!(dimensions > 0, "Space must have at least one dimension");
        Self { dimensions }
    }
}

impl Space for FreeSpace {
    fn spatial_dimensions(&self) -> usize {
        self.dimensions
    }

    fn volume(&self) -> f64 {
        f64::INFINITY
    }

    fn is_periodic(&self) -> bool {
        false
    }

    fn difference<'a, A, B>(&self, r1: A, r2: B) -> Array1<f64>
    where
        A: Into<ArrayView1<'a, f64>>,
        B: Into<ArrayView1<'a, f64>>,
    {
        let r1_view = r1.into();
        let r2_view = r2.into();
        debug_assert_eq!(
            r1_view.len(),
            r2_view.len(),
            "Arrays must have the same shape"
        );
        debug_assert_eq!(
            r1_view.len(),
            self.dimensions,
            "Input array lengths must match the dimensionality of FreeSpace"
        );
        &r1_view - &r2_view
    }

    fn sample_position<R: Rng>(&self, _rng: &mut R) -> Option<Array1<f64>> {
        None
    }

    fn image_shift<'a, A>(&self, sector: A) -> Array1<f64>
    where
        A: Into<ArrayView1<'a, i32>>,
    {
        let sector_view = sector.into();
        debug_assert_eq!(
            sector_view.len(),
            self.dimensions,
            "Winding vector length must match the dimensionality of FreeSpace"
        );
        Array1::zeros(self.dimensions)
    }

    fn winding_number<'a, A, B>(&self, _r1: A, _r2: B) -> Array1<i32>
    where
        A: Into<ArrayView1<'a, f64>>,
        B: Into<ArrayView1<'a, f64>>,
    {
        Array1::zeros(self.dimensions)
    }
}
