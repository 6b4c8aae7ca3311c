use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Trait for working with spatial boundaries and distances.
///
/// Implementations define the geometry of the simulation cell: how to take
/// the difference between two points (applying the nearest-image convention
/// where boundaries are periodic), the cell volume, and the winding-number
/// bookkeeping needed by moves that may wrap a periodic boundary.
pub trait Space {
    /// Number of spatial dimensions.
    fn spatial_dimensions(&self) -> usize;

    /// D-dimensional volume of the space.
    fn volume(&self) -> f64;

    /// Whether the space has periodic boundaries.
    fn is_periodic(&self) -> bool;

    /// Compute the vector difference `r1 - r2`, reduced to the nearest image
    /// for periodic boundaries.
    fn difference<'a, A, B>(&self, r1: A, r2: B) -> Array1<f64>
    where
        A: Into<ArrayView1<'a, f64>>,
        B: Into<ArrayView1<'a, f64>>;

    /// Compute the Euclidean distance between two points.
    fn distance<'a, A, B>(&self, r1: A, r2: B) -> f64
    where
        A: Into<ArrayView1<'a, f64>>,
        B: Into<ArrayView1<'a, f64>>,
    {
        self.difference(r1, r2)
            .iter()
            .map(|&d| d * d)
            .sum::<f64>()
            .sqrt()
    }

    /// Displacement that maps a point onto the periodic image labelled by
    /// the integer winding vector `sector`. The zero vector in free space.
    fn image_shift<'a, A>(&self, sector: A) -> Array1<f64>
    where
        A: Into<ArrayView1<'a, i32>>;

    /// Draw a position uniformly over the fundamental cell. `None` when the
    /// space has infinite volume, in which case no uniform measure exists.
    fn sample_position<R: Rng>(&self, rng: &mut R) -> Option<Array1<f64>>;

    /// Integer winding vector implied by the straight-line displacement from
    /// `r1` to `r2`, wrapped through the periodic cell. A deterministic
    /// geometric computation; identically zero in free space.
    fn winding_number<'a, A, B>(&self, r1: A, r2: B) -> Array1<i32>
    where
        A: Into<ArrayView1<'a, f64>>,
        B: Into<ArrayView1<'a, f64>>;
}

pub trait BaseImage {
    /// Get the point's base image within the fundamental simulation cell.
    fn base_image<'a, A>(&self, r: A) -> Array1<f64>
    where
        A: Into<ArrayView1<'a, f64>>;
}
