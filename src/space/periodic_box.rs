use super::traits::{BaseImage, Space};
use ndarray::{Array1, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A box with periodic boundary conditions.
///
/// The `PeriodicBox` struct provides utilities for working with periodic
/// systems, such as calculating the difference between positions under the
/// nearest-image convention, wrapping positions to their fundamental image,
/// and translating between periodic images and integer winding vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicBox {
    /// The lengths of the box in each spatial dimension.
    length: Vec<f64>,
}

impl PeriodicBox {
    /// Creates a new `PeriodicBox` instance.
    ///
    /// # Arguments
    /// * `length` - The length of the box in each spatial dimension.
    ///
    /// # Panics
    /// Panics if `length` is empty or any value is not positive.
    pub fn new(length: Vec<f64>) -> Self {
        assert!(!length.is_empty(), "Box must have at least one dimension");
        assert!(
            length.iter().all(|&l| l > 0.0),
            "All box lengths must be positive."
        );
        Self { length }
    }

    /// The side lengths of the box.
    pub fn lengths(&self) -> &[f64] {
        &self.length
    }
}

impl Space for PeriodicBox {
    fn spatial_dimensions(&self) -> usize {
        self.length.len()
    }

    fn volume(&self) -> f64 {
        self.length.iter().product()
    }

    fn is_periodic(&self) -> bool {
        true
    }

    /// Computes the periodic difference between two positions.
    ///
    /// The result applies the nearest-image convention so that each component
    /// lies in the range `[-length/2, length/2]`.
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
            self.length.len(),
            "Lengths vector must have the same length as input arrays"
        );

        r1_view
            .iter()
            .zip(&r2_view)
            .zip(&self.length)
            .map(|((&x1, &x2), &l)| {
                let diff = x1 - x2;
                diff - l * (diff / l).round()
            })
            .collect()
    }

    fn sample_position<R: Rng>(&self, rng: &mut R) -> Option<Array1<f64>> {
        Some(self.length.iter().map(|&l| rng.gen::<f64>() * l).collect())
    }

    fn image_shift<'a, A>(&self, sector: A) -> Array1<f64>
    where
        A: Into<ArrayView1<'a, i32>>,
    {
        let sector_view = sector.into();
        debug_assert_eq!(
            sector_view.len(),
            self.length.len(),
            "Winding vector length must match the box dimensions"
        );
        sector_view
            .iter()
            .zip(&self.length)
            .map(|(&w, &l)| w as f64 * l)
            .collect()
    }

    /// Integer winding vector implied by going from `r1` to `r2` along the
    /// straight line, i.e. the number of box lengths by which the raw
    /// displacement exceeds its nearest image.
    fn winding_number<'a, A, B>(&self, r1: A, r2: B) -> Array1<i32>
    where
        A: Into<ArrayView1<'a, f64>>,
        B: Into<ArrayView1<'a, f64>>,
    {
        let r1_view = r1.into();
        let r2_view = r2.into();
        let nearest = self.difference(r2_view, r1_view);
        r2_view
            .iter()
            .zip(&r1_view)
            .zip(&nearest)
            .zip(&self.length)
            .map(|(((&x2, &x1), &near), &l)| ((x2 - x1 - near) / l).round() as i32)
            .collect()
    }
}

impl BaseImage for PeriodicBox {
    /// Maps a position to its fundamental image within the range
    /// `[0, length)` in each dimension.
    fn base_image<'a, A>(&self, r: A) -> Array1<f64>
    where
        A: Into<ArrayView1<'a, f64>>,
    {
        r.into()
            .iter()
            .zip(&self.length)
            .map(|(&x, &l)| x.rem_euclid(l))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_periodic_box_difference() {
        let pbc = PeriodicBox::new(vec![1.0, 1.0, 2.0]);
        let diff = pbc.difference(&array![0.4, 1.1, 1.8], &array![0.0, 0.0, 0.0]);
        let expected = array![0.4, 0.1, -0.2];
        for i in 0..3 {
            assert!((diff[i] - expected[i]).abs() < 1e-14);
        }
    }

    #[test]
    fn test_periodic_box_volume() {
        let pbc = PeriodicBox::new(vec![1.0, 2.0, 4.0]);
        assert_eq!(pbc.volume(), 8.0);
    }

    #[test]
    fn test_periodic_box_base_image() {
        let pbc = PeriodicBox::new(vec![1.0, 2.0, 4.0]);
        let image = pbc.base_image(&array![0.6, -3.1, 10.8]);
        let expected = array![0.6, 0.9, 2.8];
        for i in 0..3 {
            assert!((image[i] - expected[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_winding_number() {
        let pbc = PeriodicBox::new(vec![1.0, 2.0]);
        // Straight-line displacement of (2.1, -3.9) from origin:
        // wraps twice in x (nearest image 0.1), -2 times in y (nearest 0.1).
        let w = pbc.winding_number(&array![0.0, 0.0], &array![2.1, -3.9]);
        assert_eq!(w, array![2, -2]);
        // Winding is antisymmetric under endpoint exchange.
        let w_back = pbc.winding_number(&array![2.1, -3.9], &array![0.0, 0.0]);
        assert_eq!(w_back, array![-2, 2]);
    }

    #[test]
    fn test_image_shift_matches_winding() {
        let pbc = PeriodicBox::new(vec![1.5, 3.0]);
        let r1 = array![0.2, 0.4];
        let r2 = array![3.4, -2.9];
        let w = pbc.winding_number(&r1, &r2);
        let shift = pbc.image_shift(&w);
        // Removing the image shift brings r2 back to the nearest image of r1.
        let unwrapped = &r2 - &shift;
        let near = pbc.difference(&unwrapped, &r1);
        for d in 0..2 {
            assert!((unwrapped[d] - r1[d] - near[d]).abs() < 1e-12);
        }
    }
}
