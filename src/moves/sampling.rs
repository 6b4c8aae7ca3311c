use crate::space::traits::Space;
use ndarray::{Array1, ArrayBase, ArrayView1, DataMut, Ix2};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Redraws the beads between the first and last rows of `polymer` with
/// Levy's staging algorithm, keeping both endpoint rows fixed.
///
/// Each row is a time slice, each column a spatial dimension. The sampled
/// interior exactly follows the free-particle bridge density, so kinetic
/// proposal factors cancel in the Metropolis ratio of any move built on it.
///
/// # References
/// - W. Krauth, "Statistical Mechanics: Algorithms and Computations",
///   OUP Oxford, 2006, Algorithm 3.5, p.154 (with different normalization).
pub fn levy_staging<S, R: Rng>(polymer: &mut ArrayBase<S, Ix2>, two_lambda_tau: f64, rng: &mut R)
where
    S: DataMut<Elem = f64>,
{
    debug_assert!(two_lambda_tau >= 0.0, "two_lambda_tau cannot be negative");

    let shape = polymer.shape();
    let n_slices = shape[0];
    let n_dimens = shape[1];
    debug_assert!(n_slices > 1, "The polymer must have at least 2 slices");
    let delta_j = n_slices - 1; // The number of links

    let normal = Normal::new(0.0, 1.0).expect("unit normal parameters are valid");

    for j in 1..delta_j {
        let j_dist = (delta_j - j) as f64;
        let j_dist_plus = j_dist + 1.0;
        let aj = j_dist / j_dist_plus;
        let sigma = (two_lambda_tau * aj).sqrt();
        for d in 0..n_dimens {
            let r_j_star: f64 =
                (polymer[[n_slices - 1, d]] + j_dist * polymer[[j - 1, d]]) / j_dist_plus;
            polymer[[j, d]] = r_j_star + sigma * normal.sample(rng);
        }
    }
}

/// Samples the next bead of a staged bridge, one slice after `prev`, bound
/// for `end` which lies `links_to_end` further links ahead of the sampled
/// bead. This is the incremental form of [`levy_staging`], usable when the
/// bridge beads do not live in a contiguous row range.
///
/// `links_to_end` must be at least 1; with `links_to_end == 0` the sampled
/// bead would *be* the endpoint.
pub fn staging_position<R: Rng>(
    prev: ArrayView1<f64>,
    end: ArrayView1<f64>,
    links_to_end: usize,
    two_lambda_tau: f64,
    rng: &mut R,
) -> Array1<f64> {
    debug_assert!(links_to_end >= 1, "the endpoint is fixed, not sampled");
    let j_dist = links_to_end as f64;
    let j_dist_plus = j_dist + 1.0;
    let sigma = (two_lambda_tau * j_dist / j_dist_plus).sqrt();
    let normal = Normal::new(0.0, 1.0).expect("unit normal parameters are valid");
    prev.iter()
        .zip(&end)
        .map(|(&r_prev, &r_end)| {
            let r_star = (r_end + j_dist * r_prev) / j_dist_plus;
            r_star + sigma * normal.sample(rng)
        })
        .collect()
}

/// Samples a bisection midpoint between two fixed beads: Gaussian around
/// their midpoint with the given variance per dimension.
pub fn bisection_position<R: Rng>(
    left: ArrayView1<f64>,
    right: ArrayView1<f64>,
    sigma_sq: f64,
    rng: &mut R,
) -> Array1<f64> {
    let sigma = sigma_sq.sqrt();
    let normal = Normal::new(0.0, 1.0).expect("unit normal parameters are valid");
    left.iter()
        .zip(&right)
        .map(|(&l, &r)| 0.5 * (l + r) + sigma * normal.sample(rng))
        .collect()
}

/// Samples a free-particle step: Gaussian of variance `sigma_sq` per
/// dimension around `anchor`. Used to grow worm ends, where only one side
/// of the new bead is constrained.
pub fn free_particle_position<R: Rng>(
    anchor: ArrayView1<f64>,
    sigma_sq: f64,
    rng: &mut R,
) -> Array1<f64> {
    let sigma = sigma_sq.sqrt();
    let normal = Normal::new(0.0, 1.0).expect("unit normal parameters are valid");
    anchor.iter().map(|&a| a + sigma * normal.sample(rng)).collect()
}

/// Normalized free-particle propagator between two points, evaluated on the
/// nearest image: `exp(-|Δr|² / 2σ²) / (2πσ²)^{D/2}`.
pub fn free_propagator<'a, SP: Space>(
    space: &SP,
    r1: ArrayView1<'a, f64>,
    r2: ArrayView1<'a, f64>,
    sigma_sq: f64,
) -> f64 {
    let diff = space.difference(r1, r2);
    let dist_sq = diff.iter().map(|&d| d * d).sum::<f64>();
    let dims = space.spatial_dimensions() as f64;
    (-dist_sq / (2.0 * sigma_sq)).exp() / (2.0 * PI * sigma_sq).powf(0.5 * dims)
}

/// Enumerates every integer winding vector with components in
/// `[-max_wind, max_wind]` for the given dimensionality. With
/// `max_wind == 0` only the zero vector is produced.
pub fn winding_sectors(dimensions: usize, max_wind: i32) -> Vec<Array1<i32>> {
    let mut sectors = vec![Array1::zeros(dimensions)];
    for d in 0..dimensions {
        let mut extended = Vec::with_capacity(sectors.len() * (2 * max_wind as usize + 1));
        for sector in &sectors {
            for w in -max_wind..=max_wind {
                let mut s = sector.clone();
                s[d] = w;
                extended.push(s);
            }
        }
        sectors = extended;
    }
    sectors
}

/// Free-propagator weights of every winding image of `r_to` as seen from
/// `r_from` across `links` time steps. Returns the candidate sectors, the
/// running cumulative weights and the total normalization.
///
/// The normalization is exactly the periodic propagator truncated at
/// `max_wind`; open/close moves use it as the reverse-proposal density.
pub fn winding_cumulant<'a, SP: Space>(
    space: &SP,
    r_from: ArrayView1<'a, f64>,
    r_to: ArrayView1<'a, f64>,
    links: usize,
    two_lambda_tau: f64,
    max_wind: i32,
) -> (Vec<Array1<i32>>, Vec<f64>, f64) {
    let sigma_sq = two_lambda_tau * links as f64;
    let dims = space.spatial_dimensions() as f64;
    let norm_factor = (2.0 * PI * sigma_sq).powf(0.5 * dims);
    // Nearest-image displacement plus the image shift of each sector.
    let nearest = space.difference(r_to, r_from);
    let sectors = winding_sectors(space.spatial_dimensions(), max_wind);
    let mut cumulant = Vec::with_capacity(sectors.len());
    let mut total = 0.0;
    for sector in &sectors {
        let shift = space.image_shift(sector);
        let dist_sq = nearest
            .iter()
            .zip(&shift)
            .map(|(&n, &s)| (n + s) * (n + s))
            .sum::<f64>();
        total += (-dist_sq / (2.0 * sigma_sq)).exp() / norm_factor;
        cumulant.push(total);
    }
    (sectors, cumulant, total)
}

/// Samples a winding sector for a bridge from `r_from` to an image of `r_to`
/// across `links` time steps, with probability proportional to the
/// free-propagator weight of each image. Returns the sector together with
/// the total normalization over all candidate sectors.
pub fn sample_winding_sector<'a, SP: Space, R: Rng>(
    space: &SP,
    r_from: ArrayView1<'a, f64>,
    r_to: ArrayView1<'a, f64>,
    links: usize,
    two_lambda_tau: f64,
    max_wind: i32,
    rng: &mut R,
) -> (Array1<i32>, f64) {
    let (sectors, cumulant, total) =
        winding_cumulant(space, r_from, r_to, links, two_lambda_tau, max_wind);
    let u = rng.gen::<f64>() * total;
    let index = cumulant
        .iter()
        .position(|&c| c > u)
        .unwrap_or(sectors.len() - 1);
    let mut sectors = sectors;
    (sectors.swap_remove(index), total)
}

/// The displacement target for a staged bridge from `r_from` to the image
/// of `r_to` labelled by `sector`, expressed in the unwrapped coordinates
/// of `r_from`.
pub fn bridge_target<'a, SP: Space>(
    space: &SP,
    r_from: ArrayView1<'a, f64>,
    r_to: ArrayView1<'a, f64>,
    sector: ArrayView1<i32>,
) -> Array1<f64> {
    let nearest = space.difference(r_to, r_from);
    let shift = space.image_shift(sector);
    r_from
        .iter()
        .zip(&nearest)
        .zip(&shift)
        .map(|((&f, &n), &s)| f + n + s)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::free_space::FreeSpace;
    use crate::space::periodic_box::PeriodicBox;
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_levy_staging_keeps_endpoints() {
        let mut polymer =
            Array2::from_shape_vec((4, 2), vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, -3.0])
                .unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        levy_staging(&mut polymer, 0.5, &mut rng);
        assert_eq!(polymer.row(0).to_vec(), vec![0.0, 0.0]);
        assert_eq!(polymer.row(3).to_vec(), vec![3.0, -3.0]);
        assert_ne!(polymer.row(1).to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_levy_staging_deterministic_at_zero_variance() {
        // With two_lambda_tau = 0 the bridge collapses onto the straight line.
        let mut polymer =
            Array2::from_shape_vec((5, 1), vec![0.0, 9.0, 9.0, 9.0, 4.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        levy_staging(&mut polymer, 0.0, &mut rng);
        for j in 0..5 {
            assert!((polymer[[j, 0]] - j as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn test_staging_position_matches_straight_line_at_zero_variance() {
        let mut rng = StdRng::seed_from_u64(3);
        let prev = array![0.0, 0.0];
        let end = array![4.0, -4.0];
        // Three links to the end: the next bead is a quarter of the way.
        let pos = staging_position(prev.view(), end.view(), 3, 0.0, &mut rng);
        assert!((pos[0] - 1.0).abs() < 1e-12);
        assert!((pos[1] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bisection_position_midpoint_at_zero_variance() {
        let mut rng = StdRng::seed_from_u64(5);
        let pos = bisection_position(array![0.0, 2.0].view(), array![2.0, 0.0].view(), 0.0, &mut rng);
        assert!((pos[0] - 1.0).abs() < 1e-12);
        assert!((pos[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_free_propagator_normalization_in_one_dimension() {
        // Numerically integrate the 1D propagator over a wide interval.
        let space = FreeSpace::new(1);
        let sigma_sq = 0.3;
        let dx = 1e-3;
        let mut integral = 0.0;
        let origin = array![0.0];
        let mut x = -6.0;
        while x < 6.0 {
            integral += free_propagator(&space, array![x].view(), origin.view(), sigma_sq) * dx;
            x += dx;
        }
        assert!((integral - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_winding_sectors_count() {
        assert_eq!(winding_sectors(2, 0).len(), 1);
        assert_eq!(winding_sectors(2, 1).len(), 9);
        assert_eq!(winding_sectors(3, 1).len(), 27);
    }

    #[test]
    fn test_winding_cumulant_monotone_and_normalized() {
        let space = PeriodicBox::new(vec![1.0, 1.0]);
        let (sectors, cumulant, total) = winding_cumulant(
            &space,
            array![0.1, 0.2].view(),
            array![0.9, 0.3].view(),
            4,
            0.05,
            2,
        );
        assert_eq!(sectors.len(), 25);
        assert_eq!(cumulant.len(), 25);
        assert!(total > 0.0);
        for w in cumulant.windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert!((cumulant[24] - total).abs() < 1e-12 * total);
    }

    #[test]
    fn test_sample_winding_sector_free_space_is_zero() {
        let space = FreeSpace::new(3);
        let mut rng = StdRng::seed_from_u64(9);
        let (sector, total) = sample_winding_sector(
            &space,
            array![0.0, 0.0, 0.0].view(),
            array![1.0, 0.0, 0.0].view(),
            2,
            0.5,
            0,
            &mut rng,
        );
        assert_eq!(sector, array![0, 0, 0]);
        let expected = free_propagator(
            &space,
            array![0.0, 0.0, 0.0].view(),
            array![1.0, 0.0, 0.0].view(),
            1.0,
        );
        assert!((total - expected).abs() < 1e-14);
    }

    #[test]
    fn test_sample_winding_sector_prefers_near_image() {
        // Endpoints separated by nearly a full box length: with a narrow
        // propagator the wrapped image dominates the tower.
        let space = PeriodicBox::new(vec![1.0]);
        let mut rng = StdRng::seed_from_u64(17);
        let mut wrapped = 0usize;
        for _ in 0..200 {
            let (sector, _) = sample_winding_sector(
                &space,
                array![0.02].view(),
                array![0.98].view(),
                1,
                0.01,
                1,
                &mut rng,
            );
            if sector[0] != 0 {
                wrapped += 1;
            }
        }
        // difference() already reduces to the nearest image (-0.04), so the
        // zero sector holds the dominant weight.
        assert!(wrapped < 20);
    }

    #[test]
    fn test_bridge_target_unwraps_across_boundary() {
        let space = PeriodicBox::new(vec![1.0]);
        let target = bridge_target(
            &space,
            array![0.9].view(),
            array![0.1].view(),
            array![0].view(),
        );
        // Nearest image of 0.1 seen from 0.9 lies at 1.1, not 0.1.
        assert!((target[0] - 1.1).abs() < 1e-12);
        let target_wound = bridge_target(
            &space,
            array![0.9].view(),
            array![0.1].view(),
            array![1].view(),
        );
        assert!((target_wound[0] - 2.1).abs() < 1e-12);
    }
}
