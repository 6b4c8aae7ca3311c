use super::bead::BeadLocator;
use super::sector::Sector;
use super::traits::{
    WorldLineDimensions, WorldLineGrowth, WorldLineLinkAccess, WorldLinePositionAccess,
    WorldLineStatusAccess, WorldLineWormAccess,
};
use ndarray::{arr1, s, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};

/// The worldline store: an arena of beads indexed by (row, time slice).
///
/// Positions, status flags and the prev/next links are kept in parallel
/// arrays, so a bead is addressed by a stable [`BeadLocator`] rather than a
/// pointer. Worldlines are defined purely by the links: the forward link of
/// the bead at the last slice wraps to slice zero, possibly on a different
/// row, which is how permutation cycles appear. At most one worm exists at
/// a time; its two free ends are tracked by the `head`/`tail` markers.
///
/// # Example
/// ```
/// use pimc_worm::path_state::worldlines::WorldLines;
/// use pimc_worm::path_state::bead::BeadLocator;
/// use pimc_worm::path_state::traits::*;
///
/// // 2 particles, 4 time slices, 3D space, initialized as closed loops.
/// let mut world = WorldLines::new(2, 4, 3);
/// world.set_position(BeadLocator::new(0, 0), &[1.0, 2.0, 3.0]);
/// assert_eq!(world.position(BeadLocator::new(0, 0)).to_vec(), vec![1.0, 2.0, 3.0]);
/// assert_eq!(world.next(BeadLocator::new(3, 0)), Some(BeadLocator::new(0, 0)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldLines {
    /// Bead coordinates, shape (rows, time slices, spatial dimensions).
    positions: Array3<f64>,
    /// Forward links in imaginary time, shape (rows, time slices).
    next: Array2<Option<BeadLocator>>,
    /// Backward links in imaginary time, shape (rows, time slices).
    prev: Array2<Option<BeadLocator>>,
    /// Bead status flags, shape (rows, time slices).
    active: Array2<bool>,
    /// The worm head, if the configuration is off-diagonal.
    head: Option<BeadLocator>,
    /// The worm tail, if the configuration is off-diagonal.
    tail: Option<BeadLocator>,
}

impl WorldLines {
    /// Creates a store of `particles` closed worldlines with `time_slices`
    /// beads each, all positions at the origin.
    ///
    /// # Panics
    /// Panics if any dimension is zero.
    pub fn new(particles: usize, time_slices: usize, dimensions: usize) -> Self {
        assert!(particles > 0, "Need at least one particle row");
        assert!(time_slices > 1, "Need at least two time slices");
        assert!(dimensions > 0, "Need at least one spatial dimension");
        let mut next = Array2::from_elem((particles, time_slices), None);
        let mut prev = Array2::from_elem((particles, time_slices), None);
        for p in 0..particles {
            for t in 0..time_slices {
                next[[p, t]] = Some(BeadLocator::new((t + 1) % time_slices, p));
                prev[[p, t]] = Some(BeadLocator::new((t + time_slices - 1) % time_slices, p));
            }
        }
        Self {
            positions: Array3::zeros((particles, time_slices, dimensions)),
            next,
            prev,
            active: Array2::from_elem((particles, time_slices), true),
            head: None,
            tail: None,
        }
    }

    /// Initializes all slices of each row to the same position vector,
    /// generated by the input function.
    ///
    /// # Panics
    /// Panics if a generated position does not match the spatial dimension.
    pub fn initialize_positions<F>(&mut self, position_generator: F)
    where
        F: Fn(usize) -> Vec<f64>,
    {
        for particle in 0..self.particles() {
            let position = position_generator(particle);
            assert_eq!(
                position.len(),
                self.spatial_dimensions(),
                "Generated position length mismatch: expected={}, got={}",
                self.spatial_dimensions(),
                position.len()
            );
            for slice in 0..self.time_slices() {
                self.set_position(BeadLocator::new(slice, particle), &position);
            }
        }
    }

    /// Checks the store's structural invariants: reciprocal links, links
    /// touching only active beads, head/tail markers matching the actual
    /// breaks in the link structure, and both worm markers present or
    /// absent together.
    ///
    /// This is the fatal-defect detector: a `false` return after an undo
    /// means the engine corrupted the configuration, and no statistically
    /// valid continuation is possible.
    pub fn is_consistent(&self) -> bool {
        if self.head.is_some() != self.tail.is_some() {
            return false;
        }
        let mut heads = Vec::new();
        let mut tails = Vec::new();
        for p in 0..self.particles() {
            for t in 0..self.time_slices() {
                let bead = BeadLocator::new(t, p);
                if !self.is_active(bead) {
                    if self.next(bead).is_some() || self.prev(bead).is_some() {
                        return false;
                    }
                    continue;
                }
                match self.next(bead) {
                    Some(n) => {
                        if !self.is_active(n) || self.prev(n) != Some(bead) {
                            return false;
                        }
                    }
                    None => heads.push(bead),
                }
                match self.prev(bead) {
                    Some(q) => {
                        if !self.is_active(q) || self.next(q) != Some(bead) {
                            return false;
                        }
                    }
                    None => tails.push(bead),
                }
            }
        }
        match (self.head, self.tail) {
            (Some(h), Some(t)) => heads == vec![h] && tails == vec![t],
            (None, None) => heads.is_empty() && tails.is_empty(),
            _ => false,
        }
    }

    /// Saves the store to a file in JSON format.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, filename: &str) -> io::Result<()> {
        let file = File::create(filename)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, &self)?;
        Ok(())
    }

    /// Loads a store from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load_from_file(filename: &str) -> io::Result<Self> {
        let file = File::open(filename)?;
        let reader = BufReader::new(file);
        let world_lines = serde_json::from_reader(reader)?;
        Ok(world_lines)
    }

    fn check_bounds(&self, bead: BeadLocator) {
        debug_assert!(
            bead.particle < self.particles(),
            "Particle index out of bounds: particle={}, max allowed={}",
            bead.particle,
            self.particles() - 1
        );
        debug_assert!(
            bead.slice < self.time_slices(),
            "Time slice index out of bounds: time_slice={}, max allowed={}",
            bead.slice,
            self.time_slices() - 1
        );
    }
}

impl WorldLineDimensions for WorldLines {
    fn particles(&self) -> usize {
        self.positions.len_of(Axis(0))
    }

    fn time_slices(&self) -> usize {
        self.positions.len_of(Axis(1))
    }

    fn spatial_dimensions(&self) -> usize {
        self.positions.len_of(Axis(2))
    }
}

impl WorldLinePositionAccess for WorldLines {
    fn position(&self, bead: BeadLocator) -> ArrayView1<f64> {
        self.check_bounds(bead);
        self.positions.slice(s![bead.particle, bead.slice, ..])
    }

    fn set_position(&mut self, bead: BeadLocator, position: &[f64]) {
        self.check_bounds(bead);
        assert_eq!(
            position.len(),
            self.spatial_dimensions(),
            "Position length mismatch: expected={}, got={}",
            self.spatial_dimensions(),
            position.len()
        );
        self.positions
            .slice_mut(s![bead.particle, bead.slice, ..])
            .assign(&arr1(position));
    }

    fn assign_position(&mut self, bead: BeadLocator, position: ArrayView1<f64>) {
        self.check_bounds(bead);
        self.positions
            .slice_mut(s![bead.particle, bead.slice, ..])
            .assign(&position);
    }

    fn positions(&self, particle: usize, start_slice: usize, end_slice: usize) -> ArrayView2<f64> {
        assert!(
            start_slice < end_slice && end_slice <= self.time_slices(),
            "Invalid slice range {}..{}",
            start_slice,
            end_slice
        );
        self.positions
            .slice(s![particle, start_slice..end_slice, ..])
    }

    fn set_positions(
        &mut self,
        particle: usize,
        start_slice: usize,
        end_slice: usize,
        positions: &Array2<f64>,
    ) {
        assert!(
            start_slice < end_slice && end_slice <= self.time_slices(),
            "Invalid slice range {}..{}",
            start_slice,
            end_slice
        );
        assert_eq!(
            positions.shape(),
            &[end_slice - start_slice, self.spatial_dimensions()],
            "Input positions shape mismatch"
        );
        self.positions
            .slice_mut(s![particle, start_slice..end_slice, ..])
            .assign(positions);
    }
}

impl WorldLineLinkAccess for WorldLines {
    fn next(&self, bead: BeadLocator) -> Option<BeadLocator> {
        self.check_bounds(bead);
        self.next[[bead.particle, bead.slice]]
    }

    fn prev(&self, bead: BeadLocator) -> Option<BeadLocator> {
        self.check_bounds(bead);
        self.prev[[bead.particle, bead.slice]]
    }

    fn set_next(&mut self, bead: BeadLocator, next: Option<BeadLocator>) {
        self.check_bounds(bead);
        self.next[[bead.particle, bead.slice]] = next;
    }

    fn set_prev(&mut self, bead: BeadLocator, prev: Option<BeadLocator>) {
        self.check_bounds(bead);
        self.prev[[bead.particle, bead.slice]] = prev;
    }
}

impl WorldLineStatusAccess for WorldLines {
    fn is_active(&self, bead: BeadLocator) -> bool {
        self.check_bounds(bead);
        self.active[[bead.particle, bead.slice]]
    }

    fn set_active(&mut self, bead: BeadLocator, active: bool) {
        self.check_bounds(bead);
        self.active[[bead.particle, bead.slice]] = active;
    }

    fn active_beads(&self) -> usize {
        self.active.iter().filter(|&&on| on).count()
    }

    fn active_particles_at(&self, slice: usize) -> Vec<usize> {
        (0..self.particles())
            .filter(|&p| self.active[[p, slice]])
            .collect()
    }
}

impl WorldLineWormAccess for WorldLines {
    fn worm_head(&self) -> Option<BeadLocator> {
        self.head
    }

    fn worm_tail(&self) -> Option<BeadLocator> {
        self.tail
    }

    fn set_worm(&mut self, head: Option<BeadLocator>, tail: Option<BeadLocator>) {
        assert_eq!(
            head.is_some(),
            tail.is_some(),
            "Worm head and tail must be set or cleared together"
        );
        self.head = head;
        self.tail = tail;
    }

    fn sector(&self) -> Sector {
        if self.head.is_some() {
            Sector::G
        } else {
            Sector::Z
        }
    }
}

impl WorldLineGrowth for WorldLines {
    fn add_particle(&mut self) -> usize {
        let slices = self.time_slices();
        let dims = self.spatial_dimensions();
        self.positions
            .push(Axis(0), Array2::<f64>::zeros((slices, dims)).view())
            .expect("new row matches the store shape");
        self.next
            .push_row(ndarray::Array1::from_elem(slices, None).view())
            .expect("new row matches the store shape");
        self.prev
            .push_row(ndarray::Array1::from_elem(slices, None).view())
            .expect("new row matches the store shape");
        self.active
            .push_row(ndarray::Array1::from_elem(slices, false).view())
            .expect("new row matches the store shape");
        self.particles() - 1
    }

    fn truncate_particles(&mut self, particles: usize) {
        if particles >= self.particles() {
            return;
        }
        debug_assert!(
            !self
                .active
                .slice(s![particles.., ..])
                .iter()
                .any(|&on| on),
            "Truncated rows must hold no active beads"
        );
        self.positions = self.positions.slice(s![..particles, .., ..]).to_owned();
        self.next = self.next.slice(s![..particles, ..]).to_owned();
        self.prev = self.prev.slice(s![..particles, ..]).to_owned();
        self.active = self.active.slice(s![..particles, ..]).to_owned();
    }
}
