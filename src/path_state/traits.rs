use super::bead::BeadLocator;
use super::sector::Sector;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Trait for querying the dimensional properties of worldlines.
pub trait WorldLineDimensions {
    /// Returns the number of storage rows in the system.
    fn particles(&self) -> usize;

    /// Returns the number of time slices in the system.
    fn time_slices(&self) -> usize;

    /// Returns the number of spatial dimensions.
    fn spatial_dimensions(&self) -> usize;
}

/// Trait for accessing and modifying bead positions.
pub trait WorldLinePositionAccess {
    /// Gets a view of the position of a bead.
    fn position(&self, bead: BeadLocator) -> ArrayView1<f64>;

    /// Sets the position of a bead from a slice.
    fn set_position(&mut self, bead: BeadLocator, position: &[f64]);

    /// Sets the position of a bead from an array view.
    fn assign_position(&mut self, bead: BeadLocator, position: ArrayView1<f64>);

    /// Gets a view of the positions of one row across a range of time slices.
    fn positions(&self, particle: usize, start_slice: usize, end_slice: usize) -> ArrayView2<f64>;

    /// Sets the positions of one row across a range of time slices.
    fn set_positions(
        &mut self,
        particle: usize,
        start_slice: usize,
        end_slice: usize,
        positions: &Array2<f64>,
    );
}

/// Trait for accessing the linked structure of beads in imaginary time.
///
/// Links define the worldlines: the bead following `(t, p)` in imaginary
/// time may live on a different row, which is how permutation cycles and
/// worm reconnections are represented. A missing link marks a worm end.
pub trait WorldLineLinkAccess {
    /// The bead following `bead` in imaginary time, if any.
    fn next(&self, bead: BeadLocator) -> Option<BeadLocator>;

    /// The bead preceding `bead` in imaginary time, if any.
    fn prev(&self, bead: BeadLocator) -> Option<BeadLocator>;

    /// Sets the forward link of a bead.
    fn set_next(&mut self, bead: BeadLocator, next: Option<BeadLocator>);

    /// Sets the backward link of a bead.
    fn set_prev(&mut self, bead: BeadLocator, prev: Option<BeadLocator>);

    /// Links `from` to `to`, updating both directions.
    fn link(&mut self, from: BeadLocator, to: BeadLocator) {
        self.set_next(from, Some(to));
        self.set_prev(to, Some(from));
    }
}

/// Trait for accessing and toggling bead status flags.
///
/// Inactive beads are storage slots left by removed worm segments; they keep
/// a stale position but take no part in the configuration.
pub trait WorldLineStatusAccess {
    fn is_active(&self, bead: BeadLocator) -> bool;

    fn set_active(&mut self, bead: BeadLocator, active: bool);

    /// Total number of active beads.
    fn active_beads(&self) -> usize;

    /// Rows holding an active bead at the given time slice.
    fn active_particles_at(&self, slice: usize) -> Vec<usize>;
}

/// Trait for accessing the worm state of the worldlines.
pub trait WorldLineWormAccess {
    /// Gets the worm head (the open end with no forward link), if present.
    fn worm_head(&self) -> Option<BeadLocator>;

    /// Gets the worm tail (the open end with no backward link), if present.
    fn worm_tail(&self) -> Option<BeadLocator>;

    /// Sets or clears the worm end markers. Head and tail must be both
    /// present or both absent.
    fn set_worm(&mut self, head: Option<BeadLocator>, tail: Option<BeadLocator>);

    /// Gets the sector of the worldlines.
    fn sector(&self) -> Sector;
}

/// Trait for growing and shrinking the bead arena by whole storage rows.
pub trait WorldLineGrowth {
    /// Appends a fresh row of inactive, unlinked beads; returns its index.
    fn add_particle(&mut self) -> usize;

    /// Drops all rows with index `>= particles`. Used to roll back row
    /// growth after a rejected attempt; the dropped rows must hold no
    /// active beads.
    fn truncate_particles(&mut self, particles: usize);
}

/// Umbrella trait with the full capability set the move engine needs,
/// plus link-walking helpers shared by the moves.
pub trait WormPath:
    WorldLineDimensions
    + WorldLinePositionAccess
    + WorldLineLinkAccess
    + WorldLineStatusAccess
    + WorldLineWormAccess
    + WorldLineGrowth
{
    /// Walks `steps` forward links from `bead`. `None` if a worm end is
    /// reached first.
    fn advance(&self, bead: BeadLocator, steps: usize) -> Option<BeadLocator> {
        let mut bead = bead;
        for _ in 0..steps {
            bead = self.next(bead)?;
        }
        Some(bead)
    }

    /// Walks `steps` backward links from `bead`. `None` if a worm end is
    /// reached first.
    fn retreat(&self, bead: BeadLocator, steps: usize) -> Option<BeadLocator> {
        let mut bead = bead;
        for _ in 0..steps {
            bead = self.prev(bead)?;
        }
        Some(bead)
    }

    /// Number of beads on the worm, walking backward from head to tail.
    /// `None` in the diagonal sector.
    ///
    /// # Panics
    /// Panics if the walk does not terminate at the tail within the arena
    /// size, which indicates a corrupted link structure.
    fn worm_bead_count(&self) -> Option<usize> {
        let head = self.worm_head()?;
        let tail = self.worm_tail()?;
        let bound = self.particles() * self.time_slices();
        let mut bead = head;
        let mut count = 1;
        while bead != tail {
            bead = self
                .prev(bead)
                .expect("worm walk reached a break before the tail");
            count += 1;
            assert!(count <= bound, "worm walk did not terminate: corrupted links");
        }
        Some(count)
    }

    /// A row with an inactive bead at the given slice, if any.
    fn free_slot(&self, slice: usize) -> Option<usize> {
        (0..self.particles()).find(|&p| !self.is_active(BeadLocator::new(slice, p)))
    }

    /// A locator for an inactive bead at the given slice, growing the arena
    /// by one row if every existing slot is occupied.
    fn ensure_slot(&mut self, slice: usize) -> BeadLocator {
        match self.free_slot(slice) {
            Some(p) => BeadLocator::new(slice, p),
            None => BeadLocator::new(slice, self.add_particle()),
        }
    }
}

impl<T> WormPath for T where
    T: WorldLineDimensions
        + WorldLinePositionAccess
        + WorldLineLinkAccess
        + WorldLineStatusAccess
        + WorldLineWormAccess
        + WorldLineGrowth
{
}
