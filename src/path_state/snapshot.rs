use super::bead::BeadLocator;
use super::traits::WormPath;
use ndarray::Array1;
use std::collections::BTreeMap;

/// The saved state of one bead: position, status flag and both links.
#[derive(Debug, Clone, PartialEq)]
struct BeadRecord {
    position: Array1<f64>,
    active: bool,
    next: Option<BeadLocator>,
    prev: Option<BeadLocator>,
}

/// A rollback snapshot of the beads a move is about to perturb.
///
/// A move captures the worm markers and arena size up front, then records
/// each bead *before* touching it. If the attempt is rejected, `restore`
/// replays the records and truncates any rows grown during the attempt,
/// returning the store bit-for-bit to its pre-attempt state. Keeping an
/// accepted move is simply dropping the snapshot.
///
/// Recording is idempotent: only the first record of a locator is kept, so
/// a move may re-record a bead it touches twice without losing the original
/// state.
#[derive(Debug)]
pub struct PathSnapshot {
    particles: usize,
    head: Option<BeadLocator>,
    tail: Option<BeadLocator>,
    records: BTreeMap<BeadLocator, BeadRecord>,
}

impl PathSnapshot {
    /// Captures the worm markers and the current arena size.
    pub fn capture<W: WormPath>(path: &W) -> Self {
        Self {
            particles: path.particles(),
            head: path.worm_head(),
            tail: path.worm_tail(),
            records: BTreeMap::new(),
        }
    }

    /// Records the current state of `bead` unless already recorded.
    pub fn record<W: WormPath>(&mut self, path: &W, bead: BeadLocator) {
        self.records.entry(bead).or_insert_with(|| BeadRecord {
            position: path.position(bead).to_owned(),
            active: path.is_active(bead),
            next: path.next(bead),
            prev: path.prev(bead),
        });
    }

    /// Number of beads recorded so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Restores every recorded bead, drops rows grown since the capture and
    /// resets the worm markers.
    pub fn restore<W: WormPath>(self, path: &mut W) {
        path.truncate_particles(self.particles);
        for (bead, record) in &self.records {
            // Records taken in rows that were grown during the attempt are
            // gone with the truncation.
            if bead.particle >= self.particles {
                continue;
            }
            path.assign_position(*bead, record.position.view());
            path.set_active(*bead, record.active);
            path.set_next(*bead, record.next);
            path.set_prev(*bead, record.prev);
        }
        path.set_worm(self.head, self.tail);
    }
}
