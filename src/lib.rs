//! Worm-algorithm Path Integral Monte Carlo building blocks.
//!
//! The crate provides the worldline data model (an arena of beads indexed
//! by time slice and storage row, linked into closed loops and at most one
//! open worm), the spatial geometries, the action interface the moves
//! evaluate differences of, and the full catalog of Monte Carlo moves with
//! transactional accept/reject semantics.

pub mod action;
pub mod moves;
pub mod path_state;
pub mod space;
pub mod system;
