pub mod bead;
pub mod sector;
pub mod snapshot;
pub mod traits;
pub mod worldlines;
