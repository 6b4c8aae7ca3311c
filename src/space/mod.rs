pub mod free_space;
pub mod periodic_box;
pub mod traits;
