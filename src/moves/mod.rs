pub mod advance_recede;
pub mod bisection;
pub mod catalog;
pub mod displace;
pub mod insert_remove;
pub mod move_base;
pub mod open_close;
pub mod sampling;
pub mod staging;
pub mod swap;
