pub mod traits;
pub mod uniform_system;
