pub mod primitive;
pub mod traits;
