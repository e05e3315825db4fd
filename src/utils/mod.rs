//! Dense buffer helpers shared by the attention code
pub mod math;
pub mod types;

pub use math::*;
pub use types::*;
