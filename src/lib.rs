pub mod model;
pub use model::{
    AttentionBlock, AttentionHead, ForwardSnapshot, Initializer, ModelError, ModelInfo,
    SnapshotArena,
};

pub mod utils;
pub use utils::{HeadId, HeadWeights, MathError, Matrix, Vector};

pub mod error;
pub use error::TinyGptError;
