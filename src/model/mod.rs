//! Attention model components

mod attention;
mod config;
mod error;
mod init;

pub use attention::{AttentionBlock, AttentionHead, ForwardSnapshot, SnapshotArena};
pub use config::ModelInfo;
pub use error::ModelError;
pub use init::Initializer;
