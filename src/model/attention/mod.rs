//! Causal self-attention heads and their multi-head aggregation
mod head;
pub use head::AttentionHead;

mod multihead;
pub use multihead::AttentionBlock;

mod snapshot;
pub use snapshot::{ForwardSnapshot, SnapshotArena};
