//! Reusable buffers that record the intermediates of a forward pass.
//!
//! A backward pass needs the per-token projections and the attention weights
//! a head produced. Buffers are sized for the full context window once and
//! reused across passes; accessors only expose the rows that were written by
//! the most recent recording.

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

use crate::model::{ModelError, ModelInfo};
use crate::utils::HeadId;

/// Intermediates of one head's forward pass.
#[derive(Debug, Clone)]
pub struct ForwardSnapshot {
    sequence_length: usize,
    query: Array2<f32>,      // [capacity, key_query_dim]
    key: Array2<f32>,        // [capacity, key_query_dim]
    value_down: Array2<f32>, // [capacity, key_query_dim]
    value: Array2<f32>,      // [capacity, embedding_dim]
    attention: Array2<f32>,  // [capacity, capacity]
}

/// Mutable views over the first `len` rows of every snapshot buffer.
pub(crate) struct ScratchBuffers<'a> {
    pub query: ArrayViewMut2<'a, f32>,
    pub key: ArrayViewMut2<'a, f32>,
    pub value_down: ArrayViewMut2<'a, f32>,
    pub value: ArrayViewMut2<'a, f32>,
    pub attention: ArrayViewMut2<'a, f32>,
}

impl ForwardSnapshot {
    /// Allocates buffers able to record any sequence up to `info.context_size()`.
    pub fn new(info: &ModelInfo) -> Self {
        Self::with_capacity(info, info.context_size())
    }

    pub(crate) fn with_capacity(info: &ModelInfo, capacity: usize) -> Self {
        let (kq, d) = (info.key_query_dim(), info.embedding_dim());
        Self {
            sequence_length: 0,
            query: Array2::zeros((capacity, kq)),
            key: Array2::zeros((capacity, kq)),
            value_down: Array2::zeros((capacity, kq)),
            value: Array2::zeros((capacity, d)),
            attention: Array2::zeros((capacity, capacity)),
        }
    }

    /// Sequence length of the last recorded pass, 0 if nothing is recorded.
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_length == 0
    }

    /// Longest sequence these buffers can hold.
    pub fn capacity(&self) -> usize {
        self.attention.nrows()
    }

    /// `query[t]` for every recorded token, [sequence_length, key_query_dim]
    pub fn query(&self) -> ArrayView2<'_, f32> {
        self.query.slice(s![..self.sequence_length, ..])
    }

    pub fn key(&self) -> ArrayView2<'_, f32> {
        self.key.slice(s![..self.sequence_length, ..])
    }

    /// Bottleneck activations feeding the value up-projection.
    pub fn value_down(&self) -> ArrayView2<'_, f32> {
        self.value_down.slice(s![..self.sequence_length, ..])
    }

    pub fn value(&self) -> ArrayView2<'_, f32> {
        self.value.slice(s![..self.sequence_length, ..])
    }

    /// Attention weights `w[i][j]`, [sequence_length, sequence_length]
    pub fn attention(&self) -> ArrayView2<'_, f32> {
        self.attention
            .slice(s![..self.sequence_length, ..self.sequence_length])
    }

    /// Zeroes every buffer and forgets the recorded length.
    pub fn reset(&mut self) {
        self.sequence_length = 0;
        self.query.fill(0.0);
        self.key.fill(0.0);
        self.value_down.fill(0.0);
        self.value.fill(0.0);
        self.attention.fill(0.0);
    }

    /// Fails unless a head built for `info` can record `len` tokens here.
    pub(crate) fn check_compatible(&self, info: &ModelInfo, len: usize) -> Result<(), ModelError> {
        let expected = [info.key_query_dim(), info.embedding_dim()];
        let actual = [self.query.ncols(), self.value.ncols()];
        if expected != actual {
            return Err(ModelError::dimension_mismatch(
                "forward snapshot",
                &expected,
                &actual,
            ));
        }
        if len > self.capacity() {
            return Err(ModelError::dimension_mismatch(
                "forward snapshot capacity",
                &[len],
                &[self.capacity()],
            ));
        }
        Ok(())
    }

    /// Marks `len` rows as recorded and hands out views over them.
    pub(crate) fn buffers_mut(&mut self, len: usize) -> ScratchBuffers<'_> {
        self.sequence_length = len;
        ScratchBuffers {
            query: self.query.slice_mut(s![..len, ..]),
            key: self.key.slice_mut(s![..len, ..]),
            value_down: self.value_down.slice_mut(s![..len, ..]),
            value: self.value.slice_mut(s![..len, ..]),
            attention: self.attention.slice_mut(s![..len, ..len]),
        }
    }
}

/// One [`ForwardSnapshot`] per head of a block, indexed by [`HeadId`].
///
/// Allocated once per block and reset between passes instead of being
/// rebuilt on every call.
#[derive(Debug, Clone)]
pub struct SnapshotArena {
    snapshots: Vec<ForwardSnapshot>,
}

impl SnapshotArena {
    pub fn new(info: &ModelInfo) -> Self {
        Self {
            snapshots: (0..info.head_count())
                .map(|_| ForwardSnapshot::new(info))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, head: HeadId) -> Result<&ForwardSnapshot, ModelError> {
        self.snapshots
            .get(head)
            .ok_or(ModelError::IndexOutOfRange {
                context: "snapshot arena",
                index: head,
                len: self.snapshots.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForwardSnapshot> {
        self.snapshots.iter()
    }

    pub fn reset_all(&mut self) {
        for snapshot in &mut self.snapshots {
            snapshot.reset();
        }
    }

    pub(crate) fn snapshots_mut(&mut self) -> &mut [ForwardSnapshot] {
        &mut self.snapshots
    }
}
