use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rayon::prelude::*;

use super::head::AttentionHead;
use super::snapshot::{ForwardSnapshot, SnapshotArena};
use crate::model::{Initializer, ModelError, ModelInfo};
use crate::utils::{add_assign, HeadId};

/// `head_count` independent heads whose deltas are summed.
///
/// Heads run in parallel into private buffers; the sum is taken afterwards on
/// one thread in head order, so repeated calls are bit-identical.
#[derive(Debug, Clone)]
pub struct AttentionBlock {
    info: ModelInfo,
    heads: Vec<AttentionHead>,
}

impl AttentionBlock {
    pub fn new(info: ModelInfo, initializer: Initializer) -> Result<Self, ModelError> {
        Self::with_rng(info, initializer, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        info: ModelInfo,
        initializer: Initializer,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let heads = (0..info.head_count())
            .map(|_| AttentionHead::with_rng(info, initializer, rng))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "attention block: head_count={} embedding_dim={} key_query_dim={} context_size={}",
            info.head_count(),
            info.embedding_dim(),
            info.key_query_dim(),
            info.context_size()
        );
        Ok(Self { info, heads })
    }

    /// Assembles a block from heads built elsewhere.
    pub fn from_heads(info: ModelInfo, heads: Vec<AttentionHead>) -> Result<Self, ModelError> {
        if heads.len() != info.head_count() {
            return Err(ModelError::dimension_mismatch(
                "attention heads",
                &[info.head_count()],
                &[heads.len()],
            ));
        }

        let expected = [info.embedding_dim(), info.key_query_dim(), info.context_size()];
        for head in &heads {
            let head_info = head.info();
            let actual = [
                head_info.embedding_dim(),
                head_info.key_query_dim(),
                head_info.context_size(),
            ];
            if actual != expected {
                return Err(ModelError::dimension_mismatch(
                    "attention head config",
                    &expected,
                    &actual,
                ));
            }
        }
        Ok(Self { info, heads })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn head_count(&self) -> usize {
        self.heads.len()
    }

    pub fn heads(&self) -> &[AttentionHead] {
        &self.heads
    }

    /// Mutable access for an optimizer; the slice keeps the head count fixed.
    pub fn heads_mut(&mut self) -> &mut [AttentionHead] {
        &mut self.heads
    }

    pub fn head(&self, id: HeadId) -> Result<&AttentionHead, ModelError> {
        let len = self.heads.len();
        self.heads.get(id).ok_or(ModelError::IndexOutOfRange {
            context: "attention heads",
            index: id,
            len,
        })
    }

    pub fn head_mut(&mut self, id: HeadId) -> Result<&mut AttentionHead, ModelError> {
        let len = self.heads.len();
        self.heads.get_mut(id).ok_or(ModelError::IndexOutOfRange {
            context: "attention heads",
            index: id,
            len,
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.heads.iter().map(AttentionHead::parameter_count).sum()
    }

    /// An arena with one snapshot slot per head of this block.
    pub fn snapshot_arena(&self) -> SnapshotArena {
        SnapshotArena::new(&self.info)
    }

    pub fn reinitialize<R: Rng + ?Sized>(
        &mut self,
        initializer: Initializer,
        rng: &mut R,
    ) -> Result<(), ModelError> {
        for head in &mut self.heads {
            head.reinitialize(initializer, rng)?;
        }
        Ok(())
    }

    /// Sum of every head's delta for `input` [sequence_length, embedding_dim].
    pub fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        let len = self.info.validate_input(&input)?;
        log::trace!(
            "attention block forward: sequence_length={} heads={}",
            len,
            self.heads.len()
        );

        let deltas = self
            .heads
            .par_iter()
            .map(|head| {
                let mut scratch = ForwardSnapshot::with_capacity(&self.info, len);
                head.run(input, &mut scratch)
            })
            .collect::<Result<Vec<_>, _>>()?;

        sum_deltas(input, &deltas)
    }

    /// Same result as [`forward`](Self::forward); head `h` records its
    /// intermediates into slot `h` of `arena`.
    pub fn forward_recorded(
        &self,
        input: ArrayView2<f32>,
        arena: &mut SnapshotArena,
    ) -> Result<Array2<f32>, ModelError> {
        let len = self.info.validate_input(&input)?;
        if arena.len() != self.heads.len() {
            return Err(ModelError::dimension_mismatch(
                "snapshot arena",
                &[self.heads.len()],
                &[arena.len()],
            ));
        }
        for (head, snapshot) in self.heads.iter().zip(arena.iter()) {
            snapshot.check_compatible(head.info(), len)?;
        }

        let deltas = self
            .heads
            .par_iter()
            .zip(arena.snapshots_mut().par_iter_mut())
            .map(|(head, snapshot)| head.run(input, snapshot))
            .collect::<Result<Vec<_>, _>>()?;

        sum_deltas(input, &deltas)
    }

    /// Adds this block's delta to `residual` in place.
    pub fn apply(&self, residual: &mut Array2<f32>) -> Result<(), ModelError> {
        let delta = self.forward(residual.view())?;
        add_assign(residual.view_mut(), delta.view())?;
        Ok(())
    }
}

/// Sums per-head deltas on the calling thread, in head order.
fn sum_deltas(
    input: ArrayView2<f32>,
    deltas: &[Array2<f32>],
) -> Result<Array2<f32>, ModelError> {
    let mut total = Array2::zeros(input.raw_dim());
    for delta in deltas {
        add_assign(total.view_mut(), delta.view())?;
    }
    Ok(total)
}
