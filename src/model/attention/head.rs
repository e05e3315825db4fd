use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut2, Zip};
use rand::Rng;

use super::snapshot::{ForwardSnapshot, ScratchBuffers};
use crate::model::{Initializer, ModelError, ModelInfo};
use crate::utils::{
    apply_causal_mask, dot, matvec_into, row, softmax_rows, HeadWeights, MathError,
};

/// One causal self-attention head.
///
/// Projects every token into query/key space, computes a low-rank value
/// (`value_up · (value_down · x)`), and returns for each token the
/// attention-weighted sum of the values of itself and earlier tokens. The
/// result is a delta for the residual stream; the head never touches its input.
#[derive(Debug, Clone)]
pub struct AttentionHead {
    info: ModelInfo,
    weights: HeadWeights<Array2<f32>>,
}

impl AttentionHead {
    /// Builds a head with freshly initialized weights.
    pub fn new(info: ModelInfo, initializer: Initializer) -> Result<Self, ModelError> {
        Self::with_rng(info, initializer, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        info: ModelInfo,
        initializer: Initializer,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let (kq, d) = (info.key_query_dim(), info.embedding_dim());
        let mut weights = HeadWeights {
            query: Array2::zeros((kq, d)),
            key: Array2::zeros((kq, d)),
            value_down: Array2::zeros((kq, d)),
            value_up: Array2::zeros((d, kq)),
        };
        for matrix in weights.iter_mut() {
            initializer.initialize_with(matrix, rng)?;
        }

        log::debug!(
            "attention head: embedding_dim={} key_query_dim={} initializer={:?}",
            d,
            kq,
            initializer
        );
        Ok(Self { info, weights })
    }

    /// Adopts existing weights after checking every shape against `info`.
    pub fn from_weights(
        info: ModelInfo,
        weights: HeadWeights<Array2<f32>>,
    ) -> Result<Self, ModelError> {
        let (kq, d) = (info.key_query_dim(), info.embedding_dim());
        let expected = [
            ("query weights", (kq, d)),
            ("key weights", (kq, d)),
            ("value down weights", (kq, d)),
            ("value up weights", (d, kq)),
        ];
        for ((context, (rows, cols)), matrix) in expected.into_iter().zip(weights.iter()) {
            if matrix.dim() != (rows, cols) {
                return Err(ModelError::dimension_mismatch(
                    context,
                    &[rows, cols],
                    matrix.shape(),
                ));
            }
        }
        Ok(Self { info, weights })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn weights(&self) -> &HeadWeights<Array2<f32>> {
        &self.weights
    }

    /// Scoped mutable access for an optimizer step.
    ///
    /// Views cannot be reshaped, so the head's shape invariants survive any
    /// update made through them.
    pub fn weights_mut(&mut self) -> HeadWeights<ArrayViewMut2<'_, f32>> {
        self.weights.view_mut()
    }

    pub fn query_weights(&self) -> ArrayView2<'_, f32> {
        self.weights.query.view()
    }

    pub fn key_weights(&self) -> ArrayView2<'_, f32> {
        self.weights.key.view()
    }

    pub fn value_down_weights(&self) -> ArrayView2<'_, f32> {
        self.weights.value_down.view()
    }

    pub fn value_up_weights(&self) -> ArrayView2<'_, f32> {
        self.weights.value_up.view()
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.iter().map(|m| m.len()).sum()
    }

    /// Refills all four matrices, e.g. when a training run is reset.
    pub fn reinitialize<R: Rng + ?Sized>(
        &mut self,
        initializer: Initializer,
        rng: &mut R,
    ) -> Result<(), ModelError> {
        for matrix in self.weights.iter_mut() {
            initializer.initialize_with(matrix, rng)?;
        }
        Ok(())
    }

    /// Computes this head's delta for `input` [sequence_length, embedding_dim].
    pub fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        let len = self.info.validate_input(&input)?;
        let mut scratch = ForwardSnapshot::with_capacity(&self.info, len);
        self.run(input, &mut scratch)
    }

    /// Same result as [`forward`](Self::forward), additionally recording the
    /// projections and attention weights into `snapshot`.
    pub fn forward_recorded(
        &self,
        input: ArrayView2<f32>,
        snapshot: &mut ForwardSnapshot,
    ) -> Result<Array2<f32>, ModelError> {
        let len = self.info.validate_input(&input)?;
        snapshot.check_compatible(&self.info, len)?;
        self.run(input, snapshot)
    }

    /// Forward pass over an input that has already been validated.
    pub(crate) fn run(
        &self,
        input: ArrayView2<f32>,
        snapshot: &mut ForwardSnapshot,
    ) -> Result<Array2<f32>, ModelError> {
        let mut delta = Array2::zeros(input.raw_dim());
        self.compute(input, snapshot.buffers_mut(input.nrows()), delta.view_mut())?;
        Ok(delta)
    }

    fn compute(
        &self,
        input: ArrayView2<f32>,
        scratch: ScratchBuffers<'_>,
        mut delta: ArrayViewMut2<f32>,
    ) -> Result<(), MathError> {
        let ScratchBuffers {
            mut query,
            mut key,
            mut value_down,
            mut value,
            mut attention,
        } = scratch;
        let w = &self.weights;
        log::trace!("attention head forward: sequence_length={}", input.nrows());

        // Per-token projections; every token only writes its own rows.
        let projected = Zip::from(input.rows())
            .and(query.rows_mut())
            .and(key.rows_mut())
            .and(value_down.rows_mut())
            .and(value.rows_mut())
            .par_map_collect(|x, q, k, mut vd, v| -> Result<(), MathError> {
                matvec_into(w.query.view(), x, q)?;
                matvec_into(w.key.view(), x, k)?;
                // Two sequential products through the bottleneck; value_down is kept.
                matvec_into(w.value_down.view(), x, vd.view_mut())?;
                matvec_into(w.value_up.view(), vd.view(), v)
            });
        first_error(projected)?;

        let scale = (self.info.key_query_dim() as f32).sqrt();
        let (query, key, value) = (query.view(), key.view(), value.view());

        // Scores for j <= i, one query row per task.
        let scored = Zip::indexed(attention.rows_mut()).par_map_collect(
            |i, mut scores| -> Result<(), MathError> {
                let q = row(query, i)?;
                for (j, score) in scores.iter_mut().enumerate().take(i + 1) {
                    *score = dot(q, row(key, j)?)? / scale;
                }
                Ok(())
            },
        );
        first_error(scored)?;

        apply_causal_mask(attention.view_mut());
        let degenerate = softmax_rows(attention.view_mut());
        if degenerate > 0 {
            log::warn!("{} attention rows had no usable score", degenerate);
        }

        // Weighted value sums over the visible positions.
        Zip::indexed(attention.rows())
            .and(delta.rows_mut())
            .par_for_each(|i, weights, mut out| {
                for (j, &weight) in weights.iter().enumerate().take(i + 1) {
                    out.scaled_add(weight, &value.row(j));
                }
            });
        Ok(())
    }
}

fn first_error(results: Array1<Result<(), MathError>>) -> Result<(), MathError> {
    results.iter().cloned().collect()
}
