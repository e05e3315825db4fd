//! Weight initialization policies

use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::{Normal, Uniform};

use super::error::ModelError;

/// How a weight matrix is filled at build time (and on reset).
///
/// `fan_in` is the column count and `fan_out` the row count, since weights
/// multiply column vectors (`W · x`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Zeros,
    Constant(f32),
    Uniform { low: f32, high: f32 },
    Normal { std_dev: f32 },
    /// Normal(0, sqrt(2 / fan_in))
    He,
    /// Uniform(-l, l) with l = sqrt(6 / (fan_in + fan_out))
    Xavier,
}

impl Default for Initializer {
    fn default() -> Self {
        Self::Normal { std_dev: 0.02 }
    }
}

impl Initializer {
    /// Fills `matrix` in place using the thread-local RNG.
    pub fn initialize(&self, matrix: &mut Array2<f32>) -> Result<(), ModelError> {
        self.initialize_with(matrix, &mut rand::thread_rng())
    }

    /// Fills `matrix` in place from `rng`, for reproducible builds.
    pub fn initialize_with<R: Rng + ?Sized>(
        &self,
        matrix: &mut Array2<f32>,
        rng: &mut R,
    ) -> Result<(), ModelError> {
        if matrix.is_empty() {
            return Ok(());
        }
        let (fan_out, fan_in) = matrix.dim();

        match *self {
            Initializer::Zeros => matrix.fill(0.0),
            Initializer::Constant(value) => matrix.fill(value),
            Initializer::Uniform { low, high } => fill_uniform(matrix, low, high, rng)?,
            Initializer::Normal { std_dev } => fill_normal(matrix, std_dev, rng)?,
            Initializer::He => {
                let std_dev = (2.0 / fan_in as f32).sqrt();
                fill_normal(matrix, std_dev, rng)?;
            }
            Initializer::Xavier => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                fill_uniform(matrix, -limit, limit, rng)?;
            }
        }
        Ok(())
    }
}

fn fill_uniform<R: Rng + ?Sized>(
    matrix: &mut Array2<f32>,
    low: f32,
    high: f32,
    rng: &mut R,
) -> Result<(), ModelError> {
    // `Uniform::new` panics unless the width itself is finite.
    if !(low < high && (high - low).is_finite()) {
        return Err(ModelError::InitializationError(format!(
            "uniform range must be finite with low < high, got [{}, {})",
            low, high
        )));
    }
    let sample = Array2::random_using(matrix.raw_dim(), Uniform::new(low, high), rng);
    matrix.assign(&sample);
    Ok(())
}

fn fill_normal<R: Rng + ?Sized>(
    matrix: &mut Array2<f32>,
    std_dev: f32,
    rng: &mut R,
) -> Result<(), ModelError> {
    if !(std_dev.is_finite() && std_dev > 0.0) {
        return Err(ModelError::InitializationError(format!(
            "normal std_dev must be finite and positive, got {}",
            std_dev
        )));
    }
    let normal = Normal::new(0.0, std_dev)
        .map_err(|e| ModelError::InitializationError(e.to_string()))?;
    let sample = Array2::random_using(matrix.raw_dim(), normal, rng);
    matrix.assign(&sample);
    Ok(())
}
