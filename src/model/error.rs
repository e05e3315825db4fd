use std::fmt::Display;

use thiserror::Error;

use crate::utils::MathError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dimension mismatch in {context}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Index {index} out of range for {context} of length {len}")]
    IndexOutOfRange {
        context: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Capacity exceeded: sequence length {len} exceeds context size {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl ModelError {
    pub fn config<E: Display>(error: E) -> Self {
        ModelError::ConfigError(error.to_string())
    }

    pub(crate) fn dimension_mismatch(
        context: &'static str,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        ModelError::DimensionMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

impl From<MathError> for ModelError {
    fn from(error: MathError) -> Self {
        match error {
            MathError::DimensionMismatch {
                context,
                expected,
                actual,
            } => ModelError::DimensionMismatch {
                context,
                expected,
                actual,
            },
            MathError::IndexOutOfRange {
                context,
                index,
                len,
            } => ModelError::IndexOutOfRange {
                context,
                index,
                len,
            },
        }
    }
}
