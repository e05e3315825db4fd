// error.rs
use thiserror::Error;

use crate::model::ModelError;
use crate::utils::MathError;

#[derive(Error, Debug)]
pub enum TinyGptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("Invalid usage: {0}")]
    Usage(String),
}
