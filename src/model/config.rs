use std::{fs, path::Path};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::error::ModelError;

/// Shape and sampling configuration shared by every head of a block.
///
/// Immutable once built: the only ways to obtain one are [`ModelInfo::new`]
/// and deserialization, and both run the same validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawModelInfo", into = "RawModelInfo")]
pub struct ModelInfo {
    embedding_dim: usize, // width of every token embedding row
    key_query_dim: usize, // query/key space and value bottleneck width
    context_size: usize,  // maximum sequence length
    head_count: usize,
    temperature: f32, // only read at the unembedding boundary
}

#[derive(Serialize, Deserialize)]
struct RawModelInfo {
    embedding_dim: usize,
    key_query_dim: usize,
    context_size: usize,
    head_count: usize,
    #[serde(default = "default_temperature")]
    temperature: f32,
}

fn default_temperature() -> f32 {
    1.0
}

impl TryFrom<RawModelInfo> for ModelInfo {
    type Error = ModelError;

    fn try_from(raw: RawModelInfo) -> Result<Self, Self::Error> {
        ModelInfo::new(
            raw.embedding_dim,
            raw.key_query_dim,
            raw.context_size,
            raw.head_count,
            raw.temperature,
        )
    }
}

impl From<ModelInfo> for RawModelInfo {
    fn from(info: ModelInfo) -> Self {
        Self {
            embedding_dim: info.embedding_dim,
            key_query_dim: info.key_query_dim,
            context_size: info.context_size,
            head_count: info.head_count,
            temperature: info.temperature,
        }
    }
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            embedding_dim: 64,
            key_query_dim: 16,
            context_size: 128,
            head_count: 4,
            temperature: default_temperature(),
        }
    }
}

impl ModelInfo {
    pub fn new(
        embedding_dim: usize,
        key_query_dim: usize,
        context_size: usize,
        head_count: usize,
        temperature: f32,
    ) -> Result<Self, ModelError> {
        let info = Self {
            embedding_dim,
            key_query_dim,
            context_size,
            head_count,
            temperature,
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let mut errors = Vec::new();

        if self.embedding_dim == 0 {
            errors.push("embedding_dim must be greater than 0");
        }
        if self.key_query_dim == 0 {
            errors.push("key_query_dim must be greater than 0");
        }
        if self.context_size == 0 {
            errors.push("context_size must be greater than 0");
        }
        if self.head_count == 0 {
            errors.push("head_count must be greater than 0");
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            errors.push("temperature must be a finite value greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::ConfigError(errors.join("; ")))
        }
    }

    /// Loads a configuration file; `.json` is parsed as JSON, anything else as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ModelError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            Some("toml") | None => Self::from_toml_str(&contents),
            Some(other) => Err(ModelError::ConfigError(format!(
                "unsupported configuration extension '{}'",
                other
            ))),
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ModelError> {
        serde_json::from_str(contents).map_err(ModelError::config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ModelError> {
        toml::from_str(contents).map_err(ModelError::config)
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn key_query_dim(&self) -> usize {
        self.key_query_dim
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn head_count(&self) -> usize {
        self.head_count
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Checks an embedding matrix against this configuration and returns its
    /// sequence length.
    pub fn validate_input(&self, input: &ArrayView2<f32>) -> Result<usize, ModelError> {
        let (len, width) = input.dim();
        if width != self.embedding_dim || len == 0 {
            return Err(ModelError::dimension_mismatch(
                "attention input",
                &[len.max(1), self.embedding_dim],
                &[len, width],
            ));
        }
        if len > self.context_size {
            return Err(ModelError::CapacityExceeded {
                len,
                capacity: self.context_size,
            });
        }
        Ok(len)
    }

    /// Number of weights in one head: three down projections plus the up projection.
    pub fn head_parameter_count(&self) -> usize {
        4 * self.embedding_dim * self.key_query_dim
    }
}
