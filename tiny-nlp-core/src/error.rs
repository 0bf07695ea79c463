//! Error types for tiny-nlp.

use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation and runtime errors raised by samplers, tokenizers and
/// preprocessors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Index {index} out of range for sequence length {max_length}")]
    IndexOutOfRange { index: usize, max_length: usize },

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
