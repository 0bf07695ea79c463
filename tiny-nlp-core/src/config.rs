use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default settings shared by samplers and preprocessors.
pub mod settings {
    /// Probability mass kept by nucleus sampling.
    pub const TOP_P: f32 = 0.1;
    /// Logit divisor applied before normalization.
    pub const TEMPERATURE: f32 = 1.0;
    /// Number of candidates kept by top-k sampling.
    pub const TOP_K: usize = 5;
    /// Number of hypotheses tracked per row by beam search.
    pub const NUM_BEAMS: usize = 5;
    /// Whether generation may exit as soon as every row is finished.
    pub const ENFORCE_EAGER: bool = false;
    /// Precision the logits are rounded through before selection.
    pub const DTYPE: &str = "float32";
    /// Packed sequence length used by preprocessors.
    pub const SEQUENCE_LENGTH: usize = 1024;
    /// Padding id used by GPT-2 style preprocessors.
    pub const PAD_TOKEN_ID: u32 = 0;
    /// Words memoized by a byte-pair tokenizer before its cache is reset.
    pub const BPE_CACHE_CAPACITY: usize = 65_536;
}

/// Per-call execution settings for the generation loop.
///
/// With `enforce_eager` unset the loop runs a fixed number of steps
/// (`max_length - index`) and only ever performs masked writes, which is the
/// form a tracing backend can compile. Setting it lets the loop return as soon
/// as every row has emitted the end token. Both modes yield the same tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub enforce_eager: bool,
    pub dtype: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enforce_eager: settings::ENFORCE_EAGER,
            dtype: settings::DTYPE.to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn with_enforce_eager(mut self, eager: bool) -> Self {
        self.enforce_eager = eager;
        self
    }

    pub fn with_dtype(mut self, dt: &str) -> Self {
        self.dtype = dt.to_string();
        self
    }

    /// Resolve the configured precision name.
    pub fn compute_dtype(&self) -> Result<DType> {
        get_dtype(&self.dtype)
    }
}

/// Parse a precision name into a tensor dtype.
pub fn get_dtype(s: &str) -> Result<DType> {
    match s {
        "float32" | "f32" => Ok(DType::F32),
        "float16" | "f16" | "mixed_float16" => Ok(DType::F16),
        "bfloat16" | "bf16" | "mixed_bfloat16" => Ok(DType::BF16),
        other => Err(Error::UnsupportedDtype(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        let cfg = ExecutionConfig::default()
            .with_enforce_eager(true)
            .with_dtype("bfloat16");
        let json = serde_json::to_string(&cfg).unwrap();
        let decoded: ExecutionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, decoded);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let decoded: ExecutionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(decoded, ExecutionConfig::default());
    }

    #[test]
    fn test_dtype_parsing() {
        assert_eq!(get_dtype("float32").unwrap(), DType::F32);
        assert_eq!(get_dtype("f16").unwrap(), DType::F16);
        assert_eq!(get_dtype("mixed_bfloat16").unwrap(), DType::BF16);
        assert!(matches!(
            get_dtype("int8"),
            Err(Error::UnsupportedDtype(name)) if name == "int8"
        ));
    }
}
