//! Text generation building blocks: decoding strategies driven by a
//! caller-supplied scoring function, plus the GPT-2 tokenizer and
//! preprocessor that produce their prompts.

pub mod config;
pub mod error;
pub mod layers;
pub mod models;
pub mod samplers;
pub mod sampling_params;
pub mod tokenizers;
pub mod utils;

pub use config::ExecutionConfig;
pub use error::{Error, Result};
pub use samplers::{Generation, Sampler};
pub use sampling_params::SamplingParams;
