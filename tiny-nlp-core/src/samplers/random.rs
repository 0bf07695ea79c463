//! Ancestral sampling from the full temperature-scaled distribution.

use candle_core::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::samplers::ops;
use crate::sampling_params::{validate_temperature, SamplingParams};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RandomSampler {
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Result<Self> {
        validate_temperature(temperature)?;
        self.params.temperature = temperature;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()
    }

    pub fn select<R: Rng>(&self, logits: &Tensor, rng: &mut R) -> Result<Tensor> {
        let probs = ops::softmax_last_dim(&ops::scale(logits, self.params.temperature)?)?;
        ops::reject_non_finite(&probs, "probabilities")?;
        let (batch, vocab) = probs.dims2()?;
        let ids = Tensor::arange(0u32, vocab as u32, probs.device())?
            .unsqueeze(0)?
            .broadcast_as((batch, vocab))?
            .contiguous()?;
        ops::draw_rows(&probs, &ids, rng)
    }
}
