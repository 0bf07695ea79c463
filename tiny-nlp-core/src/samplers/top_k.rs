//! Top-k sampling: draw among the `k` most probable tokens.

use candle_core::{Tensor, D};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};
use crate::samplers::ops;
use crate::sampling_params::{validate_temperature, SamplingParams};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopKSampler {
    pub k: usize,
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl Default for TopKSampler {
    fn default() -> Self {
        Self {
            k: settings::TOP_K,
            params: SamplingParams::default(),
        }
    }
}

impl TopKSampler {
    pub fn new(k: usize) -> Result<Self> {
        let sampler = Self {
            k,
            ..Default::default()
        };
        sampler.validate()?;
        Ok(sampler)
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
        if self.k == 0 {
            return Err(Error::config("k must be at least 1"));
        }
        self.params.validate()
    }

    pub fn select<R: Rng>(&self, logits: &Tensor, rng: &mut R) -> Result<Tensor> {
        let probs = ops::softmax_last_dim(&ops::scale(logits, self.params.temperature)?)?;
        ops::reject_non_finite(&probs, "probabilities")?;
        let (sorted, ids) = ops::sort_descending(&probs)?;
        // k larger than the vocabulary keeps everything.
        let k = self.k.min(sorted.dim(D::Minus1)?);
        let weights = sorted.narrow(1, 0, k)?.contiguous()?;
        let ids = ids.narrow(1, 0, k)?.contiguous()?;
        ops::draw_rows(&weights, &ids, rng)
    }
}
