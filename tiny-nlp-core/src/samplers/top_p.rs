//! Nucleus (top-p) sampling.
//!
//! Probabilities are sorted descending per row and truncated to the smallest
//! prefix whose mass reaches `p`: a token is kept when the mass strictly
//! before it is below `p`. The most probable token is therefore always kept.
//! Tokens with equal probability keep ascending id order, so a tie at the
//! boundary admits the lower ids first. The remainder is not renormalized;
//! the categorical draw is proportional to the truncated weights.

use candle_core::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};
use crate::samplers::ops;
use crate::sampling_params::{validate_temperature, SamplingParams};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopPSampler {
    pub p: f32,
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl Default for TopPSampler {
    fn default() -> Self {
        Self {
            p: settings::TOP_P,
            params: SamplingParams::default(),
        }
    }
}

impl TopPSampler {
    pub fn new(p: f32) -> Result<Self> {
        let sampler = Self {
            p,
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
        if !(self.p > 0.0 && self.p <= 1.0) {
            return Err(Error::config(format!("p must be in (0, 1], got {}", self.p)));
        }
        self.params.validate()
    }

    /// Sorted probabilities with everything outside the nucleus zeroed, and
    /// the token ids in the same order.
    ///
    /// The prefix mass is accumulated on the host in one pass per row; the
    /// first entry is kept unconditionally.
    pub fn truncate(&self, logits: &Tensor) -> Result<(Tensor, Tensor)> {
        let probs = ops::softmax_last_dim(&ops::scale(logits, self.params.temperature)?)?;
        ops::reject_non_finite(&probs, "probabilities")?;
        let (sorted, ids) = ops::sort_descending(&probs)?;
        let (batch, vocab) = sorted.dims2()?;
        let mut weights: Vec<f32> = sorted.flatten_all()?.to_vec1()?;
        for row in weights.chunks_mut(vocab) {
            let mut mass_before = 0.0f64;
            for (i, w) in row.iter_mut().enumerate() {
                if i > 0 && mass_before >= self.p as f64 {
                    *w = 0.0;
                    continue;
                }
                mass_before += *w as f64;
            }
        }
        let truncated = Tensor::from_vec(weights, (batch, vocab), sorted.device())?;
        Ok((truncated, ids))
    }

    pub fn select<R: Rng>(&self, logits: &Tensor, rng: &mut R) -> Result<Tensor> {
        let (weights, ids) = self.truncate(logits)?;
        ops::draw_rows(&weights, &ids, rng)
    }
}
