//! Autoregressive decoding strategies.
//!
//! A [`Sampler`] wraps a scoring function `next(prompt, state, index) ->
//! (logits, state)` and fills a `(batch_size, max_length)` prompt tensor one
//! position at a time. The strategies form a closed set that all plug into
//! the same loop; only beam search, which tracks several hypotheses per row,
//! drives its own variant of it.
//!
//! ```no_run
//! use candle_core::{Device, Tensor};
//! use tiny_nlp_core::samplers::{Generation, Sampler, TopPSampler};
//!
//! # fn main() -> anyhow::Result<()> {
//! let sampler: Sampler = TopPSampler::new(0.9)?.with_seed(42).into();
//! let prompt = Tensor::zeros((1, 16), candle_core::DType::U32, &Device::Cpu)?;
//! let output = sampler.sample(
//!     |prompt, state, _index| Ok((Tensor::zeros((prompt.dim(0)?, 32), candle_core::DType::F32, &Device::Cpu)?, state)),
//!     Generation::new(&prompt).with_end_token_id(0),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod beam;
pub mod generate;
pub mod greedy;
pub mod ops;
pub mod random;
pub mod state;
pub mod top_k;
pub mod top_p;

use candle_core::Tensor;
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use beam::{BeamOutput, BeamSampler};
pub use generate::Generation;
pub use greedy::GreedySampler;
pub use random::RandomSampler;
pub use state::GenerationState;
pub use top_k::TopKSampler;
pub use top_p::TopPSampler;

/// Serialized as `{"class_name": "top_p", "config": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "class_name", content = "config", rename_all = "snake_case")]
pub enum Sampler {
    Greedy(GreedySampler),
    TopK(TopKSampler),
    TopP(TopPSampler),
    Random(RandomSampler),
    Beam(BeamSampler),
}

impl Sampler {
    pub fn name(&self) -> &'static str {
        match self {
            Sampler::Greedy(_) => "greedy",
            Sampler::TopK(_) => "top_k",
            Sampler::TopP(_) => "top_p",
            Sampler::Random(_) => "random",
            Sampler::Beam(_) => "beam",
        }
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            Sampler::TopK(s) => s.params.seed,
            Sampler::TopP(s) => s.params.seed,
            Sampler::Random(s) => s.params.seed,
            Sampler::Greedy(_) | Sampler::Beam(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Sampler::Greedy(_) => Ok(()),
            Sampler::TopK(s) => s.validate(),
            Sampler::TopP(s) => s.validate(),
            Sampler::Random(s) => s.validate(),
            Sampler::Beam(s) => s.validate(),
        }
    }

    /// Choose one token id per row of `(batch_size, vocab_size)` logits.
    ///
    /// Beam search only ranks hypotheses inside its own loop; a single step
    /// of width one is the arg-max.
    pub fn select<R: Rng>(&self, logits: &Tensor, rng: &mut R) -> Result<Tensor> {
        match self {
            Sampler::Greedy(s) => s.select(logits),
            Sampler::TopK(s) => s.select(logits, rng),
            Sampler::TopP(s) => s.select(logits, rng),
            Sampler::Random(s) => s.select(logits, rng),
            Sampler::Beam(_) => GreedySampler::new().select(logits),
        }
    }

    /// Fill the prompt from `request.index` onwards.
    ///
    /// Returns a tensor with the prompt's shape and dtype. Errors returned
    /// by `next` are passed through as they are.
    pub fn sample<S, F>(&self, next: F, request: Generation<'_, S>) -> anyhow::Result<Tensor>
    where
        S: GenerationState,
        F: FnMut(&Tensor, S, usize) -> anyhow::Result<(Tensor, S)>,
    {
        if let Err(err) = self.validate() {
            warn!("rejecting {} sampler configuration: {err}", self.name());
            return Err(err.into());
        }
        match self {
            Sampler::Beam(beam) => beam.sample(next, request),
            _ => generate::run(next, request, self.seed(), self.name(), |logits, rng| {
                Ok(self.select(logits, rng)?)
            }),
        }
    }
}

impl From<GreedySampler> for Sampler {
    fn from(s: GreedySampler) -> Self {
        Sampler::Greedy(s)
    }
}

impl From<TopKSampler> for Sampler {
    fn from(s: TopKSampler) -> Self {
        Sampler::TopK(s)
    }
}

impl From<TopPSampler> for Sampler {
    fn from(s: TopPSampler) -> Self {
        Sampler::TopP(s)
    }
}

impl From<RandomSampler> for Sampler {
    fn from(s: RandomSampler) -> Self {
        Sampler::Random(s)
    }
}

impl From<BeamSampler> for Sampler {
    fn from(s: BeamSampler) -> Self {
        Sampler::Beam(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_serde_roundtrip_every_strategy() {
        let samplers: Vec<Sampler> = vec![
            GreedySampler::new().into(),
            TopKSampler::new(7).unwrap().with_seed(3).into(),
            TopPSampler::new(0.25).unwrap().with_temperature(0.5).unwrap().into(),
            RandomSampler::new().with_seed(1).into(),
            BeamSampler::new(4).unwrap().into(),
        ];
        for sampler in samplers {
            let json = serde_json::to_string(&sampler).unwrap();
            let decoded: Sampler = serde_json::from_str(&json).unwrap();
            assert_eq!(sampler, decoded);
        }
    }

    #[test]
    fn test_serialized_layout() {
        let sampler: Sampler = TopPSampler::new(0.5).unwrap().with_seed(9).into();
        let value = serde_json::to_value(&sampler).unwrap();
        assert_eq!(value["class_name"], "top_p");
        assert_eq!(value["config"]["p"], 0.5);
        assert_eq!(value["config"]["temperature"], 1.0);
        assert_eq!(value["config"]["seed"], 9);
    }

    #[test]
    fn test_invalid_deserialized_config_fails_on_use() {
        let sampler: Sampler =
            serde_json::from_str(r#"{"class_name": "top_p", "config": {"p": 1.5}}"#).unwrap();
        let prompt = Tensor::zeros((1, 3), candle_core::DType::U32, &candle_core::Device::Cpu).unwrap();
        let err = sampler
            .sample(|_, _: (), _| unreachable!("validation runs first"), Generation::new(&prompt))
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidConfig(_))));
    }
}
