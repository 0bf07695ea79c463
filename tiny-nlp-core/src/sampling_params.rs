//! Randomness controls shared by the stochastic samplers.
//!
//! Top-k, top-p and random sampling all scale logits by a temperature and
//! draw from a categorical distribution. The fields live here so each
//! sampler config can flatten them into its own serialized form.

use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    /// Fixed seed for reproducible draws. `None` draws fresh entropy on
    /// every call.
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: settings::TEMPERATURE,
            seed: None,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<()> {
        validate_temperature(self.temperature)
    }
}

pub(crate) fn validate_temperature(temperature: f32) -> Result<()> {
    if temperature.is_finite() && temperature > 0.0 {
        Ok(())
    } else {
        Err(Error::config(format!(
            "temperature must be a positive finite number, got {temperature}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let params = SamplingParams::default();
        assert_eq!(params.temperature, 1.0);
        assert!(params.seed.is_none());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_temperature() {
        for t in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let params = SamplingParams { temperature: t, seed: None };
            assert!(matches!(params.validate(), Err(Error::InvalidConfig(_))));
        }
    }
}
