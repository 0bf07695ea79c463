//! Greedy decoding: always the highest scoring token.

use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GreedySampler {}

impl GreedySampler {
    pub fn new() -> Self {
        Self {}
    }

    pub fn select(&self, logits: &Tensor) -> Result<Tensor> {
        Ok(logits.argmax(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_picks_argmax_per_row() {
        let logits = Tensor::new(&[[0.1f32, 0.7, 0.2], [5.0, -1.0, 4.0]], &Device::Cpu).unwrap();
        let tokens: Vec<u32> = GreedySampler::new().select(&logits).unwrap().to_vec1().unwrap();
        assert_eq!(tokens, vec![1, 0]);
    }
}
