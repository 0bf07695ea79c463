//! Tensor helpers shared by the sampling strategies.

use candle_core::{DType, Tensor, D};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;

use crate::error::{Error, Result};

/// Largest finite magnitude of `dtype`, as an `f64`.
fn finite_bound(dtype: DType) -> f64 {
    match dtype {
        DType::F16 => 65_504.0,
        DType::BF16 => 3.389_531_4e38,
        _ => f32::MAX as f64,
    }
}

/// Fail on NaN or `+inf` entries. `-inf` is allowed and masks a token out.
pub(crate) fn reject_non_finite(values: &Tensor, what: &str) -> Result<()> {
    let nan = values.ne(values)?;
    let pos_inf = values.eq(f64::INFINITY)?;
    if nan.maximum(&pos_inf)?.max_all()?.to_scalar::<u8>()? != 0 {
        return Err(Error::InvalidDistribution(format!("{what} contain NaN or +inf")));
    }
    Ok(())
}

/// Round logits through the execution precision and return them as `f32`.
///
/// Values are clamped to the finite range of `dtype` first, so large logits
/// saturate instead of overflowing to infinity.
pub fn prepare_logits(logits: &Tensor, batch_size: usize, dtype: DType) -> Result<Tensor> {
    let dims = logits.dims();
    if dims.len() != 2 || dims[0] != batch_size || dims[1] == 0 {
        return Err(Error::ShapeMismatch {
            expected: vec![batch_size, dims.get(1).copied().unwrap_or(0).max(1)],
            got: dims.to_vec(),
        });
    }
    let logits = logits.to_dtype(DType::F32)?;
    reject_non_finite(&logits, "logits")?;
    let logits = if dtype == DType::F32 {
        logits
    } else {
        let bound = finite_bound(dtype);
        logits
            .clamp(-bound, bound)?
            .to_dtype(dtype)?
            .to_dtype(DType::F32)?
    };
    Ok(logits.contiguous()?)
}

/// Divide logits by `temperature`.
pub fn scale(logits: &Tensor, temperature: f32) -> Result<Tensor> {
    if temperature == 1.0 {
        return Ok(logits.clone());
    }
    Ok((logits / temperature as f64)?)
}

/// Numerically stable softmax over the vocabulary axis.
pub fn softmax_last_dim(logits: &Tensor) -> Result<Tensor> {
    let max = logits.max_keepdim(D::Minus1)?;
    let exp = logits.broadcast_sub(&max)?.exp()?;
    let sum = exp.sum_keepdim(D::Minus1)?;
    Ok(exp.broadcast_div(&sum)?)
}

/// Log of the softmax over the vocabulary axis.
pub fn log_softmax_last_dim(logits: &Tensor) -> Result<Tensor> {
    let max = logits.max_keepdim(D::Minus1)?;
    let shifted = logits.broadcast_sub(&max)?;
    let log_sum = shifted.exp()?.sum_keepdim(D::Minus1)?.log()?;
    Ok(shifted.broadcast_sub(&log_sum)?)
}

/// Sort probabilities descending per row. Returns `(sorted, token_ids)`.
///
/// Equal probabilities keep ascending token id order.
pub fn sort_descending(probs: &Tensor) -> Result<(Tensor, Tensor)> {
    let (sorted, ids) = probs.contiguous()?.sort_last_dim(false)?;
    Ok((sorted, ids))
}

/// Draw one index proportional to `weights`, which need not sum to one.
///
/// Non-finite weights and rows without any positive weight are errors.
pub fn categorical<R: Rng>(weights: &[f32], rng: &mut R) -> Result<usize> {
    if let Some(w) = weights.iter().find(|w| !w.is_finite()) {
        return Err(Error::InvalidDistribution(format!("non-finite weight {w}")));
    }
    let dist = WeightedIndex::new(weights)
        .map_err(|err| Error::InvalidDistribution(format!("cannot sample: {err}")))?;
    Ok(dist.sample(rng))
}

/// Draw one token per row from sorted, possibly truncated probabilities.
pub fn draw_rows<R: Rng>(weights: &Tensor, token_ids: &Tensor, rng: &mut R) -> Result<Tensor> {
    let device = weights.device().clone();
    let weights: Vec<Vec<f32>> = weights.to_vec2()?;
    let token_ids: Vec<Vec<u32>> = token_ids.to_dtype(DType::U32)?.to_vec2()?;
    let mut out = Vec::with_capacity(weights.len());
    for (row, ids) in weights.iter().zip(token_ids.iter()) {
        let pick = categorical(row, rng)?;
        out.push(ids[pick]);
    }
    let batch = out.len();
    Ok(Tensor::from_vec(out, (batch,), &device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let logits = Tensor::new(&[[1.0f32, 2.0, 3.0], [1000.0, 1001.0, 1002.0]], &Device::Cpu).unwrap();
        let probs: Vec<Vec<f32>> = softmax_last_dim(&logits).unwrap().to_vec2().unwrap();
        for row in &probs {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
            assert!(row[2] > row[1] && row[1] > row[0]);
        }
        assert_abs_diff_eq!(probs[0][0], probs[1][0], epsilon = 1e-6);
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let logits = Tensor::new(&[[0.5f32, -1.0, 2.0]], &Device::Cpu).unwrap();
        let probs: Vec<f32> = softmax_last_dim(&logits).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let log_probs: Vec<f32> = log_softmax_last_dim(&logits).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        for (p, lp) in probs.iter().zip(log_probs.iter()) {
            assert_abs_diff_eq!(p.ln(), *lp, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_sort_descending_keeps_ids() {
        let probs = Tensor::new(&[[0.1f32, 0.6, 0.3]], &Device::Cpu).unwrap();
        let (sorted, ids) = sort_descending(&probs).unwrap();
        assert_eq!(ids.to_vec2::<u32>().unwrap(), vec![vec![1, 2, 0]]);
        assert_eq!(sorted.to_vec2::<f32>().unwrap(), vec![vec![0.6, 0.3, 0.1]]);
    }

    #[test]
    fn test_categorical_rejects_degenerate_rows() {
        let mut rng = StdRng::seed_from_u64(0);
        for weights in [vec![0.0, 0.0, 0.0], vec![f32::NAN, 1.0], vec![f32::INFINITY, 1.0]] {
            assert!(matches!(
                categorical(&weights, &mut rng),
                Err(Error::InvalidDistribution(_))
            ));
        }
    }

    #[test]
    fn test_categorical_never_picks_zero_weight() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let pick = categorical(&[0.0, 0.5, 0.0, 0.25], &mut rng).unwrap();
            assert!(pick == 1 || pick == 3);
        }
    }

    #[test]
    fn test_temperature_scaling() {
        let logits = Tensor::new(&[[2.0f32, 4.0]], &Device::Cpu).unwrap();
        let scaled: Vec<Vec<f32>> = scale(&logits, 2.0).unwrap().to_vec2().unwrap();
        assert_eq!(scaled, vec![vec![1.0, 2.0]]);
    }

    #[test]
    fn test_prepare_logits_checks_batch() {
        let logits = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(prepare_logits(&logits, 3, DType::F32).is_ok());
        assert!(matches!(
            prepare_logits(&logits, 2, DType::F32),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_prepare_logits_saturates_in_half_precision() {
        let logits = Tensor::new(&[[1e9f32, 0.0, -1e9]], &Device::Cpu).unwrap();
        for dtype in [DType::F16, DType::BF16] {
            let prepared = prepare_logits(&logits, 1, dtype).unwrap();
            let values: Vec<Vec<f32>> = prepared.to_vec2().unwrap();
            assert!(values[0].iter().all(|v| v.is_finite()), "{dtype:?}: {values:?}");
            let probs: Vec<Vec<f32>> = softmax_last_dim(&prepared).unwrap().to_vec2().unwrap();
            assert_abs_diff_eq!(probs[0][0], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_prepare_logits_rejects_nan_and_inf() {
        for bad in [f32::NAN, f32::INFINITY] {
            let logits = Tensor::new(&[[0.0f32, bad]], &Device::Cpu).unwrap();
            assert!(matches!(
                prepare_logits(&logits, 1, DType::F32),
                Err(Error::InvalidDistribution(_))
            ));
        }
        let masked = Tensor::new(&[[0.0f32, f32::NEG_INFINITY]], &Device::Cpu).unwrap();
        assert!(prepare_logits(&masked, 1, DType::F16).is_ok());
    }
}
