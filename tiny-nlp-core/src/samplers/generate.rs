//! The decoding loop shared by every strategy.
//!
//! Each step asks the scoring function for logits at the current index,
//! selects one token per row and blends it into the prompt column with a
//! masked write: rows that already emitted the end token, and positions the
//! caller marked as final, keep their existing value. The trip count is always
//! `max_length - index` unless eager execution is enabled, in which case the
//! loop may stop once every row is finished.

use candle_core::{DType, Tensor};
use log::{debug, trace};
use rand::rngs::StdRng;

use crate::config::ExecutionConfig;
use crate::error::Error;
use crate::samplers::ops;
use crate::samplers::state::GenerationState;
use crate::utils::rng::step_rng;

/// Per-call generation arguments.
#[derive(Debug, Clone)]
pub struct Generation<'a, S = ()> {
    pub(crate) prompt: &'a Tensor,
    pub(crate) state: S,
    pub(crate) index: usize,
    pub(crate) end_token_id: Option<u32>,
    pub(crate) mask: Option<&'a Tensor>,
    pub(crate) execution: ExecutionConfig,
}

impl<'a> Generation<'a, ()> {
    /// Generate into `prompt`, a `(batch_size, max_length)` tensor of `u32`
    /// or `i64` token ids, starting at position 0 with no state.
    pub fn new(prompt: &'a Tensor) -> Self {
        Self {
            prompt,
            state: (),
            index: 0,
            end_token_id: None,
            mask: None,
            execution: ExecutionConfig::default(),
        }
    }
}

impl<'a, S> Generation<'a, S> {
    pub fn with_state<T>(self, state: T) -> Generation<'a, T> {
        Generation {
            prompt: self.prompt,
            state,
            index: self.index,
            end_token_id: self.end_token_id,
            mask: self.mask,
            execution: self.execution,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_end_token_id(mut self, end_token_id: u32) -> Self {
        self.end_token_id = Some(end_token_id);
        self
    }

    /// Positions set to a non-zero value are never overwritten.
    pub fn with_mask(mut self, mask: &'a Tensor) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }
}

/// Validated view of a request.
pub(crate) struct Plan {
    pub batch_size: usize,
    pub max_length: usize,
    pub compute_dtype: DType,
    pub mask: Tensor,
}

pub(crate) fn plan<S: GenerationState>(request: &Generation<'_, S>) -> anyhow::Result<Plan> {
    let prompt = request.prompt;
    let (batch_size, max_length) = match prompt.dims() {
        &[b, l] => (b, l),
        other => {
            return Err(Error::ShapeMismatch {
                expected: vec![other.first().copied().unwrap_or(1), 2],
                got: other.to_vec(),
            }
            .into())
        }
    };
    if !matches!(prompt.dtype(), DType::U32 | DType::I64) {
        return Err(Error::UnsupportedDtype(format!("{:?} prompt", prompt.dtype())).into());
    }
    if request.index >= max_length {
        return Err(Error::IndexOutOfRange {
            index: request.index,
            max_length,
        }
        .into());
    }
    if let Some(state_batch) = request.state.batch_size() {
        if state_batch != batch_size {
            return Err(Error::ShapeMismatch {
                expected: vec![batch_size],
                got: vec![state_batch],
            }
            .into());
        }
    }
    let mask = match request.mask {
        Some(mask) => {
            if mask.dims() != prompt.dims() {
                return Err(Error::ShapeMismatch {
                    expected: prompt.dims().to_vec(),
                    got: mask.dims().to_vec(),
                }
                .into());
            }
            mask.ne(0u8)?.to_device(prompt.device())?
        }
        None => Tensor::zeros((batch_size, max_length), DType::U8, prompt.device())?,
    };
    let compute_dtype = request.execution.compute_dtype()?;
    Ok(Plan {
        batch_size,
        max_length,
        compute_dtype,
        mask,
    })
}

/// Result of blending one sampled column into the prompt.
pub(crate) struct Written {
    pub prompt: Tensor,
    pub done: Tensor,
}

/// Write `next` into column `index` of `prompt` wherever the row is not done
/// and the position is not masked, then fold newly emitted end tokens into
/// `done`. `done` and the mask column are `u8` tensors of shape `(batch,)`.
pub(crate) fn masked_write(
    prompt: &Tensor,
    next: &Tensor,
    done: &Tensor,
    mask: &Tensor,
    index: usize,
    end_token_id: Option<u32>,
) -> anyhow::Result<Written> {
    let batch_size = prompt.dim(0)?;
    let existing = prompt.narrow(1, index, 1)?.squeeze(1)?;
    let masked = mask.narrow(1, index, 1)?.squeeze(1)?;
    let keep = done.maximum(&masked)?;
    let next = next.to_dtype(prompt.dtype())?;
    let column = keep.where_cond(&existing, &next)?;
    let prompt = prompt.slice_assign(&[0..batch_size, index..index + 1], &column.unsqueeze(1)?)?;

    let done = match end_token_id {
        Some(end) => {
            let end = Tensor::full(end, (batch_size,), prompt.device())?.to_dtype(prompt.dtype())?;
            let wrote = keep.eq(0u8)?;
            let emitted = column.eq(&end)?.minimum(&wrote)?;
            done.maximum(&emitted)?
        }
        None => done.clone(),
    };
    Ok(Written { prompt, done })
}

pub(crate) fn all_done(done: &Tensor) -> anyhow::Result<bool> {
    Ok(done.to_vec1::<u8>()?.iter().all(|&d| d != 0))
}

/// Run the shared loop with `select` choosing one token per row.
pub(crate) fn run<S, F, Sel>(
    mut next: F,
    request: Generation<'_, S>,
    seed: Option<u64>,
    name: &str,
    mut select: Sel,
) -> anyhow::Result<Tensor>
where
    S: GenerationState,
    F: FnMut(&Tensor, S, usize) -> anyhow::Result<(Tensor, S)>,
    Sel: FnMut(&Tensor, &mut StdRng) -> anyhow::Result<Tensor>,
{
    let plan = plan(&request)?;
    let Generation {
        prompt,
        mut state,
        index,
        end_token_id,
        execution,
        ..
    } = request;
    debug!(
        "{name} sampling: batch={} length={} index={} end_token={:?} eager={}",
        plan.batch_size, plan.max_length, index, end_token_id, execution.enforce_eager
    );

    let mut prompt = prompt.clone();
    let mut done = Tensor::zeros((plan.batch_size,), DType::U8, prompt.device())?;
    for i in index..plan.max_length {
        let (logits, new_state) = next(&prompt, state, i)?;
        state = new_state;
        let logits = ops::prepare_logits(&logits, plan.batch_size, plan.compute_dtype)?;
        let mut rng = step_rng(seed, i);
        let tokens = select(&logits, &mut rng)?;
        trace!("{name} step {i}: {tokens}");
        let written = masked_write(&prompt, &tokens, &done, &plan.mask, i, end_token_id)?;
        prompt = written.prompt;
        done = written.done;
        if execution.enforce_eager && end_token_id.is_some() && all_done(&done)? {
            debug!("{name} sampling: all rows finished at index {i}");
            break;
        }
    }
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn prompt() -> Tensor {
        Tensor::new(&[[9u32, 9, 9], [9, 9, 9]], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_plan_rejects_bad_index() {
        let prompt = prompt();
        let err = plan(&Generation::new(&prompt).with_index(3)).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::IndexOutOfRange { index: 3, max_length: 3 })
        ));
    }

    #[test]
    fn test_plan_rejects_state_batch_mismatch() {
        let prompt = prompt();
        let state = Tensor::zeros((3, 3), DType::U32, &Device::Cpu).unwrap();
        let err = plan(&Generation::new(&prompt).with_state(state)).err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_plan_rejects_float_prompt() {
        let prompt = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let err = plan(&Generation::new(&prompt)).err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnsupportedDtype(_))));
    }

    #[test]
    fn test_masked_write_preserves_done_rows() {
        let prompt = prompt();
        let next = Tensor::new(&[1u32, 2], &Device::Cpu).unwrap();
        let done = Tensor::new(&[0u8, 1], &Device::Cpu).unwrap();
        let mask = Tensor::zeros((2, 3), DType::U8, &Device::Cpu).unwrap();
        let written = masked_write(&prompt, &next, &done, &mask, 1, Some(1)).unwrap();
        assert_eq!(
            written.prompt.to_vec2::<u32>().unwrap(),
            vec![vec![9, 1, 9], vec![9, 9, 9]]
        );
        assert_eq!(written.done.to_vec1::<u8>().unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_masked_write_respects_caller_mask() {
        let prompt = prompt();
        let next = Tensor::new(&[5u32, 5], &Device::Cpu).unwrap();
        let done = Tensor::zeros((2,), DType::U8, &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[0u8, 1, 0], [0, 0, 0]], &Device::Cpu).unwrap();
        let written = masked_write(&prompt, &next, &done, &mask, 1, Some(9)).unwrap();
        assert_eq!(
            written.prompt.to_vec2::<u32>().unwrap(),
            vec![vec![9, 9, 9], vec![9, 5, 9]]
        );
        // A preserved end token does not finish the row.
        assert_eq!(written.done.to_vec1::<u8>().unwrap(), vec![0, 0]);
    }
}
