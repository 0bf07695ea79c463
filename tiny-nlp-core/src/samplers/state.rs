//! Caller-owned state threaded through the scoring function.
//!
//! The sampler never looks inside the state. It only asks for a batch size
//! to validate against the prompt, and beam search asks the state to follow
//! the surviving hypotheses when rows are reordered.

use candle_core::Tensor;

pub trait GenerationState: Sized {
    /// Leading batch dimension, if the state has one.
    fn batch_size(&self) -> Option<usize> {
        None
    }

    /// Gather rows `rows` (a `u32` index tensor) along the batch axis.
    fn select_rows(&self, rows: &Tensor) -> candle_core::Result<Self>;
}

impl GenerationState for () {
    fn select_rows(&self, _rows: &Tensor) -> candle_core::Result<Self> {
        Ok(())
    }
}

impl GenerationState for Tensor {
    fn batch_size(&self) -> Option<usize> {
        self.dims().first().copied()
    }

    fn select_rows(&self, rows: &Tensor) -> candle_core::Result<Self> {
        self.index_select(&rows.to_device(self.device())?, 0)
    }
}

impl<T: GenerationState> GenerationState for Option<T> {
    fn batch_size(&self) -> Option<usize> {
        self.as_ref().and_then(GenerationState::batch_size)
    }

    fn select_rows(&self, rows: &Tensor) -> candle_core::Result<Self> {
        self.as_ref().map(|s| s.select_rows(rows)).transpose()
    }
}

impl<T: GenerationState> GenerationState for Vec<T> {
    fn batch_size(&self) -> Option<usize> {
        self.iter().find_map(GenerationState::batch_size)
    }

    fn select_rows(&self, rows: &Tensor) -> candle_core::Result<Self> {
        self.iter().map(|s| s.select_rows(rows)).collect()
    }
}

impl<A: GenerationState, B: GenerationState> GenerationState for (A, B) {
    fn batch_size(&self) -> Option<usize> {
        self.0.batch_size().or_else(|| self.1.batch_size())
    }

    fn select_rows(&self, rows: &Tensor) -> candle_core::Result<Self> {
        Ok((self.0.select_rows(rows)?, self.1.select_rows(rows)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_tensor_state_rows() {
        let state = Tensor::new(&[[1u32, 2], [3, 4]], &Device::Cpu).unwrap();
        assert_eq!(state.batch_size(), Some(2));
        let rows = Tensor::new(&[1u32, 1, 0], &Device::Cpu).unwrap();
        let picked = state.select_rows(&rows).unwrap();
        assert_eq!(picked.to_vec2::<u32>().unwrap(), vec![vec![3, 4], vec![3, 4], vec![1, 2]]);
    }

    #[test]
    fn test_unit_state_has_no_batch() {
        assert_eq!(().batch_size(), None);
        let nested: (Option<Tensor>, ()) = (None, ());
        assert_eq!(nested.batch_size(), None);
    }
}
