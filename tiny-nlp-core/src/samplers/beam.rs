//! Beam search.
//!
//! Every prompt row is expanded into `num_beams` hypotheses that share the
//! caller's prefix. At each step all continuations of all live hypotheses are
//! scored by accumulated log-probability, the best `num_beams` survive, and
//! the prompt and state rows are gathered to follow their parents. A
//! hypothesis that emitted the end token is frozen: its only continuation is
//! the value already in the buffer, at no cost.

use std::cmp::Ordering;

use candle_core::{DType, Tensor};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};
use crate::samplers::generate::{self, Generation};
use crate::samplers::ops;
use crate::samplers::state::GenerationState;

/// Starting score for the duplicate hypotheses of a row, so only the first
/// one expands on the first step.
const UNREACHABLE: f32 = -1e9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BeamSampler {
    pub num_beams: usize,
}

impl Default for BeamSampler {
    fn default() -> Self {
        Self {
            num_beams: settings::NUM_BEAMS,
        }
    }
}

/// Every surviving hypothesis, best first.
#[derive(Debug, Clone)]
pub struct BeamOutput {
    /// `(batch_size, num_beams, max_length)`, same dtype as the prompt.
    pub sequences: Tensor,
    /// `(batch_size, num_beams)` accumulated log-probabilities.
    pub scores: Tensor,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    parent: usize,
    token: u32,
}

impl Candidate {
    /// Higher score first, then lower parent and token for a total order.
    fn rank(a: &Self, b: &Self) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then(a.parent.cmp(&b.parent))
            .then(a.token.cmp(&b.token))
    }
}

impl BeamSampler {
    pub fn new(num_beams: usize) -> Result<Self> {
        let sampler = Self { num_beams };
        sampler.validate()?;
        Ok(sampler)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_beams == 0 {
            return Err(Error::config("num_beams must be at least 1"));
        }
        Ok(())
    }

    /// Run beam search and keep only the best hypothesis per row.
    pub fn sample<S, F>(&self, next: F, request: Generation<'_, S>) -> anyhow::Result<Tensor>
    where
        S: GenerationState,
        F: FnMut(&Tensor, S, usize) -> anyhow::Result<(Tensor, S)>,
    {
        let output = self.sample_all_beams(next, request)?;
        Ok(output.sequences.narrow(1, 0, 1)?.squeeze(1)?)
    }

    pub fn sample_all_beams<S, F>(
        &self,
        mut next: F,
        request: Generation<'_, S>,
    ) -> anyhow::Result<BeamOutput>
    where
        S: GenerationState,
        F: FnMut(&Tensor, S, usize) -> anyhow::Result<(Tensor, S)>,
    {
        self.validate()?;
        let plan = generate::plan(&request)?;
        let Generation {
            prompt,
            state,
            index,
            end_token_id,
            execution,
            ..
        } = request;
        let num_beams = self.num_beams;
        let rows = plan.batch_size * num_beams;
        let device = prompt.device().clone();
        debug!(
            "beam search: batch={} beams={} length={} index={} end_token={:?}",
            plan.batch_size, num_beams, plan.max_length, index, end_token_id
        );

        let expand: Vec<u32> = (0..plan.batch_size as u32)
            .flat_map(|row| std::iter::repeat(row).take(num_beams))
            .collect();
        let expand = Tensor::from_vec(expand, (rows,), &device)?;
        let mut prompt = prompt.index_select(&expand, 0)?;
        let mask = plan.mask.index_select(&expand, 0)?;
        let mut state = state.select_rows(&expand)?;
        let mut scores: Vec<f32> = (0..rows)
            .map(|g| if g % num_beams == 0 { 0.0 } else { UNREACHABLE })
            .collect();
        let mut done = vec![0u8; rows];

        for i in index..plan.max_length {
            let (logits, new_state) = next(&prompt, state, i)?;
            state = new_state;
            let logits = ops::prepare_logits(&logits, rows, plan.compute_dtype)?;
            let log_probs: Vec<Vec<f32>> = ops::log_softmax_last_dim(&logits)?.to_vec2()?;
            let existing: Vec<i64> = prompt
                .narrow(1, i, 1)?
                .squeeze(1)?
                .to_dtype(DType::I64)?
                .to_vec1()?;
            let masked: Vec<u8> = mask.narrow(1, i, 1)?.squeeze(1)?.to_vec1()?;

            let mut parents = Vec::with_capacity(rows);
            let mut tokens = Vec::with_capacity(rows);
            let mut next_scores = Vec::with_capacity(rows);
            for row in 0..plan.batch_size {
                let mut candidates = Vec::new();
                for beam in 0..num_beams {
                    let g = row * num_beams + beam;
                    let forced = existing[g] as u32;
                    if done[g] != 0 {
                        candidates.push(Candidate {
                            score: scores[g],
                            parent: g,
                            token: forced,
                        });
                    } else if masked[g] != 0 {
                        let lp = log_probs[g].get(forced as usize).copied().unwrap_or(0.0);
                        candidates.push(Candidate {
                            score: scores[g] + lp,
                            parent: g,
                            token: forced,
                        });
                    } else {
                        candidates.extend(best_continuations(&log_probs[g], scores[g], g, num_beams));
                    }
                }
                candidates.sort_by(Candidate::rank);
                for c in candidates.into_iter().take(num_beams) {
                    parents.push(c.parent as u32);
                    tokens.push(c.token);
                    next_scores.push(c.score);
                }
            }

            let parents = Tensor::from_vec(parents, (rows,), &device)?;
            prompt = prompt.index_select(&parents, 0)?;
            state = state.select_rows(&parents)?;
            let parent_done = Tensor::from_vec(done, (rows,), &device)?.index_select(&parents, 0)?;
            let tokens = Tensor::from_vec(tokens, (rows,), &device)?;
            trace!("beam step {i}: {tokens}");
            let written = generate::masked_write(&prompt, &tokens, &parent_done, &mask, i, end_token_id)?;
            prompt = written.prompt;
            done = written.done.to_vec1()?;
            scores = next_scores;

            if execution.enforce_eager && end_token_id.is_some() && done.iter().all(|&d| d != 0) {
                debug!("beam search: all hypotheses finished at index {i}");
                break;
            }
        }

        let sequences = prompt.reshape((plan.batch_size, num_beams, plan.max_length))?;
        let scores = Tensor::from_vec(scores, (plan.batch_size, num_beams), &device)?;
        Ok(BeamOutput { sequences, scores })
    }
}

/// The `n` best single-token continuations of one hypothesis. No other
/// continuation of this hypothesis can survive the step.
fn best_continuations(log_probs: &[f32], score: f32, parent: usize, n: usize) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = log_probs
        .iter()
        .enumerate()
        .map(|(token, lp)| Candidate {
            score: score + lp,
            parent,
            token: token as u32,
        })
        .collect();
    if candidates.len() > n {
        candidates.select_nth_unstable_by(n - 1, Candidate::rank);
        candidates.truncate(n);
    }
    candidates
}
