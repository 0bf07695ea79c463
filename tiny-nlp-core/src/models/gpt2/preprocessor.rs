use candle_core::{Device, Tensor};
use log::debug;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::Result;
use crate::layers::start_end_packer::{PackOptions, StartEndPacker};
use crate::models::gpt2::tokenizer::Gpt2Tokenizer;
use crate::tokenizers::Tokenizer;

/// Raw text handed to the preprocessor.
#[derive(Debug, Clone, PartialEq)]
pub enum TextInput {
    Single(String),
    Batch(Vec<String>),
}

impl From<&str> for TextInput {
    fn from(s: &str) -> Self {
        TextInput::Single(s.to_owned())
    }
}

impl From<String> for TextInput {
    fn from(s: String) -> Self {
        TextInput::Single(s)
    }
}

impl From<Vec<String>> for TextInput {
    fn from(v: Vec<String>) -> Self {
        TextInput::Batch(v)
    }
}

impl From<Vec<&str>> for TextInput {
    fn from(v: Vec<&str>) -> Self {
        TextInput::Batch(v.into_iter().map(str::to_owned).collect())
    }
}

impl<const N: usize> From<[&str; N]> for TextInput {
    fn from(v: [&str; N]) -> Self {
        TextInput::Batch(v.iter().map(|s| (*s).to_owned()).collect())
    }
}

/// Dense model inputs. Rank 1 for a single string, rank 2 for a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub token_ids: ArrayD<i64>,
    pub padding_mask: ArrayD<u8>,
}

impl Features {
    /// `(token_ids, padding_mask)` as I64 and U8 tensors.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let ids = self.token_ids.as_standard_layout();
        let mask = self.padding_mask.as_standard_layout();
        let token_ids = Tensor::from_iter(ids.iter().copied(), device)?.reshape(ids.shape())?;
        let padding_mask = Tensor::from_iter(mask.iter().copied(), device)?.reshape(mask.shape())?;
        Ok((token_ids, padding_mask))
    }
}

/// Per-call overrides; `None` keeps the configured value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessOverrides {
    pub sequence_length: Option<usize>,
    pub add_start_token: Option<bool>,
    pub add_end_token: Option<bool>,
}

fn default_sequence_length() -> usize {
    settings::SEQUENCE_LENGTH
}

fn enabled() -> bool {
    true
}

/// Tokenizes raw strings and packs them with `<|endoftext|>` markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gpt2Preprocessor {
    pub tokenizer: Gpt2Tokenizer,
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,
    #[serde(default = "enabled")]
    pub add_start_token: bool,
    #[serde(default = "enabled")]
    pub add_end_token: bool,
}

impl Gpt2Preprocessor {
    pub fn new(tokenizer: Gpt2Tokenizer, sequence_length: usize) -> Self {
        Self {
            tokenizer,
            sequence_length,
            add_start_token: true,
            add_end_token: true,
        }
    }

    pub fn with_add_start_token(mut self, add: bool) -> Self {
        self.add_start_token = add;
        self
    }

    pub fn with_add_end_token(mut self, add: bool) -> Self {
        self.add_end_token = add;
        self
    }

    pub fn preprocess(&self, inputs: impl Into<TextInput>) -> Result<Features> {
        self.preprocess_with(inputs, PreprocessOverrides::default())
    }

    pub fn preprocess_with(
        &self,
        inputs: impl Into<TextInput>,
        overrides: PreprocessOverrides,
    ) -> Result<Features> {
        let (texts, single) = match inputs.into() {
            TextInput::Single(s) => (vec![s], true),
            TextInput::Batch(v) => (v, false),
        };
        let sequences = texts
            .iter()
            .map(|t| self.tokenizer.tokenize(t))
            .collect::<Result<Vec<_>>>()?;

        let packer = StartEndPacker::new(self.sequence_length)?
            .with_start_value(self.tokenizer.start_token_id())
            .with_end_value(self.tokenizer.end_token_id())
            .with_pad_value(self.tokenizer.pad_token_id());
        let options = PackOptions {
            sequence_length: overrides.sequence_length,
            add_start_value: overrides.add_start_token.unwrap_or(self.add_start_token),
            add_end_value: overrides.add_end_token.unwrap_or(self.add_end_token),
        };
        let (token_ids, padding_mask) = packer.pack_with(&sequences, options)?;
        debug!(
            "preprocessed {} sequence(s) to shape {:?}",
            sequences.len(),
            token_ids.dim()
        );

        let (token_ids, padding_mask) = if single {
            (
                token_ids.index_axis_move(Axis(0), 0).into_dyn(),
                padding_mask.index_axis_move(Axis(0), 0).into_dyn(),
            )
        } else {
            (token_ids.into_dyn(), padding_mask.into_dyn())
        };
        Ok(Features {
            token_ids,
            padding_mask,
        })
    }

    /// Preprocess `inputs` and hand labels and sample weights back unchanged.
    pub fn preprocess_labeled<Y, W>(
        &self,
        inputs: impl Into<TextInput>,
        labels: Option<Y>,
        sample_weights: Option<W>,
    ) -> Result<(Features, Option<Y>, Option<W>)> {
        Ok((self.preprocess(inputs)?, labels, sample_weights))
    }
}
