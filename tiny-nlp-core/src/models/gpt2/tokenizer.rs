use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};
use crate::tokenizers::{BytePairTokenizer, BytePairTokenizerConfig, Tokenizer};

/// Marks both the start and the end of a GPT-2 sequence.
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// GPT-2 byte-pair tokenizer. `<|endoftext|>` must be part of the vocabulary
/// and is used as start and end marker; padding uses id 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "BytePairTokenizerConfig", into = "BytePairTokenizerConfig")]
pub struct Gpt2Tokenizer {
    inner: BytePairTokenizer,
    end_token_id: u32,
}

impl Gpt2Tokenizer {
    pub fn new<V, M, S>(vocabulary: V, merges: M) -> Result<Self>
    where
        V: IntoIterator<Item = (S, u32)>,
        M: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_byte_pair(BytePairTokenizer::new(vocabulary, merges)?)
    }

    pub fn from_byte_pair(inner: BytePairTokenizer) -> Result<Self> {
        let end_token_id = inner.token_to_id(END_OF_TEXT).ok_or_else(|| {
            Error::Tokenizer(format!("cannot find token `{END_OF_TEXT}` in the vocabulary"))
        })?;
        let inner = inner.with_unsplittable_tokens([END_OF_TEXT])?;
        Ok(Self {
            inner,
            end_token_id,
        })
    }

    pub fn start_token_id(&self) -> u32 {
        self.end_token_id
    }

    pub fn end_token_id(&self) -> u32 {
        self.end_token_id
    }

    pub fn pad_token_id(&self) -> u32 {
        settings::PAD_TOKEN_ID
    }

    pub fn config(&self) -> &BytePairTokenizerConfig {
        self.inner.config()
    }
}

impl Tokenizer for Gpt2Tokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        self.inner.tokenize(text)
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String> {
        self.inner.detokenize(ids)
    }

    fn vocabulary_size(&self) -> usize {
        self.inner.vocabulary_size()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<&str> {
        self.inner.id_to_token(id)
    }
}

impl TryFrom<BytePairTokenizerConfig> for Gpt2Tokenizer {
    type Error = Error;

    fn try_from(config: BytePairTokenizerConfig) -> Result<Self> {
        Self::from_byte_pair(BytePairTokenizer::from_config(config)?)
    }
}

impl From<Gpt2Tokenizer> for BytePairTokenizerConfig {
    fn from(tokenizer: Gpt2Tokenizer) -> Self {
        tokenizer.inner.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gpt2::test_utils::{merges, vocab};

    #[test]
    fn test_special_ids() {
        let t = Gpt2Tokenizer::new(vocab(), merges()).unwrap();
        assert_eq!(t.start_token_id(), 6);
        assert_eq!(t.end_token_id(), 6);
        assert_eq!(t.pad_token_id(), 0);
    }

    #[test]
    fn test_missing_end_token() {
        let err = Gpt2Tokenizer::new([("air", 0)], Vec::<&str>::new()).unwrap_err();
        assert!(matches!(err, Error::Tokenizer(_)));
    }

    #[test]
    fn test_end_token_is_not_split() {
        let t = Gpt2Tokenizer::new(vocab(), merges()).unwrap();
        assert_eq!(t.tokenize("airport<|endoftext|>").unwrap(), vec![1, 5, 6]);
    }

    #[test]
    fn test_serde_roundtrip() {
        let t = Gpt2Tokenizer::new(vocab(), merges()).unwrap();
        let json = serde_json::to_string(&t).unwrap();
        let decoded: Gpt2Tokenizer = serde_json::from_str(&json).unwrap();
        assert_eq!(t, decoded);
    }
}
