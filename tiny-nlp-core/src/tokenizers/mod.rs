//! Tokenizers turning raw text into integer token ids.

pub mod byte_pair;
mod bytes;

use crate::error::Result;

pub use byte_pair::{BytePairTokenizer, BytePairTokenizerConfig};

pub trait Tokenizer {
    /// Split `text` into token ids.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Turn token ids back into text. Unknown ids are an error.
    fn detokenize(&self, ids: &[u32]) -> Result<String>;

    fn vocabulary_size(&self) -> usize;

    fn token_to_id(&self, token: &str) -> Option<u32>;

    fn id_to_token(&self, id: u32) -> Option<&str>;
}
