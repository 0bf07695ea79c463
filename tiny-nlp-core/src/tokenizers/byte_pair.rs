//! Byte-level byte-pair encoding, as used by GPT-2.
//!
//! Text is first split into words with the GPT-2 pattern (contractions,
//! letter runs, number runs, punctuation runs, whitespace), every byte of a
//! word is mapped to a printable character, and merge rules are applied to
//! adjacent symbols in rank order until none applies. The resulting symbols
//! are looked up in the vocabulary.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::settings;
use crate::error::{Error, Result};
use crate::tokenizers::bytes::{byte_decoder, byte_encoder};
use crate::tokenizers::Tokenizer;

const SPLIT_PATTERN: &str = r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+";

/// Serialized form of a [`BytePairTokenizer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BytePairTokenizerConfig {
    pub vocabulary: BTreeMap<String, u32>,
    /// Merge rules, highest priority first, as `"left right"`.
    pub merges: Vec<String>,
    /// Tokens matched literally in the input and never split.
    #[serde(default)]
    pub unsplittable_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "BytePairTokenizerConfig", into = "BytePairTokenizerConfig")]
pub struct BytePairTokenizer {
    config: BytePairTokenizerConfig,
    id_to_token: HashMap<u32, String>,
    merge_ranks: HashMap<(String, String), usize>,
    byte_encoder: [char; 256],
    byte_decoder: HashMap<char, u8>,
    split: Regex,
    unsplittable: Option<Regex>,
    cache: Arc<RwLock<HashMap<String, Vec<u32>>>>,
    cache_capacity: usize,
}

impl BytePairTokenizer {
    pub fn new<V, M, S>(vocabulary: V, merges: M) -> Result<Self>
    where
        V: IntoIterator<Item = (S, u32)>,
        M: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_config(BytePairTokenizerConfig {
            vocabulary: vocabulary.into_iter().map(|(t, id)| (t.into(), id)).collect(),
            merges: merges.into_iter().map(Into::into).collect(),
            unsplittable_tokens: Vec::new(),
        })
    }

    pub fn from_config(config: BytePairTokenizerConfig) -> Result<Self> {
        if config.vocabulary.is_empty() {
            return Err(Error::Tokenizer("vocabulary is empty".to_string()));
        }
        let mut merge_ranks = HashMap::with_capacity(config.merges.len());
        for (rank, merge) in config.merges.iter().enumerate() {
            let mut parts = merge.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(left), Some(right), None) => {
                    merge_ranks
                        .entry((left.to_string(), right.to_string()))
                        .or_insert(rank);
                }
                _ => {
                    return Err(Error::Tokenizer(format!(
                        "merge rule {rank} must be two space separated symbols, got {merge:?}"
                    )))
                }
            }
        }
        for token in &config.unsplittable_tokens {
            if !config.vocabulary.contains_key(token) {
                return Err(Error::Tokenizer(format!(
                    "unsplittable token {token:?} is not in the vocabulary"
                )));
            }
        }
        let unsplittable = if config.unsplittable_tokens.is_empty() {
            None
        } else {
            let mut tokens = config.unsplittable_tokens.clone();
            tokens.sort_by_key(|t| std::cmp::Reverse(t.len()));
            let pattern = tokens.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
            Some(Regex::new(&pattern).map_err(|e| Error::Tokenizer(e.to_string()))?)
        };
        let split = Regex::new(SPLIT_PATTERN).map_err(|e| Error::Tokenizer(e.to_string()))?;
        let id_to_token = config
            .vocabulary
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();
        let byte_encoder = byte_encoder();
        let byte_decoder = byte_decoder(&byte_encoder);
        Ok(Self {
            config,
            id_to_token,
            merge_ranks,
            byte_encoder,
            byte_decoder,
            split,
            unsplittable,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_capacity: settings::BPE_CACHE_CAPACITY,
        })
    }

    /// Bound the per-word cache. Once full it is cleared before the next
    /// insert; `0` disables caching.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[cfg(test)]
    fn cached_words(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Register additional tokens that are matched literally.
    pub fn with_unsplittable_tokens<S: Into<String>>(
        self,
        tokens: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let capacity = self.cache_capacity;
        let mut config = self.config;
        for token in tokens {
            let token = token.into();
            if !config.unsplittable_tokens.contains(&token) {
                config.unsplittable_tokens.push(token);
            }
        }
        Ok(Self::from_config(config)?.with_cache_capacity(capacity))
    }

    pub fn config(&self) -> &BytePairTokenizerConfig {
        &self.config
    }

    /// GPT-2 word split. A run of whitespace followed by a word leaves its
    /// last whitespace character to the word.
    pub(crate) fn split_words<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut words = Vec::new();
        let mut pos = 0;
        while pos < text.len() {
            let Some(m) = self.split.find_at(text, pos) else {
                break;
            };
            let word = m.as_str();
            let mut end = m.end();
            if word.chars().all(char::is_whitespace) && end < text.len() {
                if let Some(last) = word.chars().last() {
                    if word.chars().count() > 1 {
                        end -= last.len_utf8();
                    }
                }
            }
            words.push(&text[m.start()..end]);
            pos = end;
        }
        words
    }

    fn encode_word(&self, word: &str) -> Result<Vec<u32>> {
        let symbols: String = word.bytes().map(|b| self.byte_encoder[b as usize]).collect();
        if let Ok(cache) = self.cache.read() {
            if let Some(ids) = cache.get(&symbols) {
                return Ok(ids.clone());
            }
        }
        let ids = self
            .merge(&symbols)
            .into_iter()
            .map(|part| {
                self.config.vocabulary.get(&part).copied().ok_or_else(|| {
                    Error::Tokenizer(format!("token {part:?} is not in the vocabulary"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        trace!("bpe {symbols:?} -> {ids:?}");
        if self.cache_capacity > 0 {
            if let Ok(mut cache) = self.cache.write() {
                if cache.len() >= self.cache_capacity {
                    debug!("bpe cache reached {} words, clearing", cache.len());
                    cache.clear();
                }
                cache.insert(symbols, ids.clone());
            }
        }
        Ok(ids)
    }

    /// Apply merge rules to the characters of `word`, lowest rank first.
    fn merge(&self, word: &str) -> Vec<String> {
        let mut parts: Vec<String> = word.chars().map(String::from).collect();
        while parts.len() > 1 {
            let best = parts
                .windows(2)
                .filter_map(|pair| {
                    self.merge_ranks
                        .get(&(pair[0].clone(), pair[1].clone()))
                        .map(|&rank| (rank, pair))
                })
                .min_by_key(|(rank, _)| *rank)
                .map(|(_, pair)| (pair[0].clone(), pair[1].clone()));
            let Some((left, right)) = best else {
                break;
            };
            let mut merged = Vec::with_capacity(parts.len());
            let mut i = 0;
            while i < parts.len() {
                if i + 1 < parts.len() && parts[i] == left && parts[i + 1] == right {
                    merged.push(format!("{left}{right}"));
                    i += 2;
                } else {
                    merged.push(std::mem::take(&mut parts[i]));
                    i += 1;
                }
            }
            parts = merged;
        }
        parts
    }

    fn tokenize_plain(&self, text: &str, out: &mut Vec<u32>) -> Result<()> {
        for word in self.split_words(text) {
            out.extend(self.encode_word(word)?);
        }
        Ok(())
    }
}

impl Tokenizer for BytePairTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        let Some(special) = &self.unsplittable else {
            self.tokenize_plain(text, &mut ids)?;
            return Ok(ids);
        };
        let mut last = 0;
        for m in special.find_iter(text) {
            self.tokenize_plain(&text[last..m.start()], &mut ids)?;
            if let Some(&id) = self.config.vocabulary.get(m.as_str()) {
                ids.push(id);
            }
            last = m.end();
        }
        self.tokenize_plain(&text[last..], &mut ids)?;
        Ok(ids)
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String> {
        let mut bytes = Vec::new();
        for &id in ids {
            let token = self
                .id_to_token
                .get(&id)
                .ok_or_else(|| Error::Tokenizer(format!("id {id} is not in the vocabulary")))?;
            for c in token.chars() {
                match self.byte_decoder.get(&c) {
                    Some(&b) => bytes.push(b),
                    None => {
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocabulary_size(&self) -> usize {
        self.config.vocabulary.len()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.config.vocabulary.get(token).copied()
    }

    fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }
}

impl PartialEq for BytePairTokenizer {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
    }
}

impl TryFrom<BytePairTokenizerConfig> for BytePairTokenizer {
    type Error = Error;

    fn try_from(config: BytePairTokenizerConfig) -> Result<Self> {
        Self::from_config(config)
    }
}

impl From<BytePairTokenizer> for BytePairTokenizerConfig {
    fn from(tokenizer: BytePairTokenizer) -> Self {
        tokenizer.config
    }
}
