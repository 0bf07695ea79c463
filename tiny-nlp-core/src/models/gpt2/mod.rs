pub mod preprocessor;
pub mod tokenizer;

pub use preprocessor::{Features, Gpt2Preprocessor, PreprocessOverrides, TextInput};
pub use tokenizer::{Gpt2Tokenizer, END_OF_TEXT};

#[cfg(test)]
pub(crate) mod test_utils {
    use super::Gpt2Tokenizer;

    pub fn vocab() -> Vec<(&'static str, u32)> {
        vec![
            ("!", 0),
            ("air", 1),
            ("Ġair", 2),
            ("plane", 3),
            ("Ġat", 4),
            ("port", 5),
            ("<|endoftext|>", 6),
        ]
    }

    pub fn merges() -> Vec<&'static str> {
        vec![
            "Ġ a", "Ġ t", "Ġ i", "Ġ b", "a i", "p l", "n e", "Ġa t", "p o", "r t", "Ġt h", "ai r",
            "pl a", "po rt", "Ġai r", "Ġa i", "pla ne",
        ]
    }

    pub fn tokenizer() -> Gpt2Tokenizer {
        Gpt2Tokenizer::new(vocab(), merges()).unwrap()
    }
}
