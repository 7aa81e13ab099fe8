pub mod encoder;
pub mod error;
pub mod vocab;

pub use encoder::{Encoding, WordEncoder};
pub use error::{Result, TokenizerError};
pub use vocab::{Vocab, PAD_TOKEN, UNK_TOKEN};

use regex::Regex;
use std::sync::OnceLock;

static WORD_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Lowercases and splits text into word and punctuation tokens.
/// Whitespace never becomes a token.
pub fn split_words(text: &str) -> Vec<String> {
    let pattern = WORD_PATTERN
        .get_or_init(|| Regex::new(r"[a-z0-9']+|[^\sa-z0-9']").expect("static pattern"));
    let lowered = text.to_lowercase();
    pattern
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}
