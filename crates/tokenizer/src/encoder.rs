use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenizerError};
use crate::vocab::{Vocab, PAD_TOKEN, UNK_TOKEN};
use crate::split_words;

/// One encoded example: fixed-length id sequence plus the matching
/// attention mask (1 for real tokens, 0 for padding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

/// Vocabulary-lookup encoder implementing the tokenizer contract:
/// `encode(text, max_len)` -> ids + mask, truncated on overflow and
/// right-padded on underflow, always exactly `max_len` long.
pub struct WordEncoder {
    vocab: Vocab,
    pad_id: i64,
    unk_id: i64,
}

impl WordEncoder {
    pub fn new(vocab: Vocab) -> Result<Self> {
        let pad_id = vocab
            .get_id(PAD_TOKEN)
            .ok_or_else(|| TokenizerError::MissingSpecial(PAD_TOKEN.to_string()))?;
        let unk_id = vocab
            .get_id(UNK_TOKEN)
            .ok_or_else(|| TokenizerError::MissingSpecial(UNK_TOKEN.to_string()))?;
        Ok(Self {
            vocab,
            pad_id,
            unk_id,
        })
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn encode(&self, text: &str, max_len: usize) -> Result<Encoding> {
        if max_len == 0 {
            return Err(TokenizerError::EmptyLength);
        }

        let mut input_ids: Vec<i64> = split_words(text)
            .into_iter()
            .take(max_len)
            .map(|word| self.vocab.get_id(&word).unwrap_or(self.unk_id))
            .collect();

        let real = input_ids.len();
        input_ids.resize(max_len, self.pad_id);

        let mut attention_mask = vec![1i64; real];
        attention_mask.resize(max_len, 0);

        Ok(Encoding {
            input_ids,
            attention_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> WordEncoder {
        let vocab = Vocab::build(&["this movie was great", "this movie was awful"], 1);
        WordEncoder::new(vocab).unwrap()
    }

    #[test]
    fn pads_short_text_to_max_len() {
        let enc = encoder().encode("this movie", 6).unwrap();
        assert_eq!(enc.input_ids.len(), 6);
        assert_eq!(enc.attention_mask, vec![1, 1, 0, 0, 0, 0]);
        assert_eq!(enc.input_ids[2..], [0, 0, 0, 0]);
    }

    #[test]
    fn truncates_long_text() {
        let enc = encoder()
            .encode("this movie was great great great great", 3)
            .unwrap();
        assert_eq!(enc.input_ids.len(), 3);
        assert_eq!(enc.attention_mask, vec![1, 1, 1]);
    }

    #[test]
    fn unknown_words_map_to_unk() {
        let e = encoder();
        let enc = e.encode("zyzzyva", 2).unwrap();
        assert_eq!(enc.input_ids[0], 1); // <unk>
        assert_eq!(enc.attention_mask, vec![1, 0]);
    }

    #[test]
    fn encode_is_deterministic_and_case_insensitive() {
        let e = encoder();
        let a = e.encode("This MOVIE was great!", 8).unwrap();
        let b = e.encode("this movie was great!", 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_text_is_all_padding() {
        let enc = encoder().encode("", 4).unwrap();
        assert_eq!(enc.input_ids, vec![0, 0, 0, 0]);
        assert_eq!(enc.attention_mask, vec![0, 0, 0, 0]);
    }

    #[test]
    fn zero_max_len_is_an_error() {
        assert!(matches!(
            encoder().encode("hi", 0),
            Err(TokenizerError::EmptyLength)
        ));
    }
}
