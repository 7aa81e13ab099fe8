use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::split_words;

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

/// Word-level vocabulary. Ids 0 and 1 are reserved for padding and
/// unknown-word tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocab {
    pub token_to_id: HashMap<String, i64>,
    pub id_to_token: HashMap<i64, String>,
}

impl Vocab {
    pub fn new() -> Self {
        let mut vocab = Self {
            token_to_id: HashMap::new(),
            id_to_token: HashMap::new(),
        };
        vocab.insert(PAD_TOKEN.to_string(), 0);
        vocab.insert(UNK_TOKEN.to_string(), 1);
        vocab
    }

    /// Builds a vocabulary from a corpus, keeping words seen at least
    /// `min_freq` times. Ids are assigned in descending frequency order
    /// (ties broken alphabetically) so builds are deterministic.
    pub fn build<S: AsRef<str> + Sync>(texts: &[S], min_freq: usize) -> Self {
        let counts: HashMap<String, usize> = texts
            .par_iter()
            .fold(HashMap::new, |mut acc, text| {
                for word in split_words(text.as_ref()) {
                    *acc.entry(word).or_insert(0) += 1;
                }
                acc
            })
            .reduce(HashMap::new, |mut a, b| {
                for (word, n) in b {
                    *a.entry(word).or_insert(0) += n;
                }
                a
            });

        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n >= min_freq.max(1))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut vocab = Self::new();
        for (word, _) in ranked {
            let id = vocab.len() as i64;
            vocab.insert(word, id);
        }
        vocab
    }

    pub fn insert(&mut self, token: String, id: i64) {
        self.token_to_id.insert(token.clone(), id);
        self.id_to_token.insert(id, token);
    }

    pub fn get_id(&self, token: &str) -> Option<i64> {
        self.token_to_id.get(token).copied()
    }

    pub fn get_token(&self, id: i64) -> Option<&String> {
        self.id_to_token.get(&id)
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.token_to_id)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let token_to_id: HashMap<String, i64> = serde_json::from_reader(reader)?;

        let mut id_to_token = HashMap::new();
        for (token, id) in &token_to_id {
            id_to_token.insert(*id, token.clone());
        }

        Ok(Self {
            token_to_id,
            id_to_token,
        })
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}
