use serde::{Deserialize, Serialize};

use crate::error::{Result, SentimentError};
use crate::labels::LabelSpace;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of output classes. Fixed at construction time; must match the
    /// configured label space.
    pub n_classes: i64,
    /// Size of the vocabulary the encoder was built with.
    pub vocab_size: i64,
    /// Dimension of the token embeddings.
    pub n_embd: i64,
    /// Hidden width of the classification head.
    pub n_hidden: i64,
    /// Fixed encoded sequence length (padded/truncated).
    pub max_len: usize,
    /// Dropout probability, active only in training mode.
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_classes: 3,
            vocab_size: 0, // set from the tokenizer vocabulary before use
            n_embd: 128,
            n_hidden: 256,
            max_len: 128,
            dropout: 0.1,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_classes <= 1 {
            return Err(SentimentError::InvalidConfig(format!(
                "n_classes must be at least 2, got {}",
                self.n_classes
            )));
        }
        if self.vocab_size <= 0 {
            return Err(SentimentError::InvalidConfig(format!(
                "vocab_size must be positive, got {}",
                self.vocab_size
            )));
        }
        if self.n_embd <= 0 || self.n_hidden <= 0 {
            return Err(SentimentError::InvalidConfig(
                "embedding and hidden dimensions must be positive".to_string(),
            ));
        }
        if self.max_len == 0 {
            return Err(SentimentError::InvalidConfig(
                "max_len must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(SentimentError::InvalidConfig(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// The class count is not free-form: it has to agree with the label
    /// space the artifact is trained and served under.
    pub fn validate_against(&self, space: LabelSpace) -> Result<()> {
        self.validate()?;
        if self.n_classes != space.n_classes() {
            return Err(SentimentError::InvalidConfig(format!(
                "model has {} classes but label space {} defines {}",
                self.n_classes,
                space,
                space.n_classes()
            )));
        }
        Ok(())
    }
}
