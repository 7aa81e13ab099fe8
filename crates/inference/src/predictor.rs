use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tch::{nn, Device, Kind, Tensor};
use tracing::{info, warn};

use sentiment_core::{
    CheckpointStore, LabelSpace, ModelConfig, Result, SentimentClassifier, SentimentError,
};
use tokenizer::{Vocab, WordEncoder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Checkpoint root holding `best.json` and the run directories.
    pub checkpoint_root: PathBuf,
    /// Label space the server expects. Must match the checkpoint's.
    pub label_space: LabelSpace,
    /// When true, a missing checkpoint falls back to randomly initialized
    /// parameters instead of refusing to start. Off by default; useful only
    /// for smoke-testing the serving path.
    pub allow_untrained: bool,
    pub port: u16,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            checkpoint_root: PathBuf::from("./checkpoints"),
            label_space: LabelSpace::ThreeClass,
            allow_untrained: false,
            port: 8000,
        }
    }
}

/// One classified text.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub index: i64,
    pub label: String,
    pub confidence: f64,
    /// Full distribution, keyed by class name in index order.
    pub probabilities: Vec<(String, f64)>,
}

/// Loads the current best checkpoint and answers predict calls against it.
/// The loaded state is read-only after construction, so a single instance
/// can serve concurrent requests behind an `Arc`.
pub struct Predictor {
    model: SentimentClassifier,
    _vs: nn::VarStore,
    encoder: WordEncoder,
    space: LabelSpace,
    version: String,
    device: Device,
}

impl Predictor {
    pub fn load(config: &ServingConfig, device: Device) -> Result<Self> {
        match CheckpointStore::latest_best(&config.checkpoint_root)? {
            Some(handle) => {
                if handle.meta.label_space != config.label_space {
                    return Err(SentimentError::LabelSpaceMismatch {
                        trained: handle.meta.label_space.to_string(),
                        serving: config.label_space.to_string(),
                    });
                }
                handle.meta.model.validate_against(handle.meta.label_space)?;

                let run_dir = handle
                    .weights
                    .parent()
                    .ok_or_else(|| {
                        SentimentError::Checkpoint(format!(
                            "checkpoint {} has no parent directory",
                            handle.weights.display()
                        ))
                    })?
                    .to_path_buf();
                let vocab = Vocab::load(run_dir.join("vocab.json")).map_err(|e| {
                    SentimentError::Checkpoint(format!("vocabulary for {}: {e}", handle.meta.run_id))
                })?;
                let encoder = WordEncoder::new(vocab)
                    .map_err(|e| SentimentError::Checkpoint(e.to_string()))?;

                let mut vs = nn::VarStore::new(device);
                let model = SentimentClassifier::new(&vs.root(), &handle.meta.model)?;
                CheckpointStore::load(&handle, &mut vs)?;

                info!(
                    run_id = %handle.meta.run_id,
                    epoch = handle.meta.epoch,
                    val_accuracy = handle.meta.val_accuracy,
                    "loaded best checkpoint"
                );

                Ok(Self {
                    model,
                    _vs: vs,
                    encoder,
                    space: handle.meta.label_space,
                    version: format!("{}-epoch{}", handle.meta.run_id, handle.meta.epoch),
                    device,
                })
            }
            None if config.allow_untrained => {
                warn!("no checkpoint found, serving an untrained model");
                let vocab = Vocab::new();
                let model_config = ModelConfig {
                    n_classes: config.label_space.n_classes(),
                    vocab_size: vocab.len() as i64,
                    ..ModelConfig::default()
                };
                let encoder = WordEncoder::new(vocab)
                    .map_err(|e| SentimentError::Checkpoint(e.to_string()))?;
                let vs = nn::VarStore::new(device);
                let model = SentimentClassifier::new(&vs.root(), &model_config)?;
                Ok(Self {
                    model,
                    _vs: vs,
                    encoder,
                    space: config.label_space,
                    version: "untrained".to_string(),
                    device,
                })
            }
            None => Err(SentimentError::ModelNotLoaded),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn predict(&self, text: &str) -> Result<Prediction> {
        let max_len = self.model.config.max_len;
        let encoding = self
            .encoder
            .encode(text, max_len)
            .map_err(|e| SentimentError::InvalidConfig(e.to_string()))?;

        let _guard = tch::no_grad_guard();
        let input_ids = Tensor::from_slice(&encoding.input_ids)
            .view([1, max_len as i64])
            .to(self.device);
        let attention_mask = Tensor::from_slice(&encoding.attention_mask)
            .view([1, max_len as i64])
            .to(self.device);

        let logits = self.model.forward(&input_ids, &attention_mask, false);
        let probs = logits.softmax(-1, Kind::Float).squeeze_dim(0);
        let probs: Vec<f64> = Vec::<f64>::try_from(&probs)?;

        let (index, confidence) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &p)| (i as i64, p))
            .unwrap_or((0, 0.0));

        let label = self
            .space
            .name_of(index)
            .unwrap_or("unknown")
            .to_string();
        let probabilities = self
            .space
            .names()
            .iter()
            .zip(probs.iter())
            .map(|(name, &p)| (name.to_string(), p))
            .collect();

        Ok(Prediction {
            index,
            label,
            confidence,
            probabilities,
        })
    }
}
