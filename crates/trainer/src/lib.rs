pub mod batch;
pub mod data;
pub mod evaluate;
pub mod train;

pub use batch::{Batch, BatchSource};
pub use data::{load_records, split_records, Record};
pub use evaluate::{cross_entropy, evaluate, Evaluation};
pub use train::{EpochMetrics, Trainer, TrainingReport};

use sentiment_core::LabelSpace;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Base seed; each epoch shuffles with `seed + epoch`.
    pub seed: u64,
    pub val_fraction: f64,
    pub test_fraction: f64,
    /// Words seen fewer times than this in the training split stay out of
    /// the vocabulary.
    pub min_token_freq: usize,
    pub label_space: LabelSpace,
    pub checkpoint_dir: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 16,
            epochs: 3,
            seed: 42,
            val_fraction: 0.1,
            test_fraction: 0.1,
            min_token_freq: 1,
            label_space: LabelSpace::ThreeClass,
            checkpoint_dir: "./checkpoints".to_string(),
        }
    }
}
