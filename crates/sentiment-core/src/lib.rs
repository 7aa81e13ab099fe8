pub mod checkpoint;
pub mod config;
pub mod error;
pub mod labels;
pub mod model;
pub mod safetensors_util;

pub use checkpoint::{CheckpointHandle, CheckpointMeta, CheckpointStore};
pub use config::ModelConfig;
pub use error::{Result, SentimentError};
pub use labels::LabelSpace;
pub use model::SentimentClassifier;
