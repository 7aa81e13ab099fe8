use thiserror::Error;

/// Error taxonomy shared by the whole pipeline. The serving boundary maps
/// these onto HTTP status codes and metric labels; everything below it
/// propagates them unmodified.
#[derive(Error, Debug)]
pub enum SentimentError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid record at {location}: {reason}")]
    InvalidRecord { location: String, reason: String },

    #[error("label {value} outside the declared label set ({allowed})")]
    InvalidLabel { value: i64, allowed: String },

    #[error("unsupported dataset format: {0} (expected .csv or .json)")]
    UnsupportedFormat(String),

    #[error("evaluation set is empty")]
    EmptyEvalSet,

    #[error("non-finite loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },

    #[error("batch shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("checkpoint store failure: {0}")]
    Checkpoint(String),

    #[error("no trained checkpoint available")]
    ModelNotLoaded,

    #[error("label space mismatch: checkpoint was trained with {trained}, serving is configured for {serving}")]
    LabelSpaceMismatch { trained: String, serving: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),
}

impl SentimentError {
    /// Coarse error kind used for metric labels and status-code mapping at
    /// the serving boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            SentimentError::InvalidConfig(_)
            | SentimentError::InvalidRecord { .. }
            | SentimentError::InvalidLabel { .. }
            | SentimentError::UnsupportedFormat(_)
            | SentimentError::EmptyEvalSet => "validation",
            SentimentError::NonFiniteLoss { .. } | SentimentError::ShapeMismatch { .. } => {
                "numeric"
            }
            SentimentError::Checkpoint(_) => "checkpoint",
            SentimentError::ModelNotLoaded | SentimentError::LabelSpaceMismatch { .. } => {
                "unavailable"
            }
            SentimentError::Io(_) | SentimentError::Json(_) | SentimentError::Tch(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, SentimentError>;
