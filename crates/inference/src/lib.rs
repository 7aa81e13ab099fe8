pub mod metrics;
pub mod predictor;

pub use metrics::Metrics;
pub use predictor::{Prediction, Predictor, ServingConfig};
