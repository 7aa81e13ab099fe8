use tch::{nn, Kind, Tensor};

use crate::config::ModelConfig;
use crate::error::Result;

/// Sentiment classifier: token embeddings, mask-weighted mean pooling, and a
/// GELU MLP head producing one logit per class.
///
/// The only call-order state is the explicit `train` flag on `forward`, which
/// toggles dropout; in inference mode the output is deterministic for
/// identical input.
pub struct SentimentClassifier {
    wte: nn::Embedding,
    fc: nn::Linear,
    head: nn::Linear,
    dropout: f64,
    pub config: ModelConfig,
}

impl SentimentClassifier {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Result<Self> {
        config.validate()?;

        let wte = nn::embedding(
            vs / "wte",
            config.vocab_size,
            config.n_embd,
            Default::default(),
        );
        let fc = nn::linear(vs / "fc", config.n_embd, config.n_hidden, Default::default());
        let head = nn::linear(
            vs / "head",
            config.n_hidden,
            config.n_classes,
            Default::default(),
        );

        Ok(Self {
            wte,
            fc,
            head,
            dropout: config.dropout,
            config: config.clone(),
        })
    }

    /// Forward pass.
    /// input_ids, attention_mask: [batch, max_len]
    /// Returns logits: [batch, n_classes]
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Tensor {
        let emb = input_ids.apply(&self.wte); // [b, t, e]
        let mask = attention_mask.to_kind(Kind::Float).unsqueeze(-1); // [b, t, 1]

        // Mean over real (unmasked) positions only; an all-padding row
        // degenerates to zeros rather than dividing by zero.
        let summed = (emb * &mask).sum_dim_intlist(Some(&[1i64][..]), false, Kind::Float);
        let counts = mask
            .sum_dim_intlist(Some(&[1i64][..]), false, Kind::Float)
            .clamp_min(1.0);
        let pooled = summed / counts; // [b, e]

        pooled
            .apply(&self.fc)
            .gelu("none")
            .dropout(self.dropout, train)
            .apply(&self.head)
    }
}

unsafe impl Send for SentimentClassifier {}
unsafe impl Sync for SentimentClassifier {}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn config() -> ModelConfig {
        ModelConfig {
            n_classes: 3,
            vocab_size: 32,
            n_embd: 8,
            n_hidden: 16,
            max_len: 6,
            dropout: 0.1,
        }
    }

    fn batch(device: Device) -> (Tensor, Tensor) {
        let ids = Tensor::from_slice(&[5i64, 9, 2, 0, 0, 0, 7, 7, 1, 4, 3, 0])
            .view([2, 6])
            .to(device);
        let mask = Tensor::from_slice(&[1i64, 1, 1, 0, 0, 0, 1, 1, 1, 1, 1, 0])
            .view([2, 6])
            .to(device);
        (ids, mask)
    }

    #[test]
    fn logits_have_batch_by_class_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = SentimentClassifier::new(&vs.root(), &config()).unwrap();
        let (ids, mask) = batch(Device::Cpu);
        let logits = model.forward(&ids, &mask, false);
        assert_eq!(logits.size(), vec![2, 3]);
    }

    #[test]
    fn inference_mode_is_deterministic() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = SentimentClassifier::new(&vs.root(), &config()).unwrap();
        let (ids, mask) = batch(Device::Cpu);
        let a = model.forward(&ids, &mask, false);
        let b = model.forward(&ids, &mask, false);
        assert_eq!(a.eq_tensor(&b).all().int64_value(&[]), 1);
    }

    #[test]
    fn rejects_degenerate_class_count() {
        let vs = nn::VarStore::new(Device::Cpu);
        let bad = ModelConfig { n_classes: 1, ..config() };
        assert!(SentimentClassifier::new(&vs.root(), &bad).is_err());
    }

    #[test]
    fn all_padding_rows_stay_finite() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = SentimentClassifier::new(&vs.root(), &config()).unwrap();
        let ids = Tensor::zeros(&[1i64, 6], (Kind::Int64, Device::Cpu));
        let mask = Tensor::zeros(&[1i64, 6], (Kind::Int64, Device::Cpu));
        let logits = model.forward(&ids, &mask, false);
        assert_eq!(logits.isfinite().all().int64_value(&[]), 1);
    }
}
