use tch::{Kind, Tensor};

use sentiment_core::{Result, SentimentClassifier, SentimentError};

use crate::batch::BatchSource;

/// Loss function over (logits, labels). The trainer and evaluator share the
/// same one so validation loss is comparable to training loss.
pub type LossFn = fn(&Tensor, &Tensor) -> Tensor;

/// Mean cross-entropy over a batch.
pub fn cross_entropy(logits: &Tensor, labels: &Tensor) -> Tensor {
    logits.cross_entropy_for_logits(labels)
}

/// Everything one evaluation pass produces. `avg_loss` is the running
/// average of per-batch mean losses (not weighted by batch size);
/// per-example vectors line up index-for-index.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub avg_loss: f64,
    pub accuracy: f64,
    pub true_labels: Vec<i64>,
    pub predicted: Vec<i64>,
    pub confidences: Vec<f64>,
}

/// Runs the classifier in inference mode over one full pass of
/// `source`, in insertion order. Parameters are never touched.
///
/// An empty source is reported as `EmptyEvalSet` rather than returning a
/// zero or NaN that could be mistaken for a real score; the Trainer
/// propagates that error unchanged.
pub fn evaluate(
    model: &SentimentClassifier,
    source: &BatchSource,
    loss_fn: LossFn,
) -> Result<Evaluation> {
    if source.is_empty() {
        return Err(SentimentError::EmptyEvalSet);
    }

    let _guard = tch::no_grad_guard();

    let mut total_loss = 0.0;
    let mut num_batches = 0usize;
    let mut correct = 0i64;
    let mut total = 0usize;

    let mut true_labels = Vec::with_capacity(source.len());
    let mut predicted = Vec::with_capacity(source.len());
    let mut confidences = Vec::with_capacity(source.len());

    for batch in source.iter(None) {
        let logits = model.forward(&batch.input_ids, &batch.attention_mask, false);
        let loss = loss_fn(&logits, &batch.labels);
        total_loss += loss.double_value(&[]);
        num_batches += 1;

        let probs = logits.softmax(-1, Kind::Float);
        let (max_probs, predictions) = probs.max_dim(-1, false);

        correct += predictions
            .eq_tensor(&batch.labels)
            .sum(Kind::Int64)
            .int64_value(&[]);
        total += batch.len;

        true_labels.extend(Vec::<i64>::try_from(&batch.labels)?);
        predicted.extend(Vec::<i64>::try_from(&predictions)?);
        confidences.extend(Vec::<f64>::try_from(&max_probs)?);
    }

    Ok(Evaluation {
        avg_loss: total_loss / num_batches as f64,
        accuracy: correct as f64 / total as f64,
        true_labels,
        predicted,
        confidences,
    })
}
