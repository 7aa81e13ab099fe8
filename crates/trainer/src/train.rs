use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tch::{nn, nn::OptimizerConfig, Device, Kind};

use sentiment_core::{
    CheckpointHandle, CheckpointStore, ModelConfig, Result, SentimentClassifier, SentimentError,
};

use crate::batch::BatchSource;
use crate::evaluate::{cross_entropy, evaluate, LossFn};
use crate::TrainerConfig;

/// One row of the training history, appended per completed epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
}

/// What a completed run hands back. The model inside the Trainer is left in
/// its final state; `best` points at the strongest validation snapshot.
#[derive(Debug)]
pub struct TrainingReport {
    pub history: Vec<EpochMetrics>,
    pub best: Option<CheckpointHandle>,
    pub best_val_accuracy: f64,
    pub stopped_early: bool,
}

/// Linear decay from the configured learning rate to zero over the whole
/// run, no warmup. Advanced once per optimizer step.
struct LinearSchedule {
    base_lr: f64,
    total_steps: usize,
    step: usize,
}

impl LinearSchedule {
    fn new(base_lr: f64, total_steps: usize) -> Self {
        Self {
            base_lr,
            total_steps,
            step: 0,
        }
    }

    fn next_lr(&mut self) -> f64 {
        self.step += 1;
        let remaining = 1.0 - self.step as f64 / self.total_steps.max(1) as f64;
        self.base_lr * remaining.max(0.0)
    }
}

/// Orchestrates the run: for each epoch, one full training pass over a
/// freshly shuffled train split, then one evaluation pass over the
/// validation split, then the checkpoint decision. Owns the parameters;
/// nothing else mutates them during a run.
pub struct Trainer {
    config: TrainerConfig,
    model: SentimentClassifier,
    optimizer: nn::Optimizer,
    vs: nn::VarStore,
    store: CheckpointStore,
    stop: Option<Arc<AtomicBool>>,
}

impl Trainer {
    pub fn new(
        model_config: &ModelConfig,
        trainer_config: TrainerConfig,
        store: CheckpointStore,
        device: Device,
    ) -> Result<Self> {
        model_config.validate_against(trainer_config.label_space)?;
        if trainer_config.epochs == 0 {
            return Err(SentimentError::InvalidConfig(
                "epochs must be positive".to_string(),
            ));
        }

        let vs = nn::VarStore::new(device);
        let model = SentimentClassifier::new(&vs.root(), model_config)?;
        let optimizer = nn::AdamW::default().build(&vs, trainer_config.learning_rate)?;

        Ok(Self {
            config: trainer_config,
            model,
            optimizer,
            vs,
            store,
            stop: None,
        })
    }

    /// Installs a cooperative stop flag. It is honored only at epoch
    /// boundaries, after the checkpoint decision and history append, so a
    /// stopped run never has a history entry without its evaluation.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn model(&self) -> &SentimentClassifier {
        &self.model
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn train(
        &mut self,
        train_source: &BatchSource,
        val_source: &BatchSource,
    ) -> Result<TrainingReport> {
        self.train_with_loss(train_source, val_source, cross_entropy)
    }

    /// Runs the full training protocol with an explicit loss function. The
    /// same function scores both the training and validation passes so the
    /// two losses stay comparable.
    pub fn train_with_loss(
        &mut self,
        train_source: &BatchSource,
        val_source: &BatchSource,
        loss_fn: LossFn,
    ) -> Result<TrainingReport> {
        if train_source.is_empty() {
            return Err(SentimentError::InvalidConfig(
                "training split is empty".to_string(),
            ));
        }

        let total_steps = train_source.num_batches() * self.config.epochs;
        let mut schedule = LinearSchedule::new(self.config.learning_rate, total_steps);

        let mut history: Vec<EpochMetrics> = Vec::with_capacity(self.config.epochs);
        let mut best: Option<CheckpointHandle> = None;
        let mut best_val_acc = f64::NEG_INFINITY;
        let mut stopped_early = false;

        info!(
            "run {}: {} epochs, {} train examples, {} val examples, {} steps total",
            self.store.run_id(),
            self.config.epochs,
            train_source.len(),
            val_source.len(),
            total_steps
        );

        for epoch in 0..self.config.epochs {
            let (train_loss, train_acc) =
                self.train_epoch(epoch, train_source, loss_fn, &mut schedule)?;

            let val = evaluate(&self.model, val_source, loss_fn)?;

            info!(
                "epoch {epoch}: train_loss {train_loss:.4} train_acc {train_acc:.4} \
                 val_loss {:.4} val_acc {:.4}",
                val.avg_loss, val.accuracy
            );

            // Strict improvement only; ties keep the earlier snapshot.
            if val.accuracy > best_val_acc {
                let handle = self.store.save(epoch, &self.vs, val.accuracy)?;
                info!(
                    "epoch {epoch}: new best val_acc {:.4}, checkpoint {}",
                    val.accuracy,
                    handle.weights.display()
                );
                best_val_acc = val.accuracy;
                best = Some(handle);
            }

            history.push(EpochMetrics {
                epoch,
                train_loss,
                train_acc,
                val_loss: val.avg_loss,
                val_acc: val.accuracy,
            });

            if let Some(flag) = &self.stop {
                if flag.load(Ordering::Relaxed) {
                    warn!("stop requested, ending run after epoch {epoch}");
                    stopped_early = true;
                    break;
                }
            }
        }

        self.store.write_history(&history)?;

        Ok(TrainingReport {
            history,
            best,
            best_val_accuracy: best_val_acc,
            stopped_early,
        })
    }

    /// One full training pass. Returns (mean batch loss, training accuracy).
    fn train_epoch(
        &mut self,
        epoch: usize,
        source: &BatchSource,
        loss_fn: LossFn,
        schedule: &mut LinearSchedule,
    ) -> Result<(f64, f64)> {
        let shuffle_seed = self.config.seed.wrapping_add(epoch as u64);

        let mut epoch_loss = 0.0;
        let mut num_batches = 0usize;
        let mut correct = 0i64;
        let mut total = 0usize;

        for (batch_idx, batch) in source.iter(Some(shuffle_seed)).enumerate() {
            let logits = self
                .model
                .forward(&batch.input_ids, &batch.attention_mask, true);
            let loss = loss_fn(&logits, &batch.labels);

            let loss_val = loss.double_value(&[]);
            if !loss_val.is_finite() {
                return Err(SentimentError::NonFiniteLoss {
                    epoch,
                    batch: batch_idx,
                });
            }

            self.optimizer.backward_step(&loss);
            self.optimizer.set_lr(schedule.next_lr());

            epoch_loss += loss_val;
            num_batches += 1;

            // Training-time accuracy is bookkeeping only; checkpoint
            // decisions use validation accuracy.
            let _guard = tch::no_grad_guard();
            let predictions = logits.argmax(-1, false);
            correct += predictions
                .eq_tensor(&batch.labels)
                .sum(Kind::Int64)
                .int64_value(&[]);
            total += batch.len;
        }

        Ok((
            epoch_loss / num_batches as f64,
            correct as f64 / total as f64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use sentiment_core::LabelSpace;
    use tokenizer::{Vocab, WordEncoder};

    fn two_class_config(vocab_size: i64) -> ModelConfig {
        // ThreeClass space with the third class unused by the data; the
        // model width still has to match the declared space.
        ModelConfig {
            n_classes: 3,
            vocab_size,
            n_embd: 8,
            n_hidden: 16,
            max_len: 8,
            dropout: 0.0,
        }
    }

    fn trainer_config(epochs: usize) -> TrainerConfig {
        TrainerConfig {
            learning_rate: 1e-3,
            batch_size: 2,
            epochs,
            seed: 42,
            val_fraction: 0.1,
            test_fraction: 0.1,
            min_token_freq: 1,
            label_space: LabelSpace::ThreeClass,
            checkpoint_dir: "unused".to_string(),
        }
    }

    fn sources(device: Device) -> (BatchSource, BatchSource, WordEncoder) {
        let train: Vec<Record> = [
            ("this product is amazing", 1),
            ("terrible experience would not recommend", 0),
            ("pretty good service overall", 1),
            ("not worth the money at all", 0),
            ("absolutely love it best purchase ever", 1),
        ]
        .into_iter()
        .map(|(text, label)| Record {
            text: text.to_string(),
            label,
        })
        .collect();

        let val: Vec<Record> = vec![
            Record {
                text: "really great value".to_string(),
                label: 1,
            },
            Record {
                text: "awful broken useless".to_string(),
                label: 0,
            },
        ];

        let texts: Vec<&str> = train.iter().map(|r| r.text.as_str()).collect();
        let encoder = WordEncoder::new(Vocab::build(&texts, 1)).unwrap();
        let train_source = BatchSource::new(&train, &encoder, 8, 2, device).unwrap();
        let val_source = BatchSource::new(&val, &encoder, 8, 2, device).unwrap();
        (train_source, val_source, encoder)
    }

    #[test]
    fn one_epoch_run_produces_one_history_entry_and_a_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (train_source, val_source, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);

        let store = CheckpointStore::create(
            dir.path(),
            "run-unit",
            &model_config,
            LabelSpace::ThreeClass,
        )
        .unwrap();
        let mut trainer =
            Trainer::new(&model_config, trainer_config(1), store, Device::Cpu).unwrap();

        let report = trainer.train(&train_source, &val_source).unwrap();

        assert_eq!(report.history.len(), 1);
        // val_acc >= 0 > NEG_INFINITY, so exactly one checkpoint exists
        let best = report.best.expect("first epoch always improves on -inf");
        assert!(best.weights.exists());
        assert_eq!(
            std::fs::read_dir(dir.path().join("run-unit"))
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path()
                        .extension()
                        .map_or(false, |ext| ext == "safetensors")
                })
                .count(),
            1
        );
        assert!(dir.path().join("run-unit/history.json").exists());
    }

    #[test]
    fn history_length_matches_epoch_count() {
        let dir = tempfile::tempdir().unwrap();
        let (train_source, val_source, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);

        let store =
            CheckpointStore::create(dir.path(), "run-3ep", &model_config, LabelSpace::ThreeClass)
                .unwrap();
        let mut trainer =
            Trainer::new(&model_config, trainer_config(3), store, Device::Cpu).unwrap();

        let report = trainer.train(&train_source, &val_source).unwrap();
        assert_eq!(report.history.len(), 3);
        for (i, entry) in report.history.iter().enumerate() {
            assert_eq!(entry.epoch, i);
            assert!((0.0..=1.0).contains(&entry.val_acc));
            assert!(entry.train_loss >= 0.0);
        }
    }

    #[test]
    fn checkpointed_epochs_have_strictly_increasing_val_acc() {
        let dir = tempfile::tempdir().unwrap();
        let (train_source, val_source, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);

        let store =
            CheckpointStore::create(dir.path(), "run-mono", &model_config, LabelSpace::ThreeClass)
                .unwrap();
        let mut trainer =
            Trainer::new(&model_config, trainer_config(4), store, Device::Cpu).unwrap();
        let report = trainer.train(&train_source, &val_source).unwrap();

        // collect the saved snapshots' metadata in epoch order
        let mut metas: Vec<sentiment_core::CheckpointHandle> =
            std::fs::read_dir(dir.path().join("run-mono"))
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    name.starts_with("checkpoint_") && name.ends_with(".json")
                })
                .map(|e| {
                    serde_json::from_str(&std::fs::read_to_string(e.path()).unwrap()).unwrap()
                })
                .collect();
        metas.sort_by_key(|h| h.meta.epoch);

        let accs: Vec<f64> = metas.iter().map(|h| h.meta.val_accuracy).collect();
        assert!(accs.windows(2).all(|w| w[1] > w[0]), "not strictly increasing: {accs:?}");
        assert_eq!(report.best_val_accuracy, *accs.last().unwrap());
    }

    #[test]
    fn empty_validation_split_surfaces_a_clear_error() {
        let dir = tempfile::tempdir().unwrap();
        let (train_source, _val, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);
        let empty = BatchSource::new(&[], &encoder, 8, 2, Device::Cpu).unwrap();

        let store =
            CheckpointStore::create(dir.path(), "run-empty", &model_config, LabelSpace::ThreeClass)
                .unwrap();
        let mut trainer =
            Trainer::new(&model_config, trainer_config(1), store, Device::Cpu).unwrap();

        assert!(matches!(
            trainer.train(&train_source, &empty),
            Err(SentimentError::EmptyEvalSet)
        ));
    }

    #[test]
    fn stop_flag_is_honored_at_the_epoch_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let (train_source, val_source, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);

        let store =
            CheckpointStore::create(dir.path(), "run-stop", &model_config, LabelSpace::ThreeClass)
                .unwrap();
        let flag = Arc::new(AtomicBool::new(true)); // raised before the run starts
        let mut trainer = Trainer::new(&model_config, trainer_config(5), store, Device::Cpu)
            .unwrap()
            .with_stop_flag(Arc::clone(&flag));

        let report = trainer.train(&train_source, &val_source).unwrap();
        // the first epoch completes fully (checkpoint decision included),
        // then the run ends
        assert!(report.stopped_early);
        assert_eq!(report.history.len(), 1);
        assert!(report.best.is_some());
    }

    #[test]
    fn linear_schedule_decays_to_zero() {
        let mut s = LinearSchedule::new(0.1, 4);
        let lrs: Vec<f64> = (0..4).map(|_| s.next_lr()).collect();
        assert!((lrs[0] - 0.075).abs() < 1e-12);
        assert!((lrs[1] - 0.05).abs() < 1e-12);
        assert!((lrs[2] - 0.025).abs() < 1e-12);
        assert_eq!(lrs[3], 0.0);
        // never goes negative past the end
        assert_eq!(s.next_lr(), 0.0);
    }

    #[test]
    fn unwritable_store_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (train_source, val_source, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);

        let store =
            CheckpointStore::create(dir.path(), "run-ro", &model_config, LabelSpace::ThreeClass)
                .unwrap();
        let run_dir = store.run_dir().to_path_buf();
        let mut trainer =
            Trainer::new(&model_config, trainer_config(2), store, Device::Cpu).unwrap();

        // replace the run directory with a plain file so the first
        // checkpoint write cannot succeed
        std::fs::remove_dir_all(&run_dir).unwrap();
        std::fs::write(&run_dir, "in the way").unwrap();

        assert!(matches!(
            trainer.train(&train_source, &val_source),
            Err(SentimentError::Checkpoint(_))
        ));
        // the run died before any history or best pointer was recorded
        assert!(!dir.path().join("best.json").exists());
        assert!(run_dir.is_file());
    }

    fn nan_loss(logits: &tch::Tensor, labels: &tch::Tensor) -> tch::Tensor {
        cross_entropy(logits, labels) * f64::NAN
    }

    #[test]
    fn non_finite_loss_aborts_with_the_failing_indices() {
        let dir = tempfile::tempdir().unwrap();
        let (train_source, val_source, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);

        let store =
            CheckpointStore::create(dir.path(), "run-nan", &model_config, LabelSpace::ThreeClass)
                .unwrap();
        let mut trainer =
            Trainer::new(&model_config, trainer_config(2), store, Device::Cpu).unwrap();

        assert!(matches!(
            trainer.train_with_loss(&train_source, &val_source, nan_loss),
            Err(SentimentError::NonFiniteLoss { epoch: 0, batch: 0 })
        ));
        // aborted mid-epoch: no checkpoint, no history
        assert!(!dir.path().join("best.json").exists());
        assert!(!dir.path().join("run-nan/history.json").exists());
    }

    #[test]
    fn empty_training_split_is_a_distinct_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_train, val_source, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);
        let empty = BatchSource::new(&[], &encoder, 8, 2, Device::Cpu).unwrap();

        let store = CheckpointStore::create(
            dir.path(),
            "run-notrain",
            &model_config,
            LabelSpace::ThreeClass,
        )
        .unwrap();
        let mut trainer =
            Trainer::new(&model_config, trainer_config(1), store, Device::Cpu).unwrap();

        match trainer.train(&empty, &val_source) {
            Err(SentimentError::InvalidConfig(msg)) => {
                assert!(msg.contains("training split"), "unexpected message: {msg}")
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let (_t, _v, encoder) = sources(Device::Cpu);
        let model_config = two_class_config(encoder.vocab().len() as i64);
        let store =
            CheckpointStore::create(dir.path(), "run-bad", &model_config, LabelSpace::ThreeClass)
                .unwrap();
        assert!(Trainer::new(&model_config, trainer_config(0), store, Device::Cpu).is_err());
    }
}
