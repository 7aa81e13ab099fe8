use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::info;
use tch::Device;

use sentiment_core::{CheckpointStore, ModelConfig};
use tokenizer::{Vocab, WordEncoder};
use trainer::{cross_entropy, evaluate, load_records, split_records, BatchSource, Trainer, TrainerConfig};

#[derive(Parser)]
#[command(name = "sentiment-train", about = "Fine-tune the sentiment classifier")]
struct Cli {
    /// Labeled dataset (.csv or .json with text + label columns)
    #[arg(short, long)]
    dataset: PathBuf,

    /// Optional model config YAML; defaults apply when absent
    #[arg(long, default_value = "configs/model_config.yaml")]
    model_config: PathBuf,

    /// Optional training config YAML; defaults apply when absent
    #[arg(long, default_value = "configs/training_config.yaml")]
    training_config: PathBuf,
}

fn load_yaml_or_default<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    } else {
        Ok(T::default())
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut model_config: ModelConfig = load_yaml_or_default(&cli.model_config)?;
    let trainer_config: TrainerConfig = load_yaml_or_default(&cli.training_config)?;
    let label_space = trainer_config.label_space;

    let device = Device::cuda_if_available();
    info!("using device: {device:?}");

    let records = load_records(&cli.dataset, label_space)?;
    info!("loaded {} records from {}", records.len(), cli.dataset.display());

    let (train_records, val_records, test_records) = split_records(
        records,
        trainer_config.val_fraction,
        trainer_config.test_fraction,
        trainer_config.seed,
    )?;
    info!(
        "split: {} train / {} val / {} test",
        train_records.len(),
        val_records.len(),
        test_records.len()
    );

    // Vocabulary comes from the training split only.
    let texts: Vec<&str> = train_records.iter().map(|r| r.text.as_str()).collect();
    let vocab = Vocab::build(&texts, trainer_config.min_token_freq);
    model_config.vocab_size = vocab.len() as i64;
    model_config.n_classes = label_space.n_classes();

    let run_id = format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"));
    let store = CheckpointStore::create(
        &trainer_config.checkpoint_dir,
        &run_id,
        &model_config,
        label_space,
    )?;
    vocab
        .save(store.run_dir().join("vocab.json"))
        .context("failed to persist vocabulary")?;

    let encoder = WordEncoder::new(vocab).context("failed to build encoder")?;
    let train_source = BatchSource::new(
        &train_records,
        &encoder,
        model_config.max_len,
        trainer_config.batch_size,
        device,
    )?;
    let val_source = BatchSource::new(
        &val_records,
        &encoder,
        model_config.max_len,
        trainer_config.batch_size,
        device,
    )?;
    let test_source = BatchSource::new(
        &test_records,
        &encoder,
        model_config.max_len,
        trainer_config.batch_size,
        device,
    )?;

    let mut trainer = Trainer::new(&model_config, trainer_config, store, device)?;
    let report = trainer.train(&train_source, &val_source)?;

    info!(
        "run complete: {} epochs, best val_acc {:.4}",
        report.history.len(),
        report.best_val_accuracy
    );

    // Final held-out evaluation with the run's final parameter state.
    if !test_source.is_empty() {
        let test = evaluate(trainer.model(), &test_source, cross_entropy)?;
        info!(
            "test set: loss {:.4} accuracy {:.4} over {} examples",
            test.avg_loss,
            test.accuracy,
            test.true_labels.len()
        );
    }

    Ok(())
}
