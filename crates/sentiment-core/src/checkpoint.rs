use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tch::nn;

use crate::config::ModelConfig;
use crate::error::{Result, SentimentError};
use crate::labels::LabelSpace;
use crate::safetensors_util;

/// Metadata persisted next to every parameter snapshot and in the
/// best-pointer file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub run_id: String,
    pub epoch: usize,
    pub val_accuracy: f64,
    pub timestamp: String,
    pub model: ModelConfig,
    pub label_space: LabelSpace,
}

/// Handle to one immutable snapshot. Saving never rewrites a previously
/// returned handle's files; a superseded snapshot merely stops being
/// referenced by `best.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointHandle {
    pub weights: PathBuf,
    pub meta: CheckpointMeta,
}

/// Filesystem checkpoint store. Layout:
///
/// ```text
/// <root>/best.json                                  current best pointer
/// <root>/<run_id>/checkpoint_epoch_N.safetensors    parameter snapshots
/// <root>/<run_id>/checkpoint_epoch_N.json           per-snapshot metadata
/// <root>/<run_id>/history.json                      per-run training history
/// ```
pub struct CheckpointStore {
    root: PathBuf,
    run_dir: PathBuf,
    run_id: String,
    model: ModelConfig,
    label_space: LabelSpace,
}

impl CheckpointStore {
    /// Opens (and creates) the run directory for a new training run.
    pub fn create(
        root: impl AsRef<Path>,
        run_id: &str,
        model: &ModelConfig,
        label_space: LabelSpace,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let run_dir = root.join(run_id);
        fs::create_dir_all(&run_dir).map_err(|e| {
            SentimentError::Checkpoint(format!("create {}: {}", run_dir.display(), e))
        })?;
        Ok(Self {
            root,
            run_dir,
            run_id: run_id.to_string(),
            model: model.clone(),
            label_space,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Persists the current parameter state as the new best snapshot for
    /// this run and repoints `best.json` at it. The Trainer calls this at
    /// most once per epoch, so saves within a run are serialized by
    /// construction.
    pub fn save(&self, epoch: usize, vs: &nn::VarStore, val_accuracy: f64) -> Result<CheckpointHandle> {
        let weights = self.run_dir.join(format!("checkpoint_epoch_{epoch}.safetensors"));
        vs.save(&weights).map_err(|e| {
            SentimentError::Checkpoint(format!("write {}: {}", weights.display(), e))
        })?;

        let meta = CheckpointMeta {
            run_id: self.run_id.clone(),
            epoch,
            val_accuracy,
            timestamp: Utc::now().to_rfc3339(),
            model: self.model.clone(),
            label_space: self.label_space,
        };
        let handle = CheckpointHandle {
            weights: weights.clone(),
            meta,
        };

        let meta_path = self.run_dir.join(format!("checkpoint_epoch_{epoch}.json"));
        write_json(&meta_path, &handle)?;
        write_json(&self.root.join("best.json"), &handle)?;

        Ok(handle)
    }

    /// Restores a snapshot into `vs`. The VarStore must already hold a model
    /// of the shape recorded in the handle's metadata.
    pub fn load(handle: &CheckpointHandle, vs: &mut nn::VarStore) -> Result<()> {
        safetensors_util::load_safetensors(vs, &handle.weights)
    }

    /// Reads the current best pointer under `root`, if any run has ever
    /// checkpointed there.
    pub fn latest_best(root: impl AsRef<Path>) -> Result<Option<CheckpointHandle>> {
        let pointer = root.as_ref().join("best.json");
        if !pointer.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&pointer).map_err(|e| {
            SentimentError::Checkpoint(format!("read {}: {}", pointer.display(), e))
        })?;
        let handle: CheckpointHandle = serde_json::from_str(&content).map_err(|e| {
            SentimentError::Checkpoint(format!("parse {}: {}", pointer.display(), e))
        })?;
        Ok(Some(handle))
    }

    /// Persists the per-run training history as JSON.
    pub fn write_history<T: Serialize>(&self, history: &[T]) -> Result<()> {
        write_json(&self.run_dir.join("history.json"), &history)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SentimentError::Checkpoint(format!("serialize {}: {}", path.display(), e)))?;
    fs::write(path, json)
        .map_err(|e| SentimentError::Checkpoint(format!("write {}: {}", path.display(), e)))
}
