use std::fs::File;
use std::path::Path;

use memmap2::MmapOptions;
use safetensors::SafeTensors;
use tch::{nn, Kind, Tensor};

use crate::error::{Result, SentimentError};

/// Copies every tensor in a `.safetensors` file into the matching variables
/// of `vs`. The file must cover the VarStore exactly: a name present on one
/// side but not the other means the checkpoint belongs to a different model
/// shape, which is a checkpoint error rather than something to paper over.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| SentimentError::Checkpoint(format!("open {}: {}", path.display(), e)))?;
    let buffer = unsafe {
        MmapOptions::new()
            .map(&file)
            .map_err(|e| SentimentError::Checkpoint(format!("mmap {}: {}", path.display(), e)))?
    };
    let tensors = SafeTensors::deserialize(&buffer)
        .map_err(|e| SentimentError::Checkpoint(format!("parse {}: {}", path.display(), e)))?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut loaded = 0usize;

    for (name, view) in tensors.tensors() {
        let var = variables.get_mut(&name).ok_or_else(|| {
            SentimentError::Checkpoint(format!("tensor {name} not present in model"))
        })?;

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        if var.size() != shape {
            return Err(SentimentError::Checkpoint(format!(
                "tensor {name} has shape {shape:?}, model expects {:?}",
                var.size()
            )));
        }
        let kind = match view.dtype() {
            safetensors::Dtype::F32 => Kind::Float,
            safetensors::Dtype::F16 => Kind::Half,
            safetensors::Dtype::BF16 => Kind::BFloat16,
            other => {
                return Err(SentimentError::Checkpoint(format!(
                    "unsupported dtype {other:?} for tensor {name}"
                )))
            }
        };

        let tch_tensor = Tensor::from_data_size(view.data(), &shape, kind).to_device(device);
        tch::no_grad(|| {
            var.copy_(&tch_tensor);
        });
        loaded += 1;
    }

    if loaded != variables.len() {
        return Err(SentimentError::Checkpoint(format!(
            "checkpoint holds {loaded} tensors, model has {}",
            variables.len()
        )));
    }

    Ok(())
}
