use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;

use sentiment_core::{LabelSpace, Result, SentimentError};

/// One labeled example as the core consumes it: text plus a class index
/// already mapped into `[0, n_classes)`. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Record {
    pub text: String,
    pub label: i64,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    text: String,
    label: i64,
}

/// Loads labeled records from a CSV or JSON file and maps raw 1-based
/// scores into the given label space. Missing fields, out-of-range labels,
/// and unsupported extensions are all validation errors; nothing is
/// partially loaded.
pub fn load_records(path: &Path, space: LabelSpace) -> Result<Vec<Record>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let raw = match extension.as_deref() {
        Some("csv") => load_csv(path)?,
        Some("json") => load_json(path)?,
        _ => return Err(SentimentError::UnsupportedFormat(path.display().to_string())),
    };

    if raw.is_empty() {
        return Err(SentimentError::InvalidRecord {
            location: path.display().to_string(),
            reason: "file contains no records".to_string(),
        });
    }

    raw.into_iter()
        .enumerate()
        .map(|(i, r)| {
            if r.text.trim().is_empty() {
                return Err(SentimentError::InvalidRecord {
                    location: format!("{}:{}", path.display(), i),
                    reason: "empty text field".to_string(),
                });
            }
            Ok(Record {
                text: r.text,
                label: space.index_of_raw(r.label)?,
            })
        })
        .collect()
}

fn load_csv(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| SentimentError::InvalidRecord {
        location: path.display().to_string(),
        reason: e.to_string(),
    })?;
    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| {
            row.map_err(|e| SentimentError::InvalidRecord {
                location: format!("{}:{}", path.display(), i + 1),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn load_json(path: &Path) -> Result<Vec<RawRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| SentimentError::InvalidRecord {
        location: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Deterministic shuffled train/val/test split. Fractions apply to the
/// shuffled whole; train gets the remainder.
pub fn split_records(
    mut records: Vec<Record>,
    val_fraction: f64,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<Record>, Vec<Record>, Vec<Record>)> {
    if !(0.0..1.0).contains(&val_fraction)
        || !(0.0..1.0).contains(&test_fraction)
        || val_fraction + test_fraction >= 1.0
    {
        return Err(SentimentError::InvalidConfig(format!(
            "val_fraction {val_fraction} + test_fraction {test_fraction} must leave room for training data"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);

    let n = records.len();
    let n_test = (n as f64 * test_fraction).floor() as usize;
    let n_val = (n as f64 * val_fraction).floor() as usize;

    let test = records.split_off(n - n_test);
    let val = records.split_off(records.len() - n_val);
    Ok((records, val, test))
}
