use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tch::{Device, Tensor};

use sentiment_core::{Result, SentimentError};
use tokenizer::{Encoding, WordEncoder};

use crate::data::Record;

/// One stacked batch: parallel tensors over the same examples.
/// input_ids, attention_mask: [len, max_len]; labels: [len].
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub labels: Tensor,
    pub len: usize,
}

struct EncodedExample {
    encoding: Encoding,
    label: i64,
}

/// Finite, re-iterable source of batches over one split. Records are
/// encoded once up front (in parallel); every `iter` call walks the whole
/// split exactly once, reshuffled per call when a seed is given.
pub struct BatchSource {
    examples: Vec<EncodedExample>,
    max_len: usize,
    batch_size: usize,
    device: Device,
}

impl BatchSource {
    pub fn new(
        records: &[Record],
        encoder: &WordEncoder,
        max_len: usize,
        batch_size: usize,
        device: Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(SentimentError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }

        let examples: Vec<EncodedExample> = records
            .par_iter()
            .map(|record| {
                let encoding = encoder
                    .encode(&record.text, max_len)
                    .map_err(|e| SentimentError::InvalidConfig(e.to_string()))?;
                Ok(EncodedExample {
                    encoding,
                    label: record.label,
                })
            })
            .collect::<Result<_>>()?;

        // Shape precondition holds for every example before any batch is
        // handed to the trainer.
        for example in &examples {
            let ids = example.encoding.input_ids.len();
            let mask = example.encoding.attention_mask.len();
            if ids != max_len || mask != max_len {
                return Err(SentimentError::ShapeMismatch {
                    expected: format!("input_ids and attention_mask of length {max_len}"),
                    actual: format!("input_ids {ids}, attention_mask {mask}"),
                });
            }
        }

        Ok(Self {
            examples,
            max_len,
            batch_size,
            device,
        })
    }

    /// Number of examples in the split.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Number of batches one full pass yields. The last batch may be
    /// smaller than `batch_size`.
    pub fn num_batches(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    /// One full pass over the split. `shuffle_seed` reorders examples for
    /// this pass only; `None` keeps insertion order (evaluation wants
    /// deterministic iteration).
    pub fn iter(&self, shuffle_seed: Option<u64>) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if let Some(seed) = shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        BatchIter {
            source: self,
            order,
            cursor: 0,
        }
    }

    fn stack(&self, indices: &[usize]) -> Batch {
        let len = indices.len();
        let mut ids = Vec::with_capacity(len * self.max_len);
        let mut mask = Vec::with_capacity(len * self.max_len);
        let mut labels = Vec::with_capacity(len);

        for &i in indices {
            let example = &self.examples[i];
            ids.extend_from_slice(&example.encoding.input_ids);
            mask.extend_from_slice(&example.encoding.attention_mask);
            labels.push(example.label);
        }

        Batch {
            input_ids: Tensor::from_slice(&ids)
                .view([len as i64, self.max_len as i64])
                .to(self.device),
            attention_mask: Tensor::from_slice(&mask)
                .view([len as i64, self.max_len as i64])
                .to(self.device),
            labels: Tensor::from_slice(&labels).to(self.device),
            len,
        }
    }
}

pub struct BatchIter<'a> {
    source: &'a BatchSource,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.source.batch_size).min(self.order.len());
        let batch = self.source.stack(&self.order[self.cursor..end]);
        self.cursor = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenizer::Vocab;

    fn records(n: usize) -> Vec<Record> {
        // unique labels so order comparisons are unambiguous
        (0..n)
            .map(|i| Record {
                text: format!("review number {i} was fine"),
                label: i as i64,
            })
            .collect()
    }

    fn encoder(records: &[Record]) -> WordEncoder {
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        WordEncoder::new(Vocab::build(&texts, 1)).unwrap()
    }

    #[test]
    fn batch_count_and_last_partial_batch() {
        let recs = records(10);
        let source = BatchSource::new(&recs, &encoder(&recs), 8, 4, Device::Cpu).unwrap();
        assert_eq!(source.num_batches(), 3);

        let sizes: Vec<usize> = source.iter(None).map(|b| b.len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn batches_carry_matching_tensor_shapes() {
        let recs = records(5);
        let source = BatchSource::new(&recs, &encoder(&recs), 8, 2, Device::Cpu).unwrap();
        let batch = source.iter(None).next().unwrap();
        assert_eq!(batch.input_ids.size(), vec![2, 8]);
        assert_eq!(batch.attention_mask.size(), vec![2, 8]);
        assert_eq!(batch.labels.size(), vec![2]);
    }

    #[test]
    fn empty_split_yields_zero_batches() {
        let recs = records(4);
        let source = BatchSource::new(&[], &encoder(&recs), 8, 4, Device::Cpu).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.iter(Some(1)).count(), 0);
    }

    #[test]
    fn same_seed_same_order() {
        let recs = records(12);
        let source = BatchSource::new(&recs, &encoder(&recs), 8, 3, Device::Cpu).unwrap();

        let labels = |seed: Option<u64>| -> Vec<i64> {
            source
                .iter(seed)
                .flat_map(|b| Vec::<i64>::try_from(&b.labels).unwrap())
                .collect()
        };

        assert_eq!(labels(Some(42)), labels(Some(42)));
        assert_ne!(labels(Some(42)), labels(Some(43)));
    }

    #[test]
    fn every_example_seen_exactly_once_per_pass() {
        let recs = records(9);
        let source = BatchSource::new(&recs, &encoder(&recs), 8, 4, Device::Cpu).unwrap();
        let mut seen: Vec<i64> = source
            .iter(Some(7))
            .flat_map(|b| Vec::<i64>::try_from(&b.labels).unwrap())
            .collect();
        assert_eq!(seen.len(), 9);
        seen.sort();
        let mut expected: Vec<i64> = recs.iter().map(|r| r.label).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let recs = records(2);
        assert!(BatchSource::new(&recs, &encoder(&recs), 8, 0, Device::Cpu).is_err());
    }
}
