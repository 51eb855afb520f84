//! Hashing-trick multinomial Naive Bayes for priority.
//!
//! Tokens are hashed into `vocab_size` buckets; collisions are accepted.
//! The hash is the UTF-16 polynomial string hash (multiplier 31, wrapping
//! 32-bit, sign bit masked), so models exported by other tooling that uses
//! the same hash load unchanged.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::Distribution;
use crate::error::{SiftError, SiftResult};
use crate::text::{normalize_for_classifier, tokenize};
use crate::types::{PriorityLabel, TrainingSample};

pub const DEFAULT_VOCAB_SIZE: usize = 32_768;
pub const DEFAULT_ALPHA: f32 = 1.0;

/// Bucket index of a token.
pub fn feature_bucket(token: &str, vocab_size: usize) -> usize {
    let mut hash: i32 = 0;
    for unit in token.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
    }
    ((hash & 0x7fff_ffff) as usize) % vocab_size.max(1)
}

/// A trained statistical classifier. Immutable; retraining produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawModel")]
pub struct ClassifierModel {
    vocab_size: usize,
    alpha: f32,
    labels: Vec<PriorityLabel>,
    log_prior: Vec<f32>,
    log_prob: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct RawModel {
    vocab_size: usize,
    #[serde(alias = "smoothing_alpha")]
    alpha: f32,
    labels: Vec<PriorityLabel>,
    log_prior: Vec<f32>,
    log_prob: Vec<Vec<f32>>,
}

impl TryFrom<RawModel> for ClassifierModel {
    type Error = String;

    fn try_from(raw: RawModel) -> Result<Self, Self::Error> {
        if raw.vocab_size == 0 {
            return Err("vocab_size must be positive".to_string());
        }
        if raw.labels.is_empty() {
            return Err("model has no labels".to_string());
        }
        if raw.log_prior.len() != raw.labels.len() || raw.log_prob.len() != raw.labels.len() {
            return Err(format!(
                "expected {} priors and likelihood rows, found {} and {}",
                raw.labels.len(),
                raw.log_prior.len(),
                raw.log_prob.len()
            ));
        }
        if let Some(row) = raw.log_prob.iter().find(|r| r.len() != raw.vocab_size) {
            return Err(format!(
                "likelihood row has {} buckets, expected {}",
                row.len(),
                raw.vocab_size
            ));
        }
        Ok(Self {
            vocab_size: raw.vocab_size,
            alpha: raw.alpha,
            labels: raw.labels,
            log_prior: raw.log_prior,
            log_prob: raw.log_prob,
        })
    }
}

impl ClassifierModel {
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn labels(&self) -> &[PriorityLabel] {
        &self.labels
    }

    pub fn log_prior(&self) -> &[f32] {
        &self.log_prior
    }

    pub fn log_prob(&self) -> &[Vec<f32>] {
        &self.log_prob
    }

    /// Unnormalized log posterior per label, in `labels()` order.
    pub fn log_scores(&self, text: &str) -> Vec<f64> {
        let normalized = normalize_for_classifier(text);
        let buckets: Vec<usize> = tokenize(&normalized)
            .into_iter()
            .map(|t| feature_bucket(t, self.vocab_size))
            .collect();

        self.log_prior
            .iter()
            .zip(&self.log_prob)
            .map(|(&prior, row)| {
                buckets
                    .iter()
                    .fold(prior as f64, |acc, &b| acc + row[b] as f64)
            })
            .collect()
    }

    /// Arg-max label.
    pub fn predict(&self, text: &str) -> PriorityLabel {
        let scores = self.log_scores(text);
        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }
        self.labels[best]
    }

    /// Softmax over log scores, stabilized by subtracting the maximum.
    pub fn proba(&self, text: &str) -> Option<Distribution> {
        let scores = self.log_scores(text);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let sum: f64 = exps.iter().sum();
        Distribution::from_scores(
            self.labels
                .iter()
                .zip(exps)
                .map(|(&label, e)| (label, (e / sum) as f32)),
        )
    }

    /// Serialize to the JSON interchange format.
    pub fn to_json(&self) -> SiftResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> SiftResult<Self> {
        serde_json::from_str(json).map_err(|e| SiftError::parse(format!("classifier model: {}", e)))
    }

    /// Load a model file.
    pub fn load(path: impl AsRef<Path>) -> SiftResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SiftError::asset_missing(path),
            _ => SiftError::Io(e),
        })?;
        Self::from_json(&json)
    }

    /// Write the model, replacing any existing file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> SiftResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Trains [`ClassifierModel`]s from feedback samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NaiveBayesTrainer {
    vocab_size: usize,
    alpha: f32,
}

impl Default for NaiveBayesTrainer {
    fn default() -> Self {
        Self {
            vocab_size: DEFAULT_VOCAB_SIZE,
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl NaiveBayesTrainer {
    pub fn new(vocab_size: usize, alpha: f32) -> SiftResult<Self> {
        if vocab_size == 0 {
            return Err(SiftError::validation("vocab_size must be positive"));
        }
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(SiftError::validation("alpha must be a positive number"));
        }
        Ok(Self { vocab_size, alpha })
    }

    /// Fit a model. Every label gets a Laplace-smoothed prior, even if absent.
    pub fn train(&self, samples: &[TrainingSample]) -> SiftResult<ClassifierModel> {
        if samples.is_empty() {
            return Err(SiftError::validation("cannot train on an empty dataset"));
        }

        let labels = PriorityLabel::ALL.to_vec();
        let k = labels.len();
        let v = self.vocab_size;
        let alpha = self.alpha as f64;

        let mut doc_counts = vec![0u64; k];
        let mut token_totals = vec![0u64; k];
        let mut counts = vec![vec![0u32; v]; k];

        for sample in samples {
            let c = sample.label.index();
            doc_counts[c] += 1;
            let normalized = normalize_for_classifier(&sample.text);
            for token in tokenize(&normalized) {
                counts[c][feature_bucket(token, v)] += 1;
                token_totals[c] += 1;
            }
        }

        let total_docs = samples.len() as f64;
        let log_prior = doc_counts
            .iter()
            .map(|&d| ((d as f64 + 1.0) / (total_docs + k as f64)).ln() as f32)
            .collect();

        let log_prob = counts
            .iter()
            .zip(&token_totals)
            .map(|(row, &total)| {
                let denom = total as f64 + alpha * v as f64;
                row.iter()
                    .map(|&n| ((n as f64 + alpha) / denom).ln() as f32)
                    .collect()
            })
            .collect();

        info!(
            samples = samples.len(),
            vocab_size = v,
            high = doc_counts[0],
            medium = doc_counts[1],
            low = doc_counts[2],
            "Trained priority classifier"
        );

        Ok(ClassifierModel {
            vocab_size: v,
            alpha: self.alpha,
            labels,
            log_prior,
            log_prob,
        })
    }

    /// Fraction of held-out samples predicted correctly. Empty input scores 0.
    pub fn evaluate(model: &ClassifierModel, held_out: &[TrainingSample]) -> f64 {
        if held_out.is_empty() {
            return 0.0;
        }
        let correct = held_out
            .iter()
            .filter(|s| model.predict(&s.text) == s.label)
            .count();
        let accuracy = correct as f64 / held_out.len() as f64;
        debug!(correct, total = held_out.len(), accuracy, "Evaluated classifier");
        accuracy
    }
}

/// The single active statistical model.
///
/// Readers clone the `Arc`; replacement swaps the pointer, so a reader
/// never sees a partially updated model.
#[derive(Debug, Default)]
pub struct ActiveModel {
    current: RwLock<Option<Arc<ClassifierModel>>>,
}

impl ActiveModel {
    pub fn new(model: Option<ClassifierModel>) -> Self {
        Self {
            current: RwLock::new(model.map(Arc::new)),
        }
    }

    /// Load from disk, starting empty if the file is missing or invalid.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match ClassifierModel::load(path.as_ref()) {
            Ok(model) => Self::new(Some(model)),
            Err(e) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "No statistical classifier loaded"
                );
                Self::default()
            }
        }
    }

    pub fn get(&self) -> Option<Arc<ClassifierModel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new model and return the previous one.
    pub fn replace(&self, model: ClassifierModel) -> Option<Arc<ClassifierModel>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        guard.replace(Arc::new(model))
    }
}
