//! The retraining job for the statistical priority classifier.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::dataset::Dataset;
use crate::classify::{ActiveModel, ClassifierModel, NaiveBayesTrainer};
use crate::config::{SharedConfig, TrainingConfig};
use crate::error::{SiftError, SiftResult};
use crate::types::TrainingSample;

/// Fewest samples worth training on; below this the holdout is meaningless.
pub const MIN_SAMPLES: usize = 10;

/// What one run of the job did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// The dataset matches the one the active model was trained on.
    Unchanged { signature: String },
    Insufficient { samples: usize },
    /// Accuracy below the bar; the previous model stays active.
    Rejected { accuracy: f64, signature: String },
    Adopted {
        accuracy: f64,
        signature: String,
        path: PathBuf,
    },
}

impl TrainingOutcome {
    pub fn is_adopted(&self) -> bool {
        matches!(self, Self::Adopted { .. })
    }
}

/// Merges feedback, trains, evaluates on a holdout and adopts good models.
pub struct TrainingJob {
    config: SharedConfig,
    active: Arc<ActiveModel>,
}

impl TrainingJob {
    pub fn new(config: SharedConfig, active: Arc<ActiveModel>) -> Self {
        Self { config, active }
    }

    /// Load the configured datasets and train if they changed.
    pub async fn run(&self) -> SiftResult<TrainingOutcome> {
        let config = self.config.snapshot();
        let dataset = Dataset::load(
            &config.feedback_log_path(),
            config.training.seed_dataset.as_deref(),
        )
        .await?;
        self.run_on(dataset).await
    }

    /// Train on an already loaded dataset.
    pub async fn run_on(&self, dataset: Dataset) -> SiftResult<TrainingOutcome> {
        let config = self.config.snapshot();
        let model_path = config.statistical_model_path();
        let signature_path = signature_path(&model_path);

        if read_signature(&signature_path).await?.as_deref() == Some(dataset.signature.as_str()) {
            info!(signature = %dataset.signature, "Dataset unchanged, skipping training");
            return Ok(TrainingOutcome::Unchanged {
                signature: dataset.signature,
            });
        }
        if dataset.samples.len() < MIN_SAMPLES {
            info!(samples = dataset.samples.len(), min = MIN_SAMPLES, "Too few samples to train");
            return Ok(TrainingOutcome::Insufficient {
                samples: dataset.samples.len(),
            });
        }

        let training = config.training.clone();
        let samples = dataset.samples;
        let (model, accuracy) = tokio::task::spawn_blocking(move || fit(&training, samples))
            .await
            .map_err(|e| SiftError::internal(format!("training task failed: {e}")))??;

        let bar = config.training.acceptance_accuracy;
        if accuracy < bar {
            warn!(accuracy, bar, "Retrained model below acceptance bar, keeping the active model");
            return Ok(TrainingOutcome::Rejected {
                accuracy,
                signature: dataset.signature,
            });
        }

        model.save(&model_path)?;
        tokio::fs::write(&signature_path, &dataset.signature).await?;
        let previous = self.active.replace(model);
        info!(
            accuracy,
            path = %model_path.display(),
            replaced = previous.is_some(),
            "Adopted retrained priority classifier"
        );
        Ok(TrainingOutcome::Adopted {
            accuracy,
            signature: dataset.signature,
            path: model_path,
        })
    }
}

/// Train on the shuffled split and score the holdout.
fn fit(config: &TrainingConfig, samples: Vec<TrainingSample>) -> SiftResult<(ClassifierModel, f64)> {
    let trainer = NaiveBayesTrainer::new(config.vocab_size, config.alpha)?;
    let (train, held_out) = split_holdout(samples, config.holdout_fraction);
    debug!(train = train.len(), held_out = held_out.len(), "Split training data");
    let model = trainer.train(&train)?;
    let accuracy = NaiveBayesTrainer::evaluate(&model, &held_out);
    Ok((model, accuracy))
}

/// Deterministic shuffle keyed on content, then a tail holdout.
///
/// At least one sample lands on each side when there are two or more.
pub fn split_holdout(
    samples: Vec<TrainingSample>,
    fraction: f64,
) -> (Vec<TrainingSample>, Vec<TrainingSample>) {
    let mut keyed: Vec<_> = samples
        .into_iter()
        .enumerate()
        .map(|(i, s)| (md5::compute(format!("{i}\u{1f}{}", s.text)).0, s))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    let mut shuffled: Vec<_> = keyed.into_iter().map(|(_, s)| s).collect();

    let n = shuffled.len();
    if n < 2 {
        return (shuffled, Vec::new());
    }
    let held = ((n as f64 * fraction).round() as usize).clamp(1, n - 1);
    let held_out = shuffled.split_off(n - held);
    (shuffled, held_out)
}

fn signature_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("sig")
}

async fn read_signature(path: &Path) -> SiftResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(sig) => Ok(Some(sig.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
