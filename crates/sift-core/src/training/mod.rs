//! Nightly retraining from user feedback.

mod dataset;
mod job;

pub use dataset::{
    read_feedback_log, read_seed_csv, signature, Dataset, DatasetLogger, DatasetStats, FeedbackLog,
};
pub use job::{split_holdout, TrainingJob, TrainingOutcome, MIN_SAMPLES};
