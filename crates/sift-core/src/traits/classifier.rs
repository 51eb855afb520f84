//! Closed-label text classifier seam.

use serde::{Deserialize, Serialize};

use crate::error::SiftResult;

/// One label with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub label: String,
    pub score: f32,
}

impl Category {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// A packaged text classifier (priority gatekeeper or intent model).
///
/// Inference is bounded and may block the calling worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait TextClassifier: Send + Sync {
    /// Score the text against every label the model knows.
    ///
    /// An empty result means the model produced nothing usable.
    fn classify(&self, text: &str) -> SiftResult<Vec<Category>>;
}

/// The highest scoring category, ignoring non-finite scores.
pub fn top_category(categories: &[Category]) -> Option<&Category> {
    categories
        .iter()
        .filter(|c| c.score.is_finite())
        .max_by(|a, b| a.score.total_cmp(&b.score))
}
