//! Feedback samples for retraining the statistical classifier.

use serde::{Deserialize, Serialize};

use super::PriorityLabel;

/// A labeled text from user feedback.
///
/// Serialized as one JSONL line: `{"text": "...", "label_priority": "high"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub text: String,
    #[serde(rename = "label_priority", alias = "label")]
    pub label: PriorityLabel,
}

impl TrainingSample {
    pub fn new(text: impl Into<String>, label: PriorityLabel) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}
