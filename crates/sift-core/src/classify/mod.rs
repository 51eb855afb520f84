//! L1 priority and L2 intent classification.

mod intent;
mod keywords;
mod naive_bayes;
mod priority;

pub use intent::{IntentRoute, IntentRouter, KeywordIntentClassifier};
pub use keywords::keyword_priority;
pub use naive_bayes::{
    feature_bucket, ActiveModel, ClassifierModel, NaiveBayesTrainer, DEFAULT_ALPHA,
    DEFAULT_VOCAB_SIZE,
};
pub use priority::{DecisionSource, PriorityDecision, PriorityGate};

use crate::types::PriorityLabel;

/// A probability distribution over {High, Medium, Low}.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distribution([f32; 3]);

impl Distribution {
    /// Build from per-label scores, summing duplicates and normalizing.
    ///
    /// Negative and non-finite scores count as zero. Returns `None` when
    /// nothing positive remains.
    pub fn from_scores(scores: impl IntoIterator<Item = (PriorityLabel, f32)>) -> Option<Self> {
        let mut probs = [0.0f32; 3];
        for (label, score) in scores {
            if score.is_finite() && score > 0.0 {
                probs[label.index()] += score;
            }
        }
        let sum: f32 = probs.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return None;
        }
        for p in probs.iter_mut() {
            *p /= sum;
        }
        Some(Self(probs))
    }

    pub fn get(&self, label: PriorityLabel) -> f32 {
        self.0[label.index()]
    }

    /// Arg-max label and its probability. Ties go to the higher priority.
    pub fn top(&self) -> (PriorityLabel, f32) {
        let mut best = PriorityLabel::High;
        for label in PriorityLabel::ALL {
            if self.get(label) > self.get(best) {
                best = label;
            }
        }
        (best, self.get(best))
    }

    /// Weighted linear combination of two distributions.
    pub fn blend(&self, other: &Distribution, weight: f32, other_weight: f32) -> Distribution {
        let mut probs = [0.0f32; 3];
        for (i, p) in probs.iter_mut().enumerate() {
            *p = self.0[i] * weight + other.0[i] * other_weight;
        }
        Distribution(probs)
    }
}
