//! L1 priority gate fusing a neural and a statistical scorer.
//!
//! Decision order:
//! 1. fusion disabled: the configured primary scorer
//! 2. neural top probability at or above the threshold
//! 3. statistical top probability at or above the threshold
//! 4. weighted blend of both distributions
//!
//! With neither scorer available the keyword heuristic decides.
//! `classify` never fails.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{keyword_priority, ActiveModel, Distribution};
use crate::config::{PrimaryScorer, SharedConfig};
use crate::text::normalize_for_classifier;
use crate::traits::TextClassifier;
use crate::types::PriorityLabel;

/// Which path produced a priority decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Neural,
    Statistical,
    Blend,
    Keyword,
}

/// A priority with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriorityDecision {
    pub label: PriorityLabel,
    pub source: DecisionSource,
    /// Probability of `label` under the deciding distribution. 0 for keywords.
    pub confidence: f32,
}

impl PriorityDecision {
    fn from_distribution(dist: Distribution, source: DecisionSource) -> Self {
        let (label, confidence) = dist.top();
        Self {
            label,
            source,
            confidence,
        }
    }
}

/// Fused priority classifier.
pub struct PriorityGate {
    neural: Option<Arc<dyn TextClassifier>>,
    statistical: Arc<ActiveModel>,
    config: SharedConfig,
}

impl PriorityGate {
    pub fn new(
        neural: Option<Arc<dyn TextClassifier>>,
        statistical: Arc<ActiveModel>,
        config: SharedConfig,
    ) -> Self {
        Self {
            neural,
            statistical,
            config,
        }
    }

    /// Priority for a text.
    pub fn classify(&self, text: &str) -> PriorityLabel {
        self.decide(text).label
    }

    /// Priority for a text, with the path that produced it.
    pub fn decide(&self, text: &str) -> PriorityDecision {
        let fusion = self.config.snapshot().fusion.clone();
        let neural = self.neural_distribution(text);
        let statistical = self.statistical_distribution(text);

        let decision = if !fusion.enabled {
            let (primary, secondary) = match fusion.primary {
                PrimaryScorer::Neural => (
                    neural.map(|d| (d, DecisionSource::Neural)),
                    statistical.map(|d| (d, DecisionSource::Statistical)),
                ),
                PrimaryScorer::Statistical => (
                    statistical.map(|d| (d, DecisionSource::Statistical)),
                    neural.map(|d| (d, DecisionSource::Neural)),
                ),
            };
            primary
                .or(secondary)
                .map(|(d, source)| PriorityDecision::from_distribution(d, source))
        } else {
            let threshold = fusion.confidence_threshold;
            match (neural, statistical) {
                (Some(n), _) if n.top().1 >= threshold => {
                    Some(PriorityDecision::from_distribution(n, DecisionSource::Neural))
                }
                (_, Some(s)) if s.top().1 >= threshold => {
                    Some(PriorityDecision::from_distribution(s, DecisionSource::Statistical))
                }
                (Some(n), Some(s)) => {
                    let (wn, ws) = fusion.normalized_weights();
                    Some(PriorityDecision::from_distribution(
                        n.blend(&s, wn, ws),
                        DecisionSource::Blend,
                    ))
                }
                (Some(n), None) => Some(PriorityDecision::from_distribution(n, DecisionSource::Neural)),
                (None, Some(s)) => {
                    Some(PriorityDecision::from_distribution(s, DecisionSource::Statistical))
                }
                (None, None) => None,
            }
        };

        let decision = decision.unwrap_or_else(|| {
            warn!("No priority scorer available, using keyword heuristic");
            PriorityDecision {
                label: keyword_priority(text),
                source: DecisionSource::Keyword,
                confidence: 0.0,
            }
        });

        debug!(
            priority = %decision.label,
            source = ?decision.source,
            confidence = decision.confidence,
            "Priority decided"
        );
        decision
    }

    fn neural_distribution(&self, text: &str) -> Option<Distribution> {
        let classifier = self.neural.as_ref()?;
        let normalized = normalize_for_classifier(text);
        match classifier.classify(&normalized) {
            Ok(categories) => Distribution::from_scores(categories.iter().filter_map(|c| {
                PriorityLabel::from_label(&c.label).map(|label| (label, c.score))
            })),
            Err(e) => {
                warn!(error = %e, "Neural priority scorer failed");
                None
            }
        }
    }

    fn statistical_distribution(&self, text: &str) -> Option<Distribution> {
        self.statistical.get()?.proba(text)
    }
}
