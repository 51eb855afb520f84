//! The triage pipeline: priority, intent, extraction, temporal resolution.
//!
//! Stages run strictly in that order for one message. All long-lived
//! services live in one [`PipelineContext`] built once and shared.

use chrono::{DateTime, FixedOffset, Local};
use std::sync::Arc;
use tracing::{debug, info};

use crate::classify::{ActiveModel, IntentRouter, KeywordIntentClassifier, PriorityGate};
use crate::config::SharedConfig;
use crate::error::SiftResult;
use crate::extract::{DeterministicExtractor, GenerativeExtractor};
use crate::runtime::ModelRuntime;
use crate::traits::{InferenceBackend, NullBackend, TextClassifier};
use crate::types::{ExtractionStrategy, Intent, PriorityLabel, RouteDecision, TriageOutcome, TriageResult};

/// Services shared by every pipeline stage.
pub struct PipelineContext {
    pub config: SharedConfig,
    pub priority: PriorityGate,
    pub router: IntentRouter,
    pub deterministic: DeterministicExtractor,
    pub generative: GenerativeExtractor,
    pub statistical: Arc<ActiveModel>,
}

impl PipelineContext {
    pub fn builder(config: SharedConfig) -> PipelineContextBuilder {
        PipelineContextBuilder {
            config,
            neural: None,
            intent: None,
            statistical: None,
            backend: None,
        }
    }

    pub fn runtime(&self) -> &ModelRuntime {
        self.generative.runtime()
    }
}

/// Builder for [`PipelineContext`].
///
/// Unset parts default to: no neural scorer, the keyword intent classifier,
/// the statistical model at the configured path (empty if absent) and the
/// null inference backend.
pub struct PipelineContextBuilder {
    config: SharedConfig,
    neural: Option<Arc<dyn TextClassifier>>,
    intent: Option<Arc<dyn TextClassifier>>,
    statistical: Option<Arc<ActiveModel>>,
    backend: Option<Arc<dyn InferenceBackend>>,
}

impl PipelineContextBuilder {
    pub fn neural_classifier(mut self, classifier: Arc<dyn TextClassifier>) -> Self {
        self.neural = Some(classifier);
        self
    }

    pub fn intent_classifier(mut self, classifier: Arc<dyn TextClassifier>) -> Self {
        self.intent = Some(classifier);
        self
    }

    pub fn statistical_model(mut self, model: Arc<ActiveModel>) -> Self {
        self.statistical = Some(model);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> PipelineContext {
        let config = self.config;
        let statistical = self.statistical.unwrap_or_else(|| {
            Arc::new(ActiveModel::load_or_empty(config.snapshot().statistical_model_path()))
        });
        let intent = self
            .intent
            .unwrap_or_else(|| Arc::new(KeywordIntentClassifier) as Arc<dyn TextClassifier>);
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(NullBackend) as Arc<dyn InferenceBackend>);

        info!(
            neural = self.neural.is_some(),
            statistical = statistical.get().is_some(),
            backend = backend.name(),
            "Pipeline context built"
        );

        let runtime = ModelRuntime::new(backend, config.clone());
        PipelineContext {
            priority: PriorityGate::new(self.neural, statistical.clone(), config.clone()),
            router: IntentRouter::new(Some(intent), config.clone()),
            deterministic: DeterministicExtractor::new(),
            generative: GenerativeExtractor::new(runtime, config.clone()),
            statistical,
            config,
        }
    }
}

/// End-to-end triage of message text.
#[derive(Clone)]
pub struct TriagePipeline {
    ctx: Arc<PipelineContext>,
}

impl TriagePipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// L1 priority.
    pub fn priority(&self, text: &str) -> PriorityLabel {
        self.ctx.priority.classify(text)
    }

    /// L2 routing plus the deterministic tier.
    ///
    /// A deterministic miss is final and yields `Ignore`. Fails only when the
    /// routing table sends an intent to a tier that cannot handle it.
    pub fn route(&self, text: &str) -> SiftResult<(Option<Intent>, RouteDecision)> {
        let route = self.ctx.router.route(text);
        let intent = route.intent();
        let decision = match (intent, route.strategy()) {
            (Some(intent), ExtractionStrategy::Deterministic) => {
                match self.ctx.deterministic.extract(text, intent)? {
                    Some(task) => RouteDecision::Handled(task),
                    None => RouteDecision::Ignore,
                }
            }
            (Some(intent), ExtractionStrategy::Generative) => RouteDecision::RequiresGenerative(intent),
            _ => RouteDecision::Ignore,
        };
        debug!(intent = ?intent, decision = ?decision, "Routed");
        Ok((intent, decision))
    }

    /// Priority, then routing and extraction unless the message is Low.
    pub async fn triage(&self, text: &str) -> SiftResult<TriageResult> {
        self.triage_at(text, Local::now().fixed_offset()).await
    }

    pub async fn triage_at(&self, text: &str, now: DateTime<FixedOffset>) -> SiftResult<TriageResult> {
        let priority = self.priority(text);
        if !priority.is_admitted() {
            return Ok(TriageResult {
                priority,
                intent: None,
                outcome: TriageOutcome::Ignored,
            });
        }
        self.process_at(text, priority, now).await
    }

    /// Routing and extraction for a message already classified as `priority`.
    pub async fn process(&self, text: &str, priority: PriorityLabel) -> SiftResult<TriageResult> {
        self.process_at(text, priority, Local::now().fixed_offset()).await
    }

    pub async fn process_at(
        &self,
        text: &str,
        priority: PriorityLabel,
        now: DateTime<FixedOffset>,
    ) -> SiftResult<TriageResult> {
        let (intent, decision) = self.route(text)?;
        let outcome = match decision {
            RouteDecision::Handled(task) => TriageOutcome::Created(task),
            RouteDecision::RequiresGenerative(intent) => {
                match self.ctx.generative.extract_at(text, intent, now).await {
                    Some(task) => TriageOutcome::Created(task),
                    None => TriageOutcome::Ignored,
                }
            }
            RouteDecision::Ignore => TriageOutcome::Ignored,
        };
        Ok(TriageResult {
            priority,
            intent,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiftConfig;
    use crate::error::SiftError;
    use crate::traits::{Category, MockTextClassifier};
    use crate::types::RoutingTable;
    use chrono::{NaiveDate, TimeZone, Timelike};

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .from_local_datetime(&NaiveDate::from_ymd_opt(2024, 11, 4).unwrap().and_hms_opt(10, 0, 0).unwrap())
            .unwrap()
    }

    fn neural(label: &'static str) -> Arc<dyn TextClassifier> {
        let mut mock = MockTextClassifier::new();
        mock.expect_classify()
            .returning(move |_| Ok(vec![Category::new(label, 0.95)]));
        Arc::new(mock)
    }

    fn pipeline(config: SharedConfig, priority: &'static str) -> TriagePipeline {
        let ctx = PipelineContext::builder(config)
            .neural_classifier(neural(priority))
            .statistical_model(Arc::new(ActiveModel::default()))
            .build();
        TriagePipeline::new(Arc::new(ctx))
    }

    #[tokio::test]
    async fn test_deterministic_scenario() {
        let pipeline = pipeline(SharedConfig::default(), "medium");
        let result = pipeline
            .triage_at("Bank: RMB 22,500.00 credited to your account", now())
            .await
            .unwrap();
        assert_eq!(result.priority, PriorityLabel::Medium);
        assert_eq!(result.intent, Some(Intent::FinancialChange));
        let task = result.outcome.task().unwrap();
        assert_eq!(task.title(), "credited RMB 22,500.00");
        assert_eq!(task.due_at(), None);
    }

    #[tokio::test]
    async fn test_generative_scenario_without_model() {
        let pipeline = pipeline(SharedConfig::default(), "high");
        let result = pipeline
            .triage_at("Project sync moved from tomorrow 9am to today 3pm, please confirm", now())
            .await
            .unwrap();
        assert_eq!(result.intent, Some(Intent::WorkComms));
        let due = result.outcome.task().unwrap().due_at().unwrap();
        assert_eq!(due.date_naive(), now().date_naive());
        assert_eq!(due.hour(), 15);
    }

    #[tokio::test]
    async fn test_low_priority_is_not_routed() {
        let pipeline = pipeline(SharedConfig::default(), "low");
        let result = pipeline.triage_at("Bank: RMB 1.00 credited", now()).await.unwrap();
        assert_eq!(result.priority, PriorityLabel::Low);
        assert_eq!(result.intent, None);
        assert_eq!(result.outcome, TriageOutcome::Ignored);
    }

    #[test]
    fn test_deterministic_miss_is_final() {
        let pipeline = pipeline(SharedConfig::default(), "high");
        let (intent, decision) = pipeline.route("余额变动提醒 balance updated").unwrap();
        assert_eq!(intent, Some(Intent::FinancialChange));
        assert_eq!(decision, RouteDecision::Ignore);
    }

    #[test]
    fn test_misrouted_intent_fails_fast() {
        let config = SharedConfig::new(
            SiftConfig::builder()
                .routing(RoutingTable::default().with_route(Intent::WorkComms, ExtractionStrategy::Deterministic))
                .build(),
        );
        let pipeline = pipeline(config, "high");
        let err = pipeline.route("meeting moved, please confirm").unwrap_err();
        assert!(matches!(err, SiftError::Contract { .. }));
    }
}
