//! End-to-end triage behavior through the public API.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Timelike};
use std::sync::Arc;

use sift_core::classify::DecisionSource;
use sift_core::traits::Category;
use sift_core::types::TrainingSample;
use sift_core::{
    ActiveModel, DeviceState, ExtractionStrategy, FeedbackLog, Intent, Message, NaiveBayesTrainer,
    PipelineContext, PriorityGate, PriorityLabel, RouteDecision, SharedConfig, SiftConfig,
    SiftResult, SqliteStore, StaticDeviceState, TaskScheduler, TextClassifier, TrainingJob,
    TriageOutcome, TriagePipeline, TriageStore,
};

/// Classifier that always answers one label.
struct Fixed(&'static str, f32);

impl TextClassifier for Fixed {
    fn classify(&self, _text: &str) -> SiftResult<Vec<Category>> {
        Ok(vec![Category::new(self.0, self.1)])
    }
}

fn now() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .from_local_datetime(&NaiveDate::from_ymd_opt(2024, 11, 4).unwrap().and_hms_opt(10, 0, 0).unwrap())
        .unwrap()
}

fn pipeline(priority: &'static str) -> TriagePipeline {
    let ctx = PipelineContext::builder(SharedConfig::default())
        .neural_classifier(Arc::new(Fixed(priority, 0.95)))
        .statistical_model(Arc::new(ActiveModel::default()))
        .build();
    TriagePipeline::new(Arc::new(ctx))
}

#[tokio::test]
async fn financial_notification_becomes_task_without_due_time() {
    let result = pipeline("medium")
        .triage_at("Bank: RMB 22,500.00 credited to your account", now())
        .await
        .unwrap();

    assert_eq!(result.intent, Some(Intent::FinancialChange));
    let task = result.outcome.task().expect("task");
    assert_eq!(task.title(), "credited RMB 22,500.00");
    assert!(task.due_at().is_none());
}

#[tokio::test]
async fn rescheduled_meeting_resolves_to_latest_time_without_model() {
    let result = pipeline("high")
        .triage_at("Project sync moved from tomorrow 9am to today 3pm, please confirm", now())
        .await
        .unwrap();

    assert_eq!(result.intent, Some(Intent::WorkComms));
    let due = result
        .outcome
        .task()
        .and_then(|t| t.due_at())
        .expect("due time")
        .with_timezone(&now().timezone());
    assert_eq!(due.date_naive(), now().date_naive());
    assert_eq!((due.hour(), due.minute()), (15, 0));
}

#[test]
fn deterministic_miss_never_escalates() {
    let pipeline = pipeline("high");
    for text in ["您的快递正在派送中", "未接来电", "Your verification code will arrive shortly"] {
        let (intent, decision) = pipeline.route(text).unwrap();
        assert!(intent.is_some(), "{text}");
        assert!(
            !matches!(decision, RouteDecision::RequiresGenerative(_)),
            "{text} escalated"
        );
    }
}

#[tokio::test]
async fn generative_path_never_empty_for_non_blank_text() {
    let pipeline = pipeline("high");
    for text in ["在吗？周末一起吃饭", "Reminder: dentist appointment", "project report ?!"] {
        let result = pipeline.triage_at(text, now()).await.unwrap();
        let intent = result.intent.expect("intent");
        assert_eq!(
            SharedConfig::default().snapshot().routing.strategy(intent),
            ExtractionStrategy::Generative,
            "{text}"
        );
        assert!(matches!(result.outcome, TriageOutcome::Created(_)), "{text}");
    }
}

#[test]
fn confident_neural_score_overrides_statistical_model() {
    let mut samples = Vec::new();
    for i in 0..20 {
        samples.push(TrainingSample::new(format!("urgent deadline today {i}"), PriorityLabel::Low));
    }
    let model = NaiveBayesTrainer::default().train(&samples).unwrap();
    let gate = PriorityGate::new(
        Some(Arc::new(Fixed("high", 0.7))),
        Arc::new(ActiveModel::new(Some(model))),
        SharedConfig::default(),
    );

    let decision = gate.decide("urgent deadline today");
    assert_eq!(decision.label, PriorityLabel::High);
    assert_eq!(decision.source, DecisionSource::Neural);
}

#[tokio::test(start_paused = true)]
async fn duplicate_medium_submission_executes_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("sift.db")).unwrap());
    let device = Arc::new(StaticDeviceState::new(DeviceState {
        screen_interactive: false,
        ..DeviceState::default()
    }));
    let scheduler = TaskScheduler::new(pipeline("medium"), store.clone(), device);

    let msg = Message::new("n-42", "com.courier").with_body("【菜鸟驿站】您的包裹已到，取件码 5-2-1103");
    scheduler.submit(msg.clone()).await.unwrap();
    scheduler.submit(msg).await.unwrap();
    scheduler.wait_idle().await;

    assert!(store.is_processed("n-42").await.unwrap());
    assert_eq!(store.tasks_for("n-42").await.unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_retrain_leaves_active_model_untouched() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = SharedConfig::new(SiftConfig::builder().data_dir(dir.path()).build());

    let good: Vec<_> = (0..12)
        .flat_map(|i| {
            [
                TrainingSample::new(format!("meeting boss urgent {i}"), PriorityLabel::High),
                TrainingSample::new(format!("coupon sale promo {i}"), PriorityLabel::Low),
            ]
        })
        .collect();
    let active = Arc::new(ActiveModel::new(Some(NaiveBayesTrainer::default().train(&good).unwrap())));
    let inputs = ["meeting boss urgent now", "coupon sale promo now"];
    let before: Vec<_> = inputs.iter().map(|t| active.get().unwrap().predict(t)).collect();

    let log = FeedbackLog::new(config.snapshot().feedback_log_path());
    for i in 0..30 {
        let label = PriorityLabel::from_index(i % 3).unwrap();
        log.append(&TrainingSample::new("identical text", label)).await.unwrap();
    }

    let job = TrainingJob::new(config, active.clone());
    let outcome = job.run().await.unwrap();
    assert!(!outcome.is_adopted(), "{outcome:?}");

    let after: Vec<_> = inputs.iter().map(|t| active.get().unwrap().predict(t)).collect();
    assert_eq!(before, after);
}
