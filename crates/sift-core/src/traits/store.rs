//! Persistence collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SiftResult;
use crate::types::{ExtractedTask, Message, PriorityLabel, StoredMessage, TrainingSample};

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub message_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(message_id: impl Into<String>, task: &ExtractedTask) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id: message_id.into(),
            title: task.title().to_string(),
            due_at: task.due_at(),
            created_at: Utc::now(),
        }
    }
}

/// Storage for messages, tasks and feedback.
///
/// The pipeline never writes durable state itself; everything goes
/// through this trait.
#[async_trait]
pub trait TriageStore: Send + Sync {
    /// Persist a message with its inferred label.
    ///
    /// Saving a known id again replaces the content, label and observed time
    /// while the message is unprocessed. A processed record is kept as is.
    /// A user correction survives either way.
    async fn save_message(&self, message: &Message, priority: PriorityLabel) -> SiftResult<()>;

    async fn get_message(&self, id: &str) -> SiftResult<Option<StoredMessage>>;

    /// Mark messages processed so they are never admitted again.
    async fn mark_processed(&self, ids: &[String]) -> SiftResult<()>;

    async fn is_processed(&self, id: &str) -> SiftResult<bool>;

    async fn save_task(&self, message_id: &str, task: &ExtractedTask) -> SiftResult<TaskRecord>;

    async fn tasks_for(&self, message_id: &str) -> SiftResult<Vec<TaskRecord>>;

    /// Append a feedback sample. Samples are never edited.
    async fn append_training_sample(&self, text: &str, label: PriorityLabel) -> SiftResult<()>;

    async fn training_samples(&self) -> SiftResult<Vec<TrainingSample>>;

    /// Record a user correction without touching the inferred label.
    async fn set_user_priority(&self, id: &str, label: PriorityLabel) -> SiftResult<()>;

    /// Unprocessed Medium messages, oldest first.
    async fn pending_medium(&self, limit: usize) -> SiftResult<Vec<StoredMessage>>;
}
