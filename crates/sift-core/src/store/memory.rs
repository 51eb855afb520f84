//! In-memory triage store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{SiftError, SiftResult};
use crate::traits::{TaskRecord, TriageStore};
use crate::types::{ExtractedTask, Message, PriorityLabel, StoredMessage, TrainingSample};

#[derive(Default)]
struct Inner {
    messages: HashMap<String, StoredMessage>,
    tasks: Vec<TaskRecord>,
    samples: Vec<TrainingSample>,
}

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task saved so far.
    pub async fn all_tasks(&self) -> Vec<TaskRecord> {
        self.inner.read().await.tasks.clone()
    }
}

#[async_trait]
impl TriageStore for MemoryStore {
    async fn save_message(&self, message: &Message, priority: PriorityLabel) -> SiftResult<()> {
        let mut inner = self.inner.write().await;
        match inner.messages.get_mut(&message.id) {
            Some(stored) if stored.processed => {}
            Some(stored) => {
                stored.message = message.clone();
                stored.priority = priority;
            }
            None => {
                inner
                    .messages
                    .insert(message.id.clone(), StoredMessage::new(message.clone(), priority));
            }
        }
        Ok(())
    }

    async fn get_message(&self, id: &str) -> SiftResult<Option<StoredMessage>> {
        Ok(self.inner.read().await.messages.get(id).cloned())
    }

    async fn mark_processed(&self, ids: &[String]) -> SiftResult<()> {
        let mut inner = self.inner.write().await;
        for id in ids {
            if let Some(stored) = inner.messages.get_mut(id) {
                stored.processed = true;
            }
        }
        Ok(())
    }

    async fn is_processed(&self, id: &str) -> SiftResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .get(id)
            .is_some_and(|m| m.processed))
    }

    async fn save_task(&self, message_id: &str, task: &ExtractedTask) -> SiftResult<TaskRecord> {
        let record = TaskRecord::new(message_id, task);
        self.inner.write().await.tasks.push(record.clone());
        Ok(record)
    }

    async fn tasks_for(&self, message_id: &str) -> SiftResult<Vec<TaskRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| t.message_id == message_id)
            .cloned()
            .collect())
    }

    async fn append_training_sample(&self, text: &str, label: PriorityLabel) -> SiftResult<()> {
        self.inner
            .write()
            .await
            .samples
            .push(TrainingSample::new(text, label));
        Ok(())
    }

    async fn training_samples(&self) -> SiftResult<Vec<TrainingSample>> {
        Ok(self.inner.read().await.samples.clone())
    }

    async fn set_user_priority(&self, id: &str, label: PriorityLabel) -> SiftResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| SiftError::not_found(id))?;
        stored.user_priority = Some(label);
        Ok(())
    }

    async fn pending_medium(&self, limit: usize) -> SiftResult<Vec<StoredMessage>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<_> = inner
            .messages
            .values()
            .filter(|m| m.priority == PriorityLabel::Medium && !m.processed)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.message.observed_at);
        pending.truncate(limit);
        Ok(pending)
    }
}
