//! Energy-aware admission and execution of triage work.
//!
//! On receipt a message is classified, persisted with its label, then:
//! - High: admitted as expedited work, latest submission wins
//! - Medium: admitted as device-gated work, first submission wins
//! - Low: archived, never admitted
//!
//! Executing a unit runs the pipeline once and marks the message processed.
//! A processed message is never admitted again. Gate thresholds and the
//! sweep interval are read from configuration when they are used.

mod gate;
mod queue;

pub use gate::WorkConstraints;
pub use queue::{Admission, DedupPolicy, TokioWorkQueue, WorkHandler, WorkItem, WorkQueue};

use chrono::{DateTime, Local, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::config::SharedConfig;
use crate::error::{SiftError, SiftResult};
use crate::pipeline::TriagePipeline;
use crate::traits::{DeviceStateProvider, TriageStore};
use crate::training::{TrainingJob, TrainingOutcome};
use crate::types::{Message, PriorityLabel};

/// Most Medium messages one sweep re-admits.
pub const SWEEP_BATCH: usize = 25;

/// How often the sweep job checks whether the configured interval has passed.
const SWEEP_TICK: Duration = Duration::from_secs(60);

/// What `submit` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    Admitted {
        priority: PriorityLabel,
        admission: Admission,
    },
    Archived,
    /// The message was processed before; nothing was saved or admitted.
    AlreadyProcessed,
}

struct Shared {
    pipeline: TriagePipeline,
    store: Arc<dyn TriageStore>,
    queue: TokioWorkQueue,
    device: Arc<dyn DeviceStateProvider>,
    config: SharedConfig,
    training: Option<Arc<TrainingJob>>,
    last_sweep: Mutex<Instant>,
}

/// Admits classified messages to the work queue and runs periodic jobs.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    cron: Option<JobScheduler>,
}

impl TaskScheduler {
    pub fn new(
        pipeline: TriagePipeline,
        store: Arc<dyn TriageStore>,
        device: Arc<dyn DeviceStateProvider>,
    ) -> Self {
        let config = pipeline.context().config.clone();
        let queue = TokioWorkQueue::new(device.clone(), config.clone());
        Self::from_parts(pipeline, store, device, queue, config, None)
    }

    /// Add the nightly retraining job.
    pub fn with_training(self, job: Arc<TrainingJob>) -> Self {
        let shared = &self.shared;
        Self::from_parts(
            shared.pipeline.clone(),
            shared.store.clone(),
            shared.device.clone(),
            shared.queue.clone(),
            shared.config.clone(),
            Some(job),
        )
    }

    fn from_parts(
        pipeline: TriagePipeline,
        store: Arc<dyn TriageStore>,
        device: Arc<dyn DeviceStateProvider>,
        queue: TokioWorkQueue,
        config: SharedConfig,
        training: Option<Arc<TrainingJob>>,
    ) -> Self {
        let handler_pipeline = pipeline.clone();
        let handler_store = store.clone();
        queue.on_ready(Arc::new(move |item: WorkItem| {
            let pipeline = handler_pipeline.clone();
            let store = handler_store.clone();
            async move { execute(&pipeline, store.as_ref(), &item.key).await }.boxed()
        }));

        Self {
            shared: Arc::new(Shared {
                pipeline,
                store,
                queue,
                device,
                config,
                training,
                last_sweep: Mutex::new(Instant::now()),
            }),
            cron: None,
        }
    }

    pub fn queue(&self) -> &TokioWorkQueue {
        &self.shared.queue
    }

    pub fn store(&self) -> &Arc<dyn TriageStore> {
        &self.shared.store
    }

    /// Classify, persist and admit a message.
    pub async fn submit(&self, message: Message) -> SiftResult<Submission> {
        self.shared.submit(message).await
    }

    /// Re-admit persisted Medium messages that were never processed.
    pub async fn sweep_medium(&self) -> SiftResult<usize> {
        self.shared.sweep_medium().await
    }

    /// Run the training job if the nightly constraints hold.
    pub async fn train_if_allowed(&self) -> SiftResult<Option<TrainingOutcome>> {
        self.shared.train_if_allowed().await
    }

    /// Wait for every admitted unit to finish.
    pub async fn wait_idle(&self) {
        self.shared.queue.wait_idle().await
    }

    /// Start the periodic sweep and, if configured, nightly training.
    ///
    /// The sweep follows `scheduler.medium_batch_interval_minutes` as it is
    /// reloaded, to within one minute.
    pub async fn start(&mut self) -> SiftResult<()> {
        if self.cron.is_some() {
            return Ok(());
        }
        let cron = JobScheduler::new()
            .await
            .map_err(|e| SiftError::internal(format!("Failed to create scheduler: {}", e)))?;

        let config = self.shared.config.snapshot();
        self.shared.mark_swept();
        let shared = self.shared.clone();
        let sweep = Job::new_repeated_async(SWEEP_TICK, move |_uuid, _lock| {
            let shared = shared.clone();
            Box::pin(async move {
                if let Err(e) = shared.sweep_if_due().await {
                    error!(error = %e, "Medium sweep failed");
                }
            })
        })
        .map_err(|e| SiftError::internal(format!("Failed to create sweep job: {}", e)))?;
        cron.add(sweep)
            .await
            .map_err(|e| SiftError::internal(format!("Failed to add sweep job: {}", e)))?;

        if self.shared.training.is_some() {
            let shared = self.shared.clone();
            let nightly = Job::new_async_tz(config.training.cron.as_str(), Local, move |_uuid, _lock| {
                let shared = shared.clone();
                Box::pin(async move {
                    if let Err(e) = shared.train_if_allowed().await {
                        error!(error = %e, "Nightly training failed");
                    }
                })
            })
            .map_err(|e| SiftError::validation(format!("invalid training cron {:?}: {}", config.training.cron, e)))?;
            cron.add(nightly)
                .await
                .map_err(|e| SiftError::internal(format!("Failed to add training job: {}", e)))?;
        }

        cron.start()
            .await
            .map_err(|e| SiftError::internal(format!("Failed to start scheduler: {}", e)))?;
        self.cron = Some(cron);

        info!(
            sweep_minutes = config.scheduler.medium_batch_interval_minutes,
            training = self.shared.training.is_some(),
            "Task scheduler started"
        );
        Ok(())
    }

    /// Stop periodic jobs and wait for admitted work to drain.
    pub async fn shutdown(&mut self) -> SiftResult<()> {
        info!("Shutting down task scheduler");
        if let Some(mut cron) = self.cron.take() {
            cron.shutdown()
                .await
                .map_err(|e| SiftError::internal(format!("Failed to shutdown scheduler: {}", e)))?;
        }
        self.shared.queue.wait_idle().await;
        Ok(())
    }
}

impl Shared {
    async fn submit(&self, message: Message) -> SiftResult<Submission> {
        if self.store.is_processed(&message.id).await? {
            debug!(message_id = %message.id, "Message already processed, ignoring resubmission");
            return Ok(Submission::AlreadyProcessed);
        }
        let text = message.text();
        let priority = self.pipeline.priority(&text);
        self.store.save_message(&message, priority).await?;
        debug!(message_id = %message.id, priority = %priority, "Message classified");

        let item = match priority {
            PriorityLabel::High => WorkItem::expedited(&message.id),
            PriorityLabel::Medium => WorkItem::deferrable(&message.id),
            PriorityLabel::Low => {
                debug!(message_id = %message.id, "Archived low priority message");
                return Ok(Submission::Archived);
            }
        };
        let admission = self.queue.admit(item).await;
        info!(message_id = %message.id, priority = %priority, admission = ?admission, "Message admitted");
        Ok(Submission::Admitted { priority, admission })
    }

    fn mark_swept(&self) {
        *self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Sweep if the configured interval has passed since the last sweep.
    async fn sweep_if_due(&self) -> SiftResult<Option<usize>> {
        let minutes = self.config.snapshot().scheduler.medium_batch_interval_minutes;
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if last.elapsed() < Duration::from_secs(minutes * 60) {
                return Ok(None);
            }
            *last = Instant::now();
        }
        self.sweep_medium().await.map(Some)
    }

    async fn sweep_medium(&self) -> SiftResult<usize> {
        let backlog = self.store.pending_medium(SWEEP_BATCH).await?;
        let mut admitted = 0;
        for stored in backlog {
            let item = WorkItem::deferrable(&stored.message.id);
            if self.queue.admit(item).await != Admission::Dropped {
                admitted += 1;
            }
        }
        if admitted > 0 {
            info!(admitted, "Re-admitted unprocessed medium messages");
        }
        Ok(admitted)
    }

    async fn train_if_allowed(&self) -> SiftResult<Option<TrainingOutcome>> {
        let Some(job) = self.training.as_ref() else {
            return Ok(None);
        };
        let training = self.config.snapshot().training.clone();
        let gate = WorkConstraints::nightly(training.night_start_hour, training.night_end_hour);
        if let Some(reason) = gate.unmet(&self.device.snapshot()) {
            info!(reason, "Skipping nightly training");
            return Ok(None);
        }
        let outcome = job.run().await?;
        info!(outcome = ?outcome, "Nightly training finished");
        Ok(Some(outcome))
    }
}

/// Run the pipeline for one persisted message and record the outcome.
async fn execute(pipeline: &TriagePipeline, store: &dyn TriageStore, message_id: &str) -> SiftResult<()> {
    let Some(stored) = store.get_message(message_id).await? else {
        warn!(message_id, "Admitted message not found in store");
        return Ok(());
    };
    if stored.processed {
        debug!(message_id, "Message already processed");
        return Ok(());
    }

    let observed: DateTime<Utc> = stored.message.observed_at;
    let now = observed.with_timezone(&Local).fixed_offset();
    let result = pipeline
        .process_at(&stored.message.text(), stored.priority, now)
        .await?;

    if let Some(task) = result.outcome.task() {
        let record = store.save_task(message_id, task).await?;
        info!(message_id, task_id = %record.id, title = %record.title, due_at = ?record.due_at, "Task created");
    } else {
        debug!(message_id, intent = ?result.intent, "No task for message");
    }
    store.mark_processed(&[message_id.to_string()]).await?;
    Ok(())
}
