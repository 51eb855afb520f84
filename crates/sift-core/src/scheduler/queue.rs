//! Keyed work queue with dedup policies and backoff.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::gate::WorkConstraints;
use crate::config::{RetryPolicy, SharedConfig};
use crate::error::SiftResult;
use crate::traits::DeviceStateProvider;
use crate::types::PriorityLabel;

/// What happens when a key is admitted while an earlier unit is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// The new unit replaces the pending one. If that one already started,
    /// the new unit runs after it.
    Replace,
    /// The pending unit stays; the new one is dropped.
    Keep,
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Dedup key, the message id.
    pub key: String,
    pub priority: PriorityLabel,
    pub constraints: WorkConstraints,
    pub policy: DedupPolicy,
}

impl WorkItem {
    /// High priority: no constraints, latest admission wins.
    pub fn expedited(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            priority: PriorityLabel::High,
            constraints: WorkConstraints::expedited(),
            policy: DedupPolicy::Replace,
        }
    }

    /// Medium priority: device-gated on the configured battery threshold,
    /// first admission wins.
    pub fn deferrable(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            priority: PriorityLabel::Medium,
            constraints: WorkConstraints::deferrable_from_config(),
            policy: DedupPolicy::Keep,
        }
    }
}

/// Result of admitting a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Queued,
    /// A pending unit with the same key was cancelled in favor of this one.
    Replaced,
    /// A unit with the same key is running; this one runs once it finishes.
    Chained,
    /// A unit with the same key is already pending.
    Dropped,
}

/// Runs one admitted item.
pub type WorkHandler = Arc<dyn Fn(WorkItem) -> BoxFuture<'static, SiftResult<()>> + Send + Sync>;

/// Platform-neutral background work queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Admit an item. Constraints are checked when it is about to run.
    async fn admit(&self, item: WorkItem) -> Admission;

    /// Install the handler that executes ready items.
    fn on_ready(&self, handler: WorkHandler);

    /// Units admitted but not yet finished.
    fn pending(&self) -> usize;
}

/// Units of one key hold this while their handler runs.
type KeyLock = Arc<tokio::sync::Mutex<()>>;

struct Pending {
    generation: u64,
    started: Arc<AtomicBool>,
    lock: KeyLock,
    abort: AbortHandle,
}

struct QueueInner {
    pending: Mutex<HashMap<String, Pending>>,
    generation: AtomicU64,
    handler: RwLock<Option<WorkHandler>>,
    device: Arc<dyn DeviceStateProvider>,
    config: SharedConfig,
    idle: Notify,
}

/// [`WorkQueue`] on tokio tasks, one task per admitted key.
#[derive(Clone)]
pub struct TokioWorkQueue {
    inner: Arc<QueueInner>,
}

impl TokioWorkQueue {
    pub fn new(device: Arc<dyn DeviceStateProvider>, config: SharedConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                handler: RwLock::new(None),
                device,
                config,
                idle: Notify::new(),
            }),
        }
    }

    /// Whether a unit for `key` is admitted and unfinished.
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.pending().contains_key(key)
    }

    /// Wait until every admitted unit has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Abort every pending unit.
    pub fn cancel_all(&self) {
        let mut pending = self.inner.pending();
        for (key, unit) in pending.drain() {
            debug!(key = %key, "Cancelled pending work");
            unit.abort.abort();
        }
        self.inner.idle.notify_waiters();
    }
}

#[async_trait]
impl WorkQueue for TokioWorkQueue {
    async fn admit(&self, item: WorkItem) -> Admission {
        let mut pending = self.inner.pending();

        let (admission, lock) = match pending.get(&item.key) {
            None => (Admission::Queued, KeyLock::default()),
            Some(_) if item.policy == DedupPolicy::Keep => {
                debug!(key = %item.key, "Work already pending, dropping duplicate");
                return Admission::Dropped;
            }
            Some(existing) if existing.started.load(Ordering::Acquire) => {
                // Never two handlers for one key: wait on the running unit's lock.
                debug!(key = %item.key, "Pending work already started, chaining after it");
                (Admission::Chained, existing.lock.clone())
            }
            Some(existing) => {
                existing.abort.abort();
                debug!(key = %item.key, "Replaced pending work");
                (Admission::Replaced, existing.lock.clone())
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let started = Arc::new(AtomicBool::new(false));
        let inner = self.inner.clone();
        let key = item.key.clone();
        let unit = Unit {
            item,
            generation,
            started: started.clone(),
            lock: lock.clone(),
        };
        let task = tokio::spawn(run_unit(inner, unit));
        pending.insert(
            key,
            Pending {
                generation,
                started,
                lock,
                abort: task.abort_handle(),
            },
        );
        admission
    }

    fn on_ready(&self, handler: WorkHandler) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn pending(&self) -> usize {
        self.inner.pending().len()
    }
}

impl QueueInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self) -> Option<WorkHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish(&self, key: &str, generation: u64) {
        let mut pending = self.pending();
        if pending.get(key).is_some_and(|p| p.generation == generation) {
            pending.remove(key);
        }
        if pending.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

fn backoff(policy: &RetryPolicy) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_max_times(policy.max_retries as usize)
        .with_min_delay(Duration::from_millis(policy.initial_delay_ms))
        .with_max_delay(Duration::from_millis(policy.max_delay_ms))
        .with_factor(policy.multiplier)
}

struct Unit {
    item: WorkItem,
    generation: u64,
    started: Arc<AtomicBool>,
    lock: KeyLock,
}

async fn run_unit(inner: Arc<QueueInner>, unit: Unit) {
    let Unit {
        item,
        generation,
        started,
        lock,
    } = unit;
    let policy = inner.config.snapshot().scheduler.retry.clone();
    let attempt = AtomicU64::new(0);

    let run_once = || async {
        let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
        let config = inner.config.snapshot();
        item.constraints
            .with_config(&config.scheduler)
            .evaluate(&inner.device.snapshot())?;
        let Some(handler) = inner.handler() else {
            warn!(key = %item.key, "No work handler installed, dropping work");
            return Ok(());
        };
        let _running = lock.lock().await;
        started.store(true, Ordering::Release);
        debug!(key = %item.key, priority = %item.priority, attempt = n, "Running work");
        handler(item.clone()).await
    };

    let result = run_once
        .retry(backoff(&policy))
        .when(|e| e.is_retryable())
        .notify(|err, dur| {
            info!(key = %item.key, error = %err, retry_in = ?dur, "Work deferred");
        })
        .await;

    match result {
        Ok(()) => debug!(key = %item.key, attempts = attempt.load(Ordering::Relaxed), "Work finished"),
        Err(e) => error!(key = %item.key, error = %e, code = %e.code(), "Work failed"),
    }
    inner.finish(&item.key, generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiftConfig;
    use crate::error::SiftError;
    use crate::traits::{DeviceState, StaticDeviceState};
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn fast_retry() -> SharedConfig {
        SharedConfig::new(
            SiftConfig::builder()
                .retry_policy(RetryPolicy {
                    max_retries: 5,
                    initial_delay_ms: 1_000,
                    max_delay_ms: 8_000,
                    multiplier: 2.0,
                })
                .build(),
        )
    }

    fn counting(count: Arc<AtomicUsize>, delay: Duration) -> WorkHandler {
        Arc::new(move |_item| {
            let count = count.clone();
            async move {
                tokio::time::sleep(delay).await;
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    fn screen_off() -> DeviceState {
        DeviceState {
            screen_interactive: false,
            ..DeviceState::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_drops_duplicate() {
        let device = Arc::new(StaticDeviceState::new(screen_off()));
        let queue = TokioWorkQueue::new(device, fast_retry());
        let runs = Arc::new(AtomicUsize::new(0));
        queue.on_ready(counting(runs.clone(), Duration::from_millis(50)));

        assert_eq!(queue.admit(WorkItem::deferrable("m1")).await, Admission::Queued);
        assert_eq!(queue.admit(WorkItem::deferrable("m1")).await, Admission::Dropped);
        assert_eq!(queue.pending(), 1);

        queue.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!queue.is_pending("m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_cancels_waiting_unit() {
        let device = Arc::new(StaticDeviceState::new(DeviceState::default()));
        let queue = TokioWorkQueue::new(device.clone(), fast_retry());
        let runs = Arc::new(AtomicUsize::new(0));
        queue.on_ready(counting(runs.clone(), Duration::ZERO));

        // Gated behind screen-off, so the first unit is still waiting.
        let mut item = WorkItem::expedited("m1");
        item.constraints = WorkConstraints::deferrable(15);
        assert_eq!(queue.admit(item.clone()).await, Admission::Queued);
        tokio::task::yield_now().await;
        assert_eq!(queue.admit(item).await, Admission::Replaced);
        assert_eq!(queue.pending(), 1);

        device.set(screen_off());
        queue.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_while_running_chains_after_it() {
        let device = Arc::new(StaticDeviceState::default());
        let queue = TokioWorkQueue::new(device, fast_retry());
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));
        let (r, o, c) = (running.clone(), overlapped.clone(), runs.clone());
        queue.on_ready(Arc::new(move |_item| {
            let (running, overlapped, runs) = (r.clone(), o.clone(), c.clone());
            async move {
                if running.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlapped.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }));

        assert_eq!(queue.admit(WorkItem::expedited("m1")).await, Admission::Queued);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.admit(WorkItem::expedited("m1")).await, Admission::Chained);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(running.load(Ordering::SeqCst), 1);

        queue.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_threshold_follows_config() {
        let device = Arc::new(StaticDeviceState::new(DeviceState {
            battery_pct: 10,
            ..screen_off()
        }));
        let config = fast_retry();
        let queue = TokioWorkQueue::new(device, config.clone());
        let runs = Arc::new(AtomicUsize::new(0));
        queue.on_ready(counting(runs.clone(), Duration::ZERO));

        queue.admit(WorkItem::deferrable("m1")).await;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        config.update(|c| c.scheduler.battery_threshold_pct = 5);
        queue.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmet_gate_defers_until_satisfied() {
        let device = Arc::new(StaticDeviceState::new(DeviceState {
            battery_pct: 5,
            ..screen_off()
        }));
        let queue = TokioWorkQueue::new(device.clone(), fast_retry());
        let runs = Arc::new(AtomicUsize::new(0));
        queue.on_ready(counting(runs.clone(), Duration::ZERO));

        queue.admit(WorkItem::deferrable("m1")).await;
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(queue.is_pending("m1"));

        device.update(|s| s.charging = true);
        queue.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_failure_not_retried() {
        let device = Arc::new(StaticDeviceState::default());
        let queue = TokioWorkQueue::new(device, fast_retry());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        queue.on_ready(Arc::new(move |_item| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SiftError::contract("bad tier"))
            }
            .boxed()
        }));

        queue.admit(WorkItem::expedited("m1")).await;
        queue.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let device = Arc::new(StaticDeviceState::default());
        let queue = TokioWorkQueue::new(device, fast_retry());
        let runs = Arc::new(AtomicUsize::new(0));
        queue.on_ready(counting(runs.clone(), Duration::ZERO));

        // Screen stays on: gate never passes, the unit gives up after its retries.
        queue.admit(WorkItem::deferrable("m1")).await;
        queue.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending(), 0);
    }
}
