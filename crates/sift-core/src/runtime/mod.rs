//! Lifecycle manager for the native generative model.
//!
//! One model handle is shared by every caller. Native calls run on the
//! blocking pool, one at a time: each call owns a permit of a single-slot
//! semaphore for as long as the native code runs. A caller that times out
//! stops waiting but the permit stays with the native call, so the next
//! request starts only once the handle is consistent again.
//!
//! After `on_background`, the handle is freed once it has been unused for
//! `runtime.idle_release_secs`. Any request cancels and restarts that timer;
//! release never happens while a request is in flight.

mod assets;

pub use assets::ensure_local_model;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::{SharedConfig, GPU_LAYER_RANGE, THREAD_RANGE};
use crate::error::{SiftError, SiftResult};
use crate::traits::{CompletionRequest, InferenceBackend, InitParams, ModelHandle};

/// Per-call load parameters that take precedence over configuration.
///
/// Values are clamped to their ranges. A request whose effective
/// parameters differ from the loaded model's reloads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOverrides {
    threads: Option<u32>,
    gpu_layers: Option<u32>,
}

impl RuntimeOverrides {
    /// CPU thread count, clamped to 1..=8.
    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = Some(threads.clamp(THREAD_RANGE.0, THREAD_RANGE.1));
        self
    }

    /// GPU offload layer count, clamped to 0..=64.
    pub fn gpu_layers(mut self, layers: u32) -> Self {
        self.gpu_layers = Some(layers.clamp(GPU_LAYER_RANGE.0, GPU_LAYER_RANGE.1));
        self
    }
}

#[derive(Debug, Clone)]
struct LoadedModel {
    handle: ModelHandle,
    params: InitParams,
}

struct Inner {
    backend: Arc<dyn InferenceBackend>,
    config: SharedConfig,
    native: Arc<Semaphore>,
    loaded: Mutex<Option<LoadedModel>>,
    in_flight: AtomicUsize,
    background: AtomicBool,
    idle_timer: Mutex<Option<AbortHandle>>,
}

/// Shared manager for the generative model handle. Cheap to clone.
#[derive(Clone)]
pub struct ModelRuntime {
    inner: Arc<Inner>,
}

impl ModelRuntime {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: SharedConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                native: Arc::new(Semaphore::new(1)),
                loaded: Mutex::new(None),
                in_flight: AtomicUsize::new(0),
                background: AtomicBool::new(false),
                idle_timer: Mutex::new(None),
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Whether a native handle is currently loaded.
    pub fn is_loaded(&self) -> bool {
        lock(&self.inner.loaded).is_some()
    }

    /// Load the model with configured parameters if needed and return its handle.
    pub async fn obtain(&self) -> SiftResult<ModelHandle> {
        self.obtain_with(RuntimeOverrides::default()).await
    }

    /// Like [`obtain`](Self::obtain), with per-call load parameters.
    pub async fn obtain_with(&self, overrides: RuntimeOverrides) -> SiftResult<ModelHandle> {
        let _guard = InFlight::enter(&self.inner);
        let permit = self.inner.native_permit().await?;
        let inner = self.inner.clone();
        run_native(move || {
            let _permit = permit;
            inner.load_blocking(overrides)
        })
        .await
    }

    /// Run one completion against a handle from [`obtain`](Self::obtain).
    ///
    /// Fails with `ModelUnavailable` if the handle has been released since.
    pub async fn invoke(&self, handle: ModelHandle, request: CompletionRequest) -> SiftResult<String> {
        let _guard = InFlight::enter(&self.inner);
        let inner = self.inner.clone();
        self.with_timeout(async move {
            let permit = inner.native_permit().await?;
            let worker = inner.clone();
            run_native(move || {
                let _permit = permit;
                if worker.current_handle() != Some(handle) {
                    return Err(SiftError::stale_handle(handle.0));
                }
                worker.backend.complete(handle, &request)
            })
            .await
        })
        .await
    }

    /// Load if needed and run one completion, under a single timeout.
    pub async fn generate(&self, request: CompletionRequest) -> SiftResult<String> {
        self.generate_with(request, RuntimeOverrides::default()).await
    }

    /// Like [`generate`](Self::generate), with per-call load parameters.
    pub async fn generate_with(
        &self,
        request: CompletionRequest,
        overrides: RuntimeOverrides,
    ) -> SiftResult<String> {
        let _guard = InFlight::enter(&self.inner);
        let inner = self.inner.clone();
        self.with_timeout(async move {
            let permit = inner.native_permit().await?;
            let worker = inner.clone();
            run_native(move || {
                let _permit = permit;
                let handle = worker.load_blocking(overrides)?;
                worker.backend.complete(handle, &request)
            })
            .await
        })
        .await
    }

    /// Free a handle. Waits for any native call in progress.
    pub async fn release(&self, handle: ModelHandle) -> SiftResult<()> {
        let _permit = self.inner.native_permit().await?;
        self.inner.free_if(|loaded| loaded.handle == handle);
        Ok(())
    }

    /// App came to the foreground: cancel the idle timer and warm the model.
    pub async fn on_foreground(&self) -> SiftResult<ModelHandle> {
        self.inner.background.store(false, Ordering::SeqCst);
        self.inner.cancel_idle_timer();
        self.obtain().await
    }

    /// App went to the background: start the idle release timer.
    pub fn on_background(&self) {
        self.inner.background.store(true, Ordering::SeqCst);
        Inner::schedule_idle_release(&self.inner);
    }

    async fn with_timeout<F>(&self, fut: F) -> SiftResult<String>
    where
        F: std::future::Future<Output = SiftResult<String>>,
    {
        let limit = Duration::from_secs(self.inner.config.snapshot().runtime.timeout_secs);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "Generation timed out, abandoning native call");
                Err(SiftError::timeout("generation exceeded its deadline", limit))
            }
        }
    }
}

impl Inner {
    async fn native_permit(&self) -> SiftResult<OwnedSemaphorePermit> {
        self.native
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SiftError::internal("model runtime is shut down"))
    }

    fn current_handle(&self) -> Option<ModelHandle> {
        lock(&self.loaded).as_ref().map(|m| m.handle)
    }

    /// Desired load parameters from configuration and overrides.
    fn init_params(&self, model_path: PathBuf, overrides: RuntimeOverrides) -> InitParams {
        let config = self.config.snapshot();
        InitParams {
            model_path,
            context_size: config.runtime.context_size,
            gpu_layers: overrides.gpu_layers.unwrap_or(config.runtime.gpu_layers),
            threads: overrides.threads.unwrap_or(config.runtime.threads),
        }
    }

    /// Ensure the model is loaded with the current parameters. Caller holds the native permit.
    fn load_blocking(&self, overrides: RuntimeOverrides) -> SiftResult<ModelHandle> {
        if !self.backend.is_available() {
            return Err(SiftError::model_unavailable(format!(
                "inference backend '{}' is not available",
                self.backend.name()
            )));
        }

        let config = self.config.snapshot();
        let asset = config
            .models
            .generative_asset
            .as_ref()
            .ok_or_else(|| SiftError::model_unavailable("no generative model asset configured"))?;
        let model_path = ensure_local_model(asset, &config.models_dir())?;
        let params = self.init_params(model_path, overrides);

        let stale = {
            let mut loaded = lock(&self.loaded);
            match loaded.as_ref() {
                Some(current) if current.params == params => return Ok(current.handle),
                _ => loaded.take(),
            }
        };
        if let Some(stale) = stale {
            info!(handle = stale.handle.0, "Parameters changed, reloading model");
            self.backend.free(stale.handle);
        }

        let handle = self.backend.init(&params)?;
        info!(
            backend = self.backend.name(),
            handle = handle.0,
            threads = params.threads,
            gpu_layers = params.gpu_layers,
            "Model loaded"
        );
        *lock(&self.loaded) = Some(LoadedModel { handle, params });
        Ok(handle)
    }

    /// Free the loaded model if `pred` accepts it. Caller holds the native permit.
    fn free_if(&self, pred: impl FnOnce(&LoadedModel) -> bool) -> bool {
        let released = {
            let mut loaded = lock(&self.loaded);
            match loaded.as_ref() {
                Some(current) if pred(current) => loaded.take(),
                _ => None,
            }
        };
        match released {
            Some(model) => {
                self.backend.free(model.handle);
                info!(handle = model.handle.0, "Model released");
                true
            }
            None => false,
        }
    }

    fn cancel_idle_timer(&self) {
        if let Some(timer) = lock(&self.idle_timer).take() {
            timer.abort();
        }
    }

    fn schedule_idle_release(this: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let delay = Duration::from_secs(this.config.snapshot().runtime.idle_release_secs);
        let weak: Weak<Self> = Arc::downgrade(this);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.release_if_idle();
            }
        });
        if let Some(previous) = lock(&this.idle_timer).replace(task.abort_handle()) {
            previous.abort();
        }
        debug!(delay_secs = delay.as_secs(), "Idle release scheduled");
    }

    fn release_if_idle(self: Arc<Self>) {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            debug!("Model busy, skipping idle release");
            return;
        }
        // A native call abandoned after a timeout still holds the permit.
        let Ok(_permit) = self.native.clone().try_acquire_owned() else {
            debug!("Native call still running, rescheduling idle release");
            Self::schedule_idle_release(&self);
            return;
        };
        if self.free_if(|_| true) {
            info!("Released idle model");
        }
    }
}

/// Counts a request as in flight and cancels idle release until dropped.
struct InFlight {
    inner: Arc<Inner>,
}

impl InFlight {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        inner.cancel_idle_timer();
        Self {
            inner: inner.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let remaining = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.inner.background.load(Ordering::SeqCst) {
            Inner::schedule_idle_release(&self.inner);
        }
    }
}

async fn run_native<T, F>(f: F) -> SiftResult<T>
where
    F: FnOnce() -> SiftResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SiftError::internal(format!("native call panicked: {}", e)))?
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiftConfig;
    use crate::traits::NullBackend;
    use std::sync::atomic::AtomicU64;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeBackend {
        next: AtomicU64,
        inits: AtomicUsize,
        frees: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        delay: Duration,
        last_params: Mutex<Option<InitParams>>,
    }

    impl FakeBackend {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    impl InferenceBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn init(&self, params: &InitParams) -> SiftResult<ModelHandle> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            *self.last_params.lock().unwrap() = Some(params.clone());
            Ok(ModelHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1))
        }

        fn complete(&self, handle: ModelHandle, request: &CompletionRequest) -> SiftResult<String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("{}:{}", handle.0, request.prompt))
        }

        fn free(&self, _handle: ModelHandle) {
            self.frees.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(backend: Arc<FakeBackend>, timeout_secs: u64) -> (ModelRuntime, TempDir) {
        let dir = TempDir::new().unwrap();
        let asset = dir.path().join("model.gguf");
        std::fs::write(&asset, b"gguf").unwrap();
        let config = SiftConfig::builder()
            .data_dir(dir.path().join("data"))
            .generative_asset(asset)
            .timeout_secs(timeout_secs)
            .idle_release_secs(120)
            .build();
        (ModelRuntime::new(backend, SharedConfig::new(config)), dir)
    }

    #[tokio::test]
    async fn test_lazy_load_and_reuse() {
        let backend = Arc::new(FakeBackend::default());
        let (runtime, dir) = setup(backend.clone(), 60);
        assert!(!runtime.is_loaded());

        let out = runtime.generate(CompletionRequest::new("a")).await.unwrap();
        assert_eq!(out, "1:a");
        runtime.generate(CompletionRequest::new("b")).await.unwrap();
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("data").join("models").join("model.gguf").exists());

        let handle = runtime.obtain().await.unwrap();
        assert_eq!(runtime.invoke(handle, CompletionRequest::new("c")).await.unwrap(), "1:c");
        runtime.release(handle).await.unwrap();
        assert!(!runtime.is_loaded());
        let err = runtime.invoke(handle, CompletionRequest::new("d")).await.unwrap_err();
        assert!(matches!(err, SiftError::ModelUnavailable { .. }));
        assert_eq!(err.code(), crate::error::ErrorCode::MdlStaleHandle);
    }

    #[tokio::test]
    async fn test_overrides_force_reload() {
        let backend = Arc::new(FakeBackend::default());
        let (runtime, _dir) = setup(backend.clone(), 60);
        runtime.obtain().await.unwrap();

        let overrides = RuntimeOverrides::default().threads(32).gpu_layers(16);
        runtime.obtain_with(overrides).await.unwrap();

        assert_eq!(backend.inits.load(Ordering::SeqCst), 2);
        assert_eq!(backend.frees.load(Ordering::SeqCst), 1);
        let params = backend.last_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.threads, 8);
        assert_eq!(params.gpu_layers, 16);
        assert_eq!(params.context_size, 2048);
    }

    #[tokio::test]
    async fn test_overrides_do_not_leak_between_calls() {
        let backend = Arc::new(FakeBackend::default());
        let (runtime, _dir) = setup(backend.clone(), 60);
        let configured = SiftConfig::default().runtime.threads;

        let overrides = RuntimeOverrides::default().threads(4);
        runtime.generate_with(CompletionRequest::new("a"), overrides).await.unwrap();
        assert_eq!(backend.last_params.lock().unwrap().as_ref().unwrap().threads, 4);

        // A plain call goes back to the configured parameters.
        runtime.generate(CompletionRequest::new("b")).await.unwrap();
        assert_eq!(backend.last_params.lock().unwrap().as_ref().unwrap().threads, configured);
        assert_eq!(backend.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_native_calls_are_serialized() {
        let backend = Arc::new(FakeBackend::slow(Duration::from_millis(20)));
        let (runtime, _dir) = setup(backend.clone(), 60);

        let calls = (0..6).map(|i| {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.generate(CompletionRequest::new(i.to_string())).await })
        });
        for call in futures::future::join_all(calls).await {
            call.unwrap().unwrap();
        }
        assert_eq!(backend.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_abandons_call_and_recovers() {
        let backend = Arc::new(FakeBackend::slow(Duration::from_millis(1500)));
        let (runtime, _dir) = setup(backend.clone(), 1);

        let err = runtime.generate(CompletionRequest::new("slow")).await.unwrap_err();
        assert!(matches!(err, SiftError::Timeout { .. }));

        // The abandoned call finishes in the background; the next request is served.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let runtime = runtime.clone();
        let handle = runtime.obtain().await.unwrap();
        assert_eq!(handle, ModelHandle(1));
        assert_eq!(backend.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_release_after_background() {
        let backend = Arc::new(FakeBackend::default());
        let (runtime, _dir) = setup(backend.clone(), 60);
        runtime.on_foreground().await.unwrap();
        assert!(runtime.is_loaded());

        runtime.on_background();
        tokio::time::sleep(Duration::from_secs(60)).await;
        // Use restarts the timer.
        runtime.generate(CompletionRequest::new("x")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(runtime.is_loaded());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!runtime.is_loaded());
        assert_eq!(backend.frees.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_cancels_idle_release() {
        let backend = Arc::new(FakeBackend::default());
        let (runtime, _dir) = setup(backend.clone(), 60);
        runtime.obtain().await.unwrap();

        runtime.on_background();
        tokio::time::sleep(Duration::from_secs(10)).await;
        runtime.on_foreground().await.unwrap();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(runtime.is_loaded());
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_backend_is_unavailable() {
        let runtime = ModelRuntime::new(Arc::new(NullBackend), SharedConfig::default());
        assert!(matches!(
            runtime.generate(CompletionRequest::new("x")).await,
            Err(SiftError::ModelUnavailable { .. })
        ));
    }
}
