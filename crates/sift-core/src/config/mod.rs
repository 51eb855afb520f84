//! Configuration system for sift.
//!
//! Every option has a default. Ranged options are clamped on load, and the
//! running services read through [`SharedConfig`] so a reload takes effect
//! on the next decision.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

use crate::error::{SiftError, SiftResult};
use crate::types::RoutingTable;

/// Allowed battery threshold range, percent.
pub const BATTERY_THRESHOLD_RANGE: (u8, u8) = (5, 50);
/// Allowed generative thread count range.
pub const THREAD_RANGE: (u32, u32) = (1, 8);
/// Allowed GPU offload layer range.
pub const GPU_LAYER_RANGE: (u32, u32) = (0, 64);
/// Allowed medium batch interval range, minutes.
pub const BATCH_INTERVAL_RANGE: (u64, u64) = (5, 120);

/// Which scorer decides when fusion is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryScorer {
    #[default]
    Neural,
    Statistical,
}

/// L1 fusion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub enabled: bool,
    pub primary: PrimaryScorer,
    pub neural_weight: f32,
    pub statistical_weight: f32,
    /// A scorer whose top probability reaches this value wins outright.
    pub confidence_threshold: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary: PrimaryScorer::Neural,
            neural_weight: 0.6,
            statistical_weight: 0.4,
            confidence_threshold: 0.70,
        }
    }
}

impl FusionConfig {
    /// Weights rescaled to sum to 1. Non-positive input falls back to an even split.
    pub fn normalized_weights(&self) -> (f32, f32) {
        let neural = self.neural_weight.max(0.0);
        let statistical = self.statistical_weight.max(0.0);
        let sum = neural + statistical;
        if sum <= f32::EPSILON || !sum.is_finite() {
            return (0.5, 0.5);
        }
        (neural / sum, statistical / sum)
    }
}

/// Retry policy for scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_delay_ms: 30_000,
            max_delay_ms: 900_000,
            multiplier: 2.0,
        }
    }
}

/// Admission and gating settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Medium work runs when battery is at least this, or when charging.
    pub battery_threshold_pct: u8,
    /// Interval of the sweep that re-admits unprocessed Medium messages.
    pub medium_batch_interval_minutes: u64,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            battery_threshold_pct: 15,
            medium_batch_interval_minutes: 30,
            retry: RetryPolicy::default(),
        }
    }
}

/// Sampling settings for the generative extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: u64,
    /// GBNF grammar file. The bundled grammar is used when unset.
    pub grammar_path: Option<PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 96,
            temperature: 0.0,
            top_p: 1.0,
            seed: 42,
            grammar_path: None,
        }
    }
}

/// Native model lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub threads: u32,
    pub gpu_layers: u32,
    pub context_size: u32,
    pub timeout_secs: u64,
    /// Release the model after this long in the background without use.
    pub idle_release_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            gpu_layers: 0,
            context_size: 2048,
            timeout_secs: 900,
            idle_release_secs: 120,
        }
    }
}

/// Model asset locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelPaths {
    /// Packaged generative weights, copied into the data directory on first use.
    pub generative_asset: Option<PathBuf>,
    /// Active statistical classifier JSON. Defaults to `<data_dir>/models/priority_nb.json`.
    pub statistical_model: Option<PathBuf>,
}

/// Retraining settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub vocab_size: usize,
    pub alpha: f32,
    /// Held-out accuracy a new model needs before it becomes active.
    pub acceptance_accuracy: f64,
    pub holdout_fraction: f64,
    /// JSONL feedback log. Defaults to `<data_dir>/feedback.jsonl`.
    pub feedback_log: Option<PathBuf>,
    /// Optional seed CSV with `text,label` rows.
    pub seed_dataset: Option<PathBuf>,
    /// Six-field cron expression for the nightly job.
    pub cron: String,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            vocab_size: 32_768,
            alpha: 1.0,
            acceptance_accuracy: 0.90,
            holdout_fraction: 0.2,
            feedback_log: None,
            seed_dataset: None,
            cron: "0 0 2 * * *".to_string(),
            night_start_hour: 0,
            night_end_hour: 6,
        }
    }
}

/// Main sift configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Private directory for models, the database and the feedback log.
    pub data_dir: PathBuf,
    /// SQLite database. Defaults to `<data_dir>/sift.db`.
    pub database_path: Option<PathBuf>,
    pub fusion: FusionConfig,
    pub scheduler: SchedulerConfig,
    pub generation: GenerationConfig,
    pub runtime: RuntimeConfig,
    pub models: ModelPaths,
    pub training: TrainingConfig,
    pub routing: RoutingTable,
}

impl Default for SiftConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("sift"))
            .unwrap_or_else(|| PathBuf::from(".sift"));

        Self {
            data_dir,
            database_path: None,
            fusion: FusionConfig::default(),
            scheduler: SchedulerConfig::default(),
            generation: GenerationConfig::default(),
            runtime: RuntimeConfig::default(),
            models: ModelPaths::default(),
            training: TrainingConfig::default(),
            routing: RoutingTable::default(),
        }
    }
}

impl SiftConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> SiftResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| SiftError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| SiftError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| SiftError::Configuration(e.to_string()))?,
            _ => {
                return Err(SiftError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        Ok(config.clamped())
    }

    /// Load configuration from `SIFT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SIFT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("SIFT_DB_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("SIFT_MODEL_PATH") {
            config.models.generative_asset = Some(PathBuf::from(path));
        }
        if let Some(enabled) = env_parse::<bool>("SIFT_FUSION_ENABLED") {
            config.fusion.enabled = enabled;
        }
        if let Some(pct) = env_parse::<u8>("SIFT_BATTERY_THRESHOLD") {
            config.scheduler.battery_threshold_pct = pct;
        }
        if let Some(minutes) = env_parse::<u64>("SIFT_BATCH_INTERVAL") {
            config.scheduler.medium_batch_interval_minutes = minutes;
        }
        if let Some(threads) = env_parse::<u32>("SIFT_THREADS") {
            config.runtime.threads = threads;
        }
        if let Some(layers) = env_parse::<u32>("SIFT_GPU_LAYERS") {
            config.runtime.gpu_layers = layers;
        }

        config.clamped()
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> SiftConfigBuilder {
        SiftConfigBuilder::default()
    }

    /// Clamp ranged options into their allowed ranges.
    pub fn clamped(mut self) -> Self {
        self.scheduler.battery_threshold_pct = clamp_logged(
            "scheduler.battery_threshold_pct",
            self.scheduler.battery_threshold_pct,
            BATTERY_THRESHOLD_RANGE,
        );
        self.scheduler.medium_batch_interval_minutes = clamp_logged(
            "scheduler.medium_batch_interval_minutes",
            self.scheduler.medium_batch_interval_minutes,
            BATCH_INTERVAL_RANGE,
        );
        self.runtime.threads = clamp_logged("runtime.threads", self.runtime.threads, THREAD_RANGE);
        self.runtime.gpu_layers =
            clamp_logged("runtime.gpu_layers", self.runtime.gpu_layers, GPU_LAYER_RANGE);

        let (neural, statistical) = self.fusion.normalized_weights();
        self.fusion.neural_weight = neural;
        self.fusion.statistical_weight = statistical;
        self.fusion.confidence_threshold = self.fusion.confidence_threshold.clamp(0.0, 1.0);
        self.training.holdout_fraction = self.training.holdout_fraction.clamp(0.05, 0.5);
        self.training.vocab_size = self.training.vocab_size.max(1);
        self
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sift.db"))
    }

    pub fn statistical_model_path(&self) -> PathBuf {
        self.models
            .statistical_model
            .clone()
            .unwrap_or_else(|| self.models_dir().join("priority_nb.json"))
    }

    pub fn feedback_log_path(&self) -> PathBuf {
        self.training
            .feedback_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join("feedback.jsonl"))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

fn clamp_logged<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: T, range: (T, T)) -> T {
    let (min, max) = range;
    if value < min || value > max {
        let clamped = if value < min { min } else { max };
        warn!(option = name, value = %value, clamped = %clamped, "Config value out of range");
        clamped
    } else {
        value
    }
}

/// Builder for SiftConfig.
#[derive(Default)]
pub struct SiftConfigBuilder {
    config: SiftConfig,
}

impl SiftConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    pub fn fusion(mut self, fusion: FusionConfig) -> Self {
        self.config.fusion = fusion;
        self
    }

    pub fn fusion_enabled(mut self, enabled: bool) -> Self {
        self.config.fusion.enabled = enabled;
        self
    }

    pub fn battery_threshold(mut self, pct: u8) -> Self {
        self.config.scheduler.battery_threshold_pct = pct;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.scheduler.retry = policy;
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.config.runtime.threads = threads;
        self
    }

    pub fn gpu_layers(mut self, layers: u32) -> Self {
        self.config.runtime.gpu_layers = layers;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.runtime.timeout_secs = secs;
        self
    }

    pub fn idle_release_secs(mut self, secs: u64) -> Self {
        self.config.runtime.idle_release_secs = secs;
        self
    }

    pub fn generative_asset(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.models.generative_asset = Some(path.into());
        self
    }

    pub fn routing(mut self, routing: RoutingTable) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn training(mut self, training: TrainingConfig) -> Self {
        self.config.training = training;
        self
    }

    /// Build the configuration, clamping ranged options.
    pub fn build(self) -> SiftConfig {
        self.config.clamped()
    }
}

/// Hot-reloadable configuration handle.
///
/// Readers take a snapshot per decision. A reload swaps the whole
/// configuration, so a snapshot is never partially updated.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<SiftConfig>>>,
}

impl SharedConfig {
    pub fn new(config: SiftConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current configuration.
    pub fn snapshot(&self) -> Arc<SiftConfig> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration.
    pub fn replace(&self, config: SiftConfig) {
        let config = Arc::new(config.clamped());
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Apply an edit to a copy of the current configuration and swap it in.
    pub fn update(&self, edit: impl FnOnce(&mut SiftConfig)) {
        let mut next = (*self.snapshot()).clone();
        edit(&mut next);
        self.replace(next);
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(SiftConfig::default())
    }
}
