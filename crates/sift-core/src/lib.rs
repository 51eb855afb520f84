//! sift-core - Core library for sift.
//!
//! On-device notification triage: a fused priority gate, an intent router,
//! deterministic and generative task extraction, temporal resolution, and an
//! energy-aware scheduler that decides when the work runs.
//!
//! # Example
//!
//! ```ignore
//! use sift_core::{PipelineContext, SharedConfig, SiftConfig, TriagePipeline};
//! use std::sync::Arc;
//!
//! let config = SharedConfig::new(SiftConfig::from_env());
//! let pipeline = TriagePipeline::new(Arc::new(PipelineContext::builder(config).build()));
//!
//! let result = pipeline.triage("Bank: RMB 22,500.00 credited to your account").await?;
//! println!("{}", serde_json::to_string(&result)?);
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod temporal;
pub mod text;
pub mod training;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use classify::{ActiveModel, ClassifierModel, IntentRouter, NaiveBayesTrainer, PriorityGate};
pub use config::{SharedConfig, SiftConfig};
pub use error::{ErrorCode, SiftError, SiftResult};
pub use extract::{DeterministicExtractor, GenerativeExtractor};
pub use pipeline::{PipelineContext, PipelineContextBuilder, TriagePipeline};
pub use runtime::{ModelRuntime, RuntimeOverrides};
pub use scheduler::{Submission, TaskScheduler, WorkConstraints};
pub use store::{MemoryStore, SqliteStore};
pub use temporal::TemporalResolver;
pub use training::{DatasetLogger, FeedbackLog, TrainingJob, TrainingOutcome};
pub use traits::{
    DeviceState, DeviceStateProvider, InferenceBackend, NullBackend, StaticDeviceState,
    TextClassifier, TriageStore,
};
pub use types::{
    ExtractedTask, ExtractionStrategy, Intent, Message, PriorityLabel, RouteDecision,
    TriageOutcome, TriageResult,
};
