//! sift-inference - Inference backends for sift.
//!
//! This crate provides the [`InferenceBackend`] implementations the model
//! runtime loads generative models through:
//! - llama.cpp server (`/completion` with GBNF grammars)
//! - Null backend, for devices without a model
//!
//! # Example
//!
//! ```ignore
//! use sift_inference::{BackendFactory, BackendKind, LlamaServerConfig};
//! use sift_core::{PipelineContext, SharedConfig};
//!
//! let backend = BackendFactory::create(
//!     BackendKind::LlamaServer,
//!     LlamaServerConfig::new("http://127.0.0.1:8080")?,
//! )?;
//! let ctx = PipelineContext::builder(SharedConfig::default())
//!     .backend(backend)
//!     .build();
//! ```

mod factory;
mod llama_server;

pub use factory::{BackendFactory, BackendKind};
pub use llama_server::{LlamaServerBackend, LlamaServerConfig};

// Re-export core types for convenience
pub use sift_core::traits::{
    CompletionRequest, InferenceBackend, InitParams, ModelHandle, NullBackend,
};
