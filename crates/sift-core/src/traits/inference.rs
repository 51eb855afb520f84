//! Native inference backend seam.
//!
//! Mirrors a C-ABI style contract: `init` returns an opaque handle,
//! `complete` runs one generation against it, `free` releases it.
//! Calls are blocking; the runtime manager moves them off the async
//! executor and serializes them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{SiftError, SiftResult};

/// Opaque handle to a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelHandle(pub u64);

/// Parameters for loading a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitParams {
    pub model_path: PathBuf,
    pub context_size: u32,
    pub gpu_layers: u32,
    pub threads: u32,
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    /// GBNF grammar constraining sampling. `None` means unconstrained.
    pub grammar: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: u64,
}

impl CompletionRequest {
    /// A greedy, seeded request with no grammar.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            grammar: None,
            max_tokens: 96,
            temperature: 0.0,
            top_p: 1.0,
            seed: 42,
        }
    }

    pub fn with_grammar(mut self, grammar: Option<String>) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A native text-generation backend.
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether the backend can load models at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Load a model and return its handle.
    fn init(&self, params: &InitParams) -> SiftResult<ModelHandle>;

    /// Run one completion.
    fn complete(&self, handle: ModelHandle, request: &CompletionRequest) -> SiftResult<String>;

    /// Release a handle. Unknown handles are ignored.
    fn free(&self, handle: ModelHandle);
}

/// Backend used when no native module is present.
///
/// Every load fails with `ModelUnavailable`, which sends the generative
/// tier straight to its fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl InferenceBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn init(&self, _params: &InitParams) -> SiftResult<ModelHandle> {
        Err(SiftError::model_unavailable("no inference backend installed"))
    }

    fn complete(&self, _handle: ModelHandle, _request: &CompletionRequest) -> SiftResult<String> {
        Err(SiftError::model_unavailable("no inference backend installed"))
    }

    fn free(&self, _handle: ModelHandle) {}
}
