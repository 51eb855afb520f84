//! Factory for creating inference backends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use sift_core::error::SiftResult;
use sift_core::traits::{InferenceBackend, NullBackend};

use crate::llama_server::{LlamaServerBackend, LlamaServerConfig};

/// Which backend runs generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// No generation. The generative tier always falls back.
    #[default]
    Null,
    LlamaServer,
}

/// Factory for creating inference backends.
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend of the given kind.
    pub fn create(kind: BackendKind, llama: LlamaServerConfig) -> SiftResult<Arc<dyn InferenceBackend>> {
        match kind {
            BackendKind::Null => Ok(Arc::new(NullBackend)),
            BackendKind::LlamaServer => {
                let backend = LlamaServerBackend::new(llama)?;
                Ok(Arc::new(backend))
            }
        }
    }

    /// Backend that never loads a model.
    pub fn null() -> Arc<dyn InferenceBackend> {
        Arc::new(NullBackend)
    }

    /// llama.cpp server backend configured from the environment.
    pub fn llama_server() -> SiftResult<Arc<dyn InferenceBackend>> {
        Self::create(BackendKind::LlamaServer, LlamaServerConfig::from_env()?)
    }

    /// llama.cpp server backend at a specific URL.
    pub fn llama_server_at(url: &str) -> SiftResult<Arc<dyn InferenceBackend>> {
        Self::create(BackendKind::LlamaServer, LlamaServerConfig::new(url)?)
    }
}
