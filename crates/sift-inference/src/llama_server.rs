//! Backend for a llama.cpp HTTP server.
//!
//! The server owns the model weights, so `init` only checks that it is up
//! and hands out a handle. `complete` posts to `/completion` with the
//! grammar and sampling settings of the request.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use sift_core::error::{SiftError, SiftResult};
use sift_core::traits::{CompletionRequest, InferenceBackend, InitParams, ModelHandle};

const DEFAULT_URL: &str = "http://127.0.0.1:8080";

/// ChatML end-of-turn marker; generation stops there.
const STOP_SEQUENCES: &[&str] = &["<|im_end|>", "<|endoftext|>"];

/// Connection settings for a llama.cpp server.
#[derive(Debug, Clone)]
pub struct LlamaServerConfig {
    /// Server root, without a trailing slash.
    pub base_url: String,
    /// Bearer key, for servers started with `--api-key`.
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
}

impl Default for LlamaServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(900),
        }
    }
}

impl LlamaServerConfig {
    pub fn new(base_url: &str) -> SiftResult<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| SiftError::Configuration(format!("Invalid llama server URL {base_url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SiftError::Configuration(format!(
                "llama server URL must be http or https: {base_url}"
            )));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read `SIFT_LLAMA_URL` and `SIFT_LLAMA_API_KEY`.
    pub fn from_env() -> SiftResult<Self> {
        let mut config = match std::env::var("SIFT_LLAMA_URL") {
            Ok(url) => Self::new(&url)?,
            Err(_) => Self::default(),
        };
        if let Ok(key) = std::env::var("SIFT_LLAMA_API_KEY") {
            config = config.with_api_key(key);
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    grammar: Option<&'a str>,
    stop: &'a [&'a str],
    cache_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    error: ServerErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ServerErrorDetail {
    message: String,
}

/// [`InferenceBackend`] over the llama.cpp server API.
pub struct LlamaServerBackend {
    client: Client,
    config: LlamaServerConfig,
    handles: Mutex<HashSet<u64>>,
    next_handle: AtomicU64,
}

impl LlamaServerBackend {
    pub fn new(config: LlamaServerConfig) -> SiftResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SiftError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            handles: Mutex::new(HashSet::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &LlamaServerConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.config.base_url, path));
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    /// Check the server reports a loaded model.
    pub async fn health(&self) -> SiftResult<()> {
        let response = self
            .request(reqwest::Method::GET, "health")
            .send()
            .await
            .map_err(|e| SiftError::model_unavailable(format!("llama server unreachable: {}", e)))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SiftError::model_unavailable(format!("llama server not ready ({})", status)))
        }
    }

    /// Run one completion against the server.
    pub async fn complete_async(&self, request: &CompletionRequest) -> SiftResult<String> {
        let body = CompletionBody {
            prompt: &request.prompt,
            n_predict: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            seed: request.seed,
            grammar: request.grammar.as_deref(),
            stop: STOP_SEQUENCES,
            cache_prompt: true,
        };

        let response = self
            .request(reqwest::Method::POST, "completion")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SiftError::timeout("llama server completion", self.config.request_timeout)
                } else {
                    SiftError::inference(format!("llama server request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SiftError::inference(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ServerError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(SiftError::inference(format!("llama server error ({}): {}", status, message)));
        }

        let reply: CompletionReply = serde_json::from_str(&text)
            .map_err(|e| SiftError::inference(format!("Failed to parse completion: {}", e)))?;
        debug!(chars = reply.content.len(), "llama server completion");
        Ok(reply.content)
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drive a future to completion from a blocking-pool thread.
fn block_on<F: Future>(future: F) -> SiftResult<F::Output> {
    let handle = Handle::try_current()
        .map_err(|_| SiftError::internal("llama server backend needs a tokio runtime"))?;
    Ok(handle.block_on(future))
}

impl InferenceBackend for LlamaServerBackend {
    fn name(&self) -> &'static str {
        "llama-server"
    }

    fn init(&self, params: &InitParams) -> SiftResult<ModelHandle> {
        block_on(self.health())??;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles().insert(id);
        info!(
            url = %self.config.base_url,
            model = %params.model_path.display(),
            handle = id,
            "Connected to llama server"
        );
        if params.threads > 1 || params.gpu_layers > 0 {
            debug!(
                threads = params.threads,
                gpu_layers = params.gpu_layers,
                "Thread and GPU settings are fixed when the server starts"
            );
        }
        Ok(ModelHandle(id))
    }

    fn complete(&self, handle: ModelHandle, request: &CompletionRequest) -> SiftResult<String> {
        if !self.handles().contains(&handle.0) {
            return Err(SiftError::stale_handle(handle.0));
        }
        block_on(self.complete_async(request))?
    }

    fn free(&self, handle: ModelHandle) {
        if !self.handles().remove(&handle.0) {
            warn!(handle = handle.0, "Freeing unknown model handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let config = LlamaServerConfig::new("http://10.0.0.2:9000/").unwrap();
        assert_eq!(config.base_url, "http://10.0.0.2:9000");
        assert!(LlamaServerConfig::new("not a url").is_err());
        assert!(LlamaServerConfig::new("ftp://host/").is_err());
    }

    #[test]
    fn test_body_omits_missing_grammar() {
        let request = CompletionRequest::new("hi");
        let body = CompletionBody {
            prompt: &request.prompt,
            n_predict: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            seed: request.seed,
            grammar: None,
            stop: STOP_SEQUENCES,
            cache_prompt: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("grammar").is_none());
        assert_eq!(json["n_predict"], 96);
        assert_eq!(json["seed"], 42);
    }

    #[test]
    fn test_complete_rejects_unknown_handle() {
        let backend = LlamaServerBackend::new(LlamaServerConfig::default()).unwrap();
        let err = backend
            .complete(ModelHandle(99), &CompletionRequest::new("x"))
            .unwrap_err();
        assert!(matches!(err, SiftError::ModelUnavailable { .. }));
        assert_eq!(err.code(), sift_core::error::ErrorCode::MdlStaleHandle);
    }
}
