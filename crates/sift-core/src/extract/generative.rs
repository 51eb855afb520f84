//! Generative extraction through the local model, with heuristic fallback.

use chrono::{DateTime, FixedOffset, Local, Utc};
use tracing::{debug, info, warn};

use super::fallback::{guess_due_text, guess_summary};
use super::json_parser::{parse_model_output, ModelOutput};
use super::prompts::build_prompt;
use crate::config::{GenerationConfig, SharedConfig};
use crate::runtime::ModelRuntime;
use crate::temporal::TemporalResolver;
use crate::traits::CompletionRequest;
use crate::types::{ExtractedTask, Intent};

/// Grammar bundled with the crate, used unless a grammar file is configured.
pub const BUNDLED_GRAMMAR: &str = include_str!("../../assets/json_ie.gbnf");

/// Summary and due text before resolution.
#[derive(Debug, Clone, PartialEq)]
struct Draft {
    summary: String,
    due_text: Option<String>,
}

impl Draft {
    fn heuristic(text: &str) -> Self {
        Self {
            summary: guess_summary(text),
            due_text: guess_due_text(text),
        }
    }

    fn from_model(output: ModelOutput, text: &str, routed: Intent) -> Self {
        match output.intent.as_deref().map(|label| (label, Intent::from_label(label))) {
            Some((_, Some(model_intent))) if model_intent != routed => {
                warn!(routed = %routed, model = %model_intent, "Model intent disagrees with router, keeping router's");
            }
            Some((label, None)) => {
                warn!(label, "Model produced an unknown intent label");
            }
            _ => {}
        }

        let summary = output
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guess_summary(text));
        Self {
            summary,
            due_text: output.due_text(),
        }
    }
}

/// L3 generative extractor.
pub struct GenerativeExtractor {
    runtime: ModelRuntime,
    config: SharedConfig,
    resolver: TemporalResolver,
}

impl GenerativeExtractor {
    pub fn new(runtime: ModelRuntime, config: SharedConfig) -> Self {
        Self {
            runtime,
            config,
            resolver: TemporalResolver::new(),
        }
    }

    pub fn runtime(&self) -> &ModelRuntime {
        &self.runtime
    }

    /// Extract a task, resolving times against the local clock.
    pub async fn extract(&self, text: &str, intent: Intent) -> Option<ExtractedTask> {
        self.extract_at(text, intent, Local::now().fixed_offset()).await
    }

    /// Extract a task, resolving times against `now`.
    ///
    /// Returns `None` only for blank input: model failure, timeout and
    /// unparseable output all fall back to a heuristic task.
    pub async fn extract_at(
        &self,
        text: &str,
        intent: Intent,
        now: DateTime<FixedOffset>,
    ) -> Option<ExtractedTask> {
        if text.trim().is_empty() {
            return None;
        }

        let generation = self.config.snapshot().generation.clone();
        let request = build_request(text, &generation);

        let draft = match self.runtime.generate(request).await {
            Ok(raw) => match parse_model_output(&raw) {
                Ok(output) => Draft::from_model(output, text, intent),
                Err(e) => {
                    warn!(error = %e, "Unparseable model output, using heuristic task");
                    debug!(raw = %raw, "Raw model output");
                    Draft::heuristic(text)
                }
            },
            Err(e) => {
                warn!(error = %e, code = %e.code(), "Generative model failed, using heuristic task");
                Draft::heuristic(text)
            }
        };

        let due_at = draft.due_text.as_deref().and_then(|due| {
            let resolved = self.resolver.resolve(due, &now);
            if resolved.is_none() {
                debug!(due, "Due text did not resolve");
            }
            resolved.map(|dt| dt.with_timezone(&Utc))
        });

        let task = ExtractedTask::new(&draft.summary, due_at);
        info!(
            intent = %intent,
            title = task.as_ref().map(|t| t.title()),
            due_at = ?due_at,
            "Generative extraction"
        );
        task
    }
}

fn build_request(text: &str, generation: &GenerationConfig) -> CompletionRequest {
    let mut request = CompletionRequest::new(build_prompt(text))
        .with_grammar(load_grammar(generation))
        .with_max_tokens(generation.max_tokens);
    request.temperature = generation.temperature;
    request.top_p = generation.top_p;
    request.seed = generation.seed;
    request
}

/// Configured grammar, else the bundled one. An unreadable file means unconstrained decoding.
fn load_grammar(generation: &GenerationConfig) -> Option<String> {
    let Some(path) = generation.grammar_path.as_ref() else {
        return Some(BUNDLED_GRAMMAR.trim().to_string());
    };
    match std::fs::read_to_string(path) {
        Ok(grammar) if !grammar.trim().is_empty() => Some(grammar.trim().to_string()),
        Ok(_) => {
            warn!(path = %path.display(), "Grammar file is empty, decoding unconstrained");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read grammar file, decoding unconstrained");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiftConfig;
    use crate::error::SiftResult;
    use crate::traits::{InferenceBackend, InitParams, ModelHandle, NullBackend};
    use chrono::{NaiveDate, TimeZone};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct ScriptedBackend {
        reply: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl InferenceBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn init(&self, _params: &InitParams) -> SiftResult<ModelHandle> {
            Ok(ModelHandle(7))
        }
        fn complete(&self, _handle: ModelHandle, request: &CompletionRequest) -> SiftResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
        fn free(&self, _handle: ModelHandle) {}
    }

    fn now() -> DateTime<FixedOffset> {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        tz.from_local_datetime(
            &NaiveDate::from_ymd_opt(2024, 11, 4)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        )
        .unwrap()
    }

    fn local(h: u32, day: u32) -> DateTime<Utc> {
        now()
            .timezone()
            .from_local_datetime(&NaiveDate::from_ymd_opt(2024, 11, day).unwrap().and_hms_opt(h, 0, 0).unwrap())
            .unwrap()
            .with_timezone(&Utc)
    }

    fn scripted(reply: &str, grammar_path: Option<std::path::PathBuf>) -> (GenerativeExtractor, Arc<ScriptedBackend>, TempDir) {
        let dir = TempDir::new().unwrap();
        let asset = dir.path().join("model.gguf");
        std::fs::write(&asset, b"gguf").unwrap();
        let mut config = SiftConfig::builder()
            .data_dir(dir.path().join("data"))
            .generative_asset(asset)
            .build();
        config.generation.grammar_path = grammar_path;
        let config = SharedConfig::new(config);
        let backend = Arc::new(ScriptedBackend {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let runtime = ModelRuntime::new(backend.clone(), config.clone());
        (GenerativeExtractor::new(runtime, config), backend, dir)
    }

    #[tokio::test]
    async fn test_model_output_used() {
        let (extractor, backend, _dir) = scripted(
            "```json\n{\"intent\": \"reminder\", \"summary\": \"Confirm project sync\", \"due_time\": \"today 3pm\"}\n```",
            None,
        );
        let task = extractor
            .extract_at("Project sync moved to today 3pm", Intent::WorkComms, now())
            .await
            .unwrap();
        assert_eq!(task.title(), "Confirm project sync");
        assert_eq!(task.due_at(), Some(local(15, 4)));

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].grammar.as_deref(), Some(BUNDLED_GRAMMAR.trim()));
        assert_eq!(seen[0].max_tokens, 96);
        assert_eq!(seen[0].seed, 42);
    }

    #[tokio::test]
    async fn test_unparseable_output_falls_back() {
        let (extractor, _backend, _dir) = scripted("I cannot help with that.", None);
        let task = extractor
            .extract_at("Project sync moved from tomorrow 9am to today 3pm, please confirm", Intent::WorkComms, now())
            .await
            .unwrap();
        assert!(task.title().starts_with("Confirm"));
        assert_eq!(task.due_at(), Some(local(15, 4)));
    }

    #[tokio::test]
    async fn test_unresolvable_due_time_is_dropped() {
        let (extractor, _backend, _dir) = scripted(
            "{\"intent\": \"chit_chat\", \"summary\": \"回复朋友\", \"due_time\": \"sometime soon\"}",
            None,
        );
        let task = extractor.extract_at("在吗？有空聊聊", Intent::ChitChat, now()).await.unwrap();
        assert_eq!(task.title(), "回复朋友");
        assert_eq!(task.due_at(), None);
    }

    #[tokio::test]
    async fn test_missing_grammar_decodes_unconstrained() {
        let (extractor, backend, dir) = scripted("{\"summary\": \"Reply\"}", None);
        let missing = dir.path().join("missing.gbnf");
        extractor.config.update(|c| c.generation.grammar_path = Some(missing));
        extractor.extract_at("hello", Intent::ChitChat, now()).await.unwrap();
        assert_eq!(backend.seen.lock().unwrap()[0].grammar, None);
    }

    #[tokio::test]
    async fn test_never_null_without_backend() {
        let config = SharedConfig::default();
        let extractor = GenerativeExtractor::new(ModelRuntime::new(Arc::new(NullBackend), config.clone()), config);
        for text in ["Project sync moved from tomorrow 9am to today 3pm, please confirm", "x", "明天开会"] {
            assert!(extractor.extract_at(text, Intent::WorkComms, now()).await.is_some());
        }
        assert!(extractor.extract_at("   ", Intent::WorkComms, now()).await.is_none());
    }
}
