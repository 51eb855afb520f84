//! Recovery of a JSON object from raw model output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{SiftError, SiftResult};

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap());

static THINK_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Fields the model is asked to produce. Everything is optional on the way in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelOutput {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// String, null, or occasionally something else the model invented.
    #[serde(default)]
    pub due_time: Option<Value>,
}

impl ModelOutput {
    /// `due_time` as text, if it is a non-empty string other than "null".
    pub fn due_text(&self) -> Option<String> {
        let text = match self.due_time.as_ref()? {
            Value::String(s) => s.trim().to_string(),
            Value::Null => return None,
            other => other.to_string(),
        };
        (!text.is_empty() && !text.eq_ignore_ascii_case("null")).then_some(text)
    }
}

/// Remove `<think>...</think>` blocks some models emit before answering.
pub fn strip_think_tags(raw: &str) -> String {
    THINK_TAGS.replace_all(raw, "").trim().to_string()
}

/// Find the JSON object in model output.
///
/// Preference: a fenced `json` block, then the first balanced `{...}` span,
/// then the whole output if it is itself an object.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    if let Some(m) = JSON_FENCE.captures(raw).and_then(|c| c.get(1)) {
        return Some(m.as_str());
    }
    if let Some(span) = first_balanced_object(raw) {
        return Some(span);
    }
    let trimmed = raw.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}')).then_some(trimmed)
}

/// First `{...}` span whose braces balance, ignoring braces inside strings.
fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse raw model output into [`ModelOutput`].
pub fn parse_model_output(raw: &str) -> SiftResult<ModelOutput> {
    let cleaned = strip_think_tags(raw);
    let json = extract_json_object(&cleaned)
        .ok_or_else(|| SiftError::no_object("no JSON object in model output"))?;
    serde_json::from_str(json)
        .map_err(|e| SiftError::parse(format!("invalid JSON in model output: {}", e)))
}
