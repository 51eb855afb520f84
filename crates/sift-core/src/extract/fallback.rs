//! Heuristic task synthesis used when the generative model is unavailable
//! or its output cannot be parsed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::text::contains_han;

/// Characters of message text kept after the verb.
const CORE_CHARS: usize = 28;
const SUMMARY_MAX_CHARS: usize = 60;

const VERBS_ZH: &[&str] = &[
    "处理", "确认", "回复", "回拨", "跟进", "查看", "领取", "取件", "付款", "报备", "提交", "催办",
];

const VERBS_EN: &[&str] = &[
    "confirm", "reply", "call back", "follow up", "review", "check", "pay", "submit", "attend",
    "join", "send", "prepare",
];

static APP_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:【[^】]*】|\[[^\]]*\])\s*").unwrap());

static DUE_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(今天|明天|today|tomorrow)(?:\s*(?:上午|早上|中午|下午|晚上|晚)?\s*(?:at\s+)?\d{1,2}(?:\s*[:：]\s*\d{2}|\s*点(?:半|\d{1,2}分?)?)?(?:\s*(?:am|pm)\b)?)?",
    )
    .unwrap()
});

/// Verb-led summary built from the text. Empty only for empty input.
pub fn guess_summary(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let body = APP_PREFIX.replace(&collapsed, "");
    let body = body.trim_start_matches("通知").trim_start_matches("消息").trim();
    if body.is_empty() {
        return String::new();
    }

    let lower = body.to_lowercase();
    let verb = if contains_han(body) {
        VERBS_ZH
            .iter()
            .find(|v| body.contains(*v))
            .copied()
            .unwrap_or("处理")
            .to_string()
    } else {
        VERBS_EN
            .iter()
            .find(|v| lower.contains(*v))
            .map(|v| capitalize(v))
            .unwrap_or_else(|| "Handle".to_string())
    };

    let core: String = body.chars().take(CORE_CHARS).collect();
    let core = core.trim_end().to_string();
    let summary = if core.to_lowercase().starts_with(&verb.to_lowercase()) {
        core
    } else {
        format!("{} {}", verb, core)
    };
    summary.chars().take(SUMMARY_MAX_CHARS).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The last "today/tomorrow [+ clock]" phrase in the text.
pub fn guess_due_text(text: &str) -> Option<String> {
    DUE_PHRASE
        .find_iter(text)
        .last()
        .map(|m| m.as_str().trim().to_string())
}
