//! Classifier input normalization.
//!
//! NFKC, then sentinel tokens for volatile spans (URL, email, phone,
//! tracking number, numeric code, in that order), then Han characters
//! transliterated to apostrophe-joined pinyin syllables. The result is
//! lower-cased with whitespace collapsed, so the hashed bag-of-tokens
//! model sees a stable vocabulary whatever the script.

use once_cell::sync::Lazy;
use pinyin::ToPinyin;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Token cap per document.
pub const MAX_TOKENS: usize = 512;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").unwrap());

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:\+|(?-u:\b))\d[\d\- ]{6,}\d(?-u:\b)").unwrap());

static TRACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u:\b)(?:SF|YT|ZTO|JD)[A-Za-z0-9]{6,}(?-u:\b)").unwrap());

static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u:\b)\d{4,8}(?-u:\b)").unwrap());

static HAN_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{Han}+").unwrap());

/// Normalize text for the priority classifiers.
pub fn normalize_for_classifier(text: &str) -> String {
    let nfkc: String = text.nfkc().collect();

    let replaced = URL_RE.replace_all(&nfkc, " <url> ");
    let replaced = EMAIL_RE.replace_all(&replaced, " <email> ");
    let replaced = PHONE_RE.replace_all(&replaced, " <phone> ");
    let replaced = TRACK_RE.replace_all(&replaced, " <track> ");
    let replaced = CODE_RE.replace_all(&replaced, " <code> ");

    let transliterated = HAN_RUN_RE.replace_all(&replaced, |caps: &regex::Captures<'_>| {
        format!(" {} ", transliterate_run(&caps[0]))
    });

    transliterated
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn transliterate_run(run: &str) -> String {
    run.chars()
        .map(|c| match c.to_pinyin() {
            Some(py) => py.plain().to_string(),
            None => format!("u{:04x}", c as u32),
        })
        .collect::<Vec<_>>()
        .join("'")
}

/// Split normalized text into at most [`MAX_TOKENS`] tokens.
pub fn tokenize(normalized: &str) -> Vec<&str> {
    normalized
        .split(|c: char| c.is_whitespace() || c == '\'')
        .filter(|t| !t.is_empty())
        .take(MAX_TOKENS)
        .collect()
}
