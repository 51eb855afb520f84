//! Text preprocessing shared by the classifiers and extractors.

mod normalize;

pub use normalize::{normalize_for_classifier, tokenize, MAX_TOKENS};

/// Whether the text contains any CJK unified ideograph.
pub fn contains_han(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}
