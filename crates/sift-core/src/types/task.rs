//! Extraction results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Intent, PriorityLabel};

/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 60;

/// A dated action item.
///
/// `title` is non-empty and at most [`TITLE_MAX_CHARS`] characters.
/// `due_at` may lie in the past, which means the task is overdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedTask {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_at: Option<DateTime<Utc>>,
}

impl ExtractedTask {
    /// Build a task, collapsing whitespace and truncating the title.
    ///
    /// Returns `None` if the title is empty after trimming.
    pub fn new(title: impl AsRef<str>, due_at: Option<DateTime<Utc>>) -> Option<Self> {
        let collapsed = title.as_ref().split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return None;
        }
        let title: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
        Some(Self {
            title: title.trim_end().to_string(),
            due_at,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_at
    }

    /// Replace the due time.
    pub fn with_due_at(mut self, due_at: Option<DateTime<Utc>>) -> Self {
        self.due_at = due_at;
        self
    }

    /// Whether the due time lies before `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_at.is_some_and(|due| due < now)
    }
}

/// Routing result for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// The deterministic tier produced a task.
    Handled(ExtractedTask),
    /// The intent needs the generative tier.
    RequiresGenerative(Intent),
    /// Nothing to extract.
    Ignore,
}

/// Terminal outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "task", rename_all = "snake_case")]
pub enum TriageOutcome {
    Created(ExtractedTask),
    Ignored,
}

impl TriageOutcome {
    pub fn task(&self) -> Option<&ExtractedTask> {
        match self {
            Self::Created(task) => Some(task),
            Self::Ignored => None,
        }
    }
}

/// Full result of triaging one text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageResult {
    pub priority: PriorityLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(flatten)]
    pub outcome: TriageOutcome,
}
