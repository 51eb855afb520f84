//! Notification messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PriorityLabel;

/// An observed notification. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identity used for dedup and idempotence.
    pub id: String,
    /// Package or app that posted the notification.
    #[serde(alias = "package", alias = "app")]
    pub package_origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl Message {
    /// Create a message observed now.
    pub fn new(id: impl Into<String>, package_origin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            package_origin: package_origin.into(),
            title: None,
            body: None,
            observed_at: Utc::now(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the observation time.
    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// Title and body joined by a space, skipping empty parts.
    pub fn text(&self) -> String {
        [self.title.as_deref(), self.body.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A message as held by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: Message,
    /// Label inferred at receipt. Fixed once the message is processed.
    pub priority: PriorityLabel,
    /// Explicit user correction, kept apart from the inferred label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_priority: Option<PriorityLabel>,
    #[serde(default)]
    pub processed: bool,
}

impl StoredMessage {
    /// Wrap a freshly classified message.
    pub fn new(message: Message, priority: PriorityLabel) -> Self {
        Self {
            message,
            priority,
            user_priority: None,
            processed: false,
        }
    }

    /// The user's correction if present, else the inferred label.
    pub fn effective_priority(&self) -> PriorityLabel {
        self.user_priority.unwrap_or(self.priority)
    }
}
