//! Error types for sift operations.
//!
//! The taxonomy separates conditions the pipeline degrades on (model
//! unavailable, timeout, unparseable output, unmet device constraints,
//! corrupt training rows) from hard failures that must reach the caller.

use thiserror::Error;

/// Result type alias for sift operations.
pub type SiftResult<T> = Result<T, SiftError>;

/// Main error type for all sift operations.
#[derive(Error, Debug)]
pub enum SiftError {
    /// A classifier or the generative model could not be loaded.
    #[error("Model unavailable: {message}")]
    ModelUnavailable { message: String, code: ErrorCode },

    /// A bounded operation exceeded its deadline.
    #[error("Timed out after {elapsed_ms}ms: {message}")]
    Timeout {
        message: String,
        code: ErrorCode,
        elapsed_ms: u64,
    },

    /// Generative output could not be turned into a JSON object.
    #[error("Parse error: {message}")]
    Parse { message: String, code: ErrorCode },

    /// Device state did not satisfy a work item's constraints.
    #[error("Constraints unmet: {message}")]
    ConstraintUnmet { message: String, code: ErrorCode },

    /// A training record was malformed.
    #[error("Corrupt dataset record at line {line}: {message}")]
    CorruptDataset {
        message: String,
        code: ErrorCode,
        line: usize,
    },

    /// Caller broke an API contract (e.g. dispatching an intent to the wrong tier).
    #[error("Contract violation: {message}")]
    Contract { message: String, code: ErrorCode },

    /// Native inference call failed.
    #[error("Inference error: {message}")]
    Inference {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        suggestion: Option<String>,
    },

    /// Record not found.
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        id: Option<String>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Models (MDL_xxx)
    MdlLoadFailed,
    MdlAssetMissing,
    MdlStaleHandle,

    // Inference (INF_xxx)
    InfTimeout,
    InfCallFailed,

    // Parse (PARSE_xxx)
    ParseInvalidJson,
    ParseNoObject,

    // Scheduler (SCH_xxx)
    SchConstraintUnmet,

    // Dataset (DATA_xxx)
    DataMalformedRow,
    DataUnknownLabel,

    // Contract (CTR_xxx)
    CtrWrongTier,

    // Validation (VAL_xxx)
    ValInvalidInput,
    ValOutOfRange,

    // Storage (DB_xxx)
    DbNotFound,
    DbOperationFailed,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MdlLoadFailed => "MDL_001",
            ErrorCode::MdlAssetMissing => "MDL_002",
            ErrorCode::MdlStaleHandle => "MDL_003",
            ErrorCode::InfTimeout => "INF_001",
            ErrorCode::InfCallFailed => "INF_002",
            ErrorCode::ParseInvalidJson => "PARSE_001",
            ErrorCode::ParseNoObject => "PARSE_002",
            ErrorCode::SchConstraintUnmet => "SCH_001",
            ErrorCode::DataMalformedRow => "DATA_001",
            ErrorCode::DataUnknownLabel => "DATA_002",
            ErrorCode::CtrWrongTier => "CTR_001",
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValOutOfRange => "VAL_002",
            ErrorCode::DbNotFound => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SiftError {
    /// Create a model-unavailable error.
    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
            code: ErrorCode::MdlLoadFailed,
        }
    }

    /// Create a model-unavailable error for a missing asset file.
    pub fn asset_missing(path: impl AsRef<std::path::Path>) -> Self {
        Self::ModelUnavailable {
            message: format!("model asset not found: {}", path.as_ref().display()),
            code: ErrorCode::MdlAssetMissing,
        }
    }

    /// Create a model-unavailable error for a handle that is no longer live.
    pub fn stale_handle(handle: u64) -> Self {
        Self::ModelUnavailable {
            message: format!("model handle {} is not live", handle),
            code: ErrorCode::MdlStaleHandle,
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            message: message.into(),
            code: ErrorCode::InfTimeout,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            code: ErrorCode::ParseInvalidJson,
        }
    }

    /// Create a parse error for output that holds no JSON object at all.
    pub fn no_object(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            code: ErrorCode::ParseNoObject,
        }
    }

    /// Create a constraint-unmet error.
    pub fn constraint_unmet(message: impl Into<String>) -> Self {
        Self::ConstraintUnmet {
            message: message.into(),
            code: ErrorCode::SchConstraintUnmet,
        }
    }

    /// Create a corrupt-dataset error for the given 1-based line.
    pub fn corrupt_dataset(line: usize, message: impl Into<String>) -> Self {
        Self::CorruptDataset {
            message: message.into(),
            code: ErrorCode::DataMalformedRow,
            line,
        }
    }

    /// Create a corrupt-dataset error for a label outside the known set.
    pub fn unknown_label(line: usize, label: &str) -> Self {
        Self::CorruptDataset {
            message: format!("unknown label {:?}", label),
            code: ErrorCode::DataUnknownLabel,
            line,
        }
    }

    /// Create a contract-violation error.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
            code: ErrorCode::CtrWrongTier,
        }
    }

    /// Create an inference error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
            code: ErrorCode::InfCallFailed,
            source: None,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: None,
        }
    }

    /// Create a validation error with suggestion.
    pub fn validation_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValOutOfRange,
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::NotFound {
            message: format!("record with id '{}' not found", id),
            code: ErrorCode::DbNotFound,
            id: Some(id),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ModelUnavailable { code, .. } => *code,
            Self::Timeout { code, .. } => *code,
            Self::Parse { code, .. } => *code,
            Self::ConstraintUnmet { code, .. } => *code,
            Self::CorruptDataset { code, .. } => *code,
            Self::Contract { code, .. } => *code,
            Self::Inference { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::Database { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether the pipeline degrades to a cheaper tier instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable { .. }
                | Self::Timeout { .. }
                | Self::Parse { .. }
                | Self::Inference { .. }
                | Self::ConstraintUnmet { .. }
                | Self::CorruptDataset { .. }
        )
    }

    /// Whether the scheduler should retry a work item that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConstraintUnmet { .. } | Self::Timeout { .. } | Self::Database { .. }
        )
    }

    /// Get a suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ModelUnavailable { .. } => {
                Some("Check the model paths in the [models] section of the configuration")
            }
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            Self::Configuration(_) => Some("Use a .toml, .json or .yaml configuration file"),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SiftError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SiftError::timeout("generation", std::time::Duration::from_secs(2));
        assert_eq!(err.code(), ErrorCode::InfTimeout);
        assert_eq!(err.code().as_str(), "INF_001");
        assert!(err.to_string().contains("2000ms"));

        assert_eq!(SiftError::stale_handle(7).code().as_str(), "MDL_003");
        assert_eq!(SiftError::no_object("empty").code().as_str(), "PARSE_002");
        let err = SiftError::unknown_label(4, "bogus");
        assert_eq!(err.code(), ErrorCode::DataUnknownLabel);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SiftError::model_unavailable("missing").is_recoverable());
        assert!(SiftError::parse("bad json").is_recoverable());
        assert!(SiftError::corrupt_dataset(3, "no label").is_recoverable());
        assert!(!SiftError::contract("wrong tier").is_recoverable());
        assert!(!SiftError::internal("bug").is_recoverable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SiftError::constraint_unmet("battery").is_retryable());
        assert!(!SiftError::parse("bad").is_retryable());
        assert!(!SiftError::contract("wrong tier").is_retryable());
    }

    #[test]
    fn test_suggestion() {
        let err = SiftError::validation_with_suggestion("threads", "use 1..=8");
        assert_eq!(err.suggestion(), Some("use 1..=8"));
        assert_eq!(err.code(), ErrorCode::ValOutOfRange);
    }
}
