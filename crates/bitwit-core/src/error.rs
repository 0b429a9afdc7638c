//! Error types for bitwit-core.

use thiserror::Error;

/// Result type alias using bitwit-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// A single rejected field in a settings update.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SettingIssue {
    pub key: String,
    pub reason: String,
}

impl SettingIssue {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for SettingIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

/// Core error types for BitWit control plane operations
#[derive(Error, Debug)]
pub enum Error {
    // Request errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Another BitWit run is already in progress ({completed}/{total} completed)")]
    AlreadyRunning { total: u32, completed: u32 },

    #[error("Settings validation failed: {}", join_issues(.0))]
    ValidationFailed(Vec<SettingIssue>),

    // Run errors
    #[error("Pipeline failure: {0}")]
    PipelineFailure(String),

    // Persistence errors
    #[error("Transient IO error during {operation} (gave up after {attempts} attempts): {source}")]
    TransientIo {
        operation: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("State lock poisoned")]
    LockPoisoned,
}

fn join_issues(issues: &[SettingIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a pipeline failure
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::PipelineFailure(message.into())
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Field issues carried by a validation error, empty otherwise
    pub fn issues(&self) -> &[SettingIssue] {
        match self {
            Self::ValidationFailed(issues) => issues,
            _ => &[],
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_field() {
        let err = Error::ValidationFailed(vec![
            SettingIssue::new("FOO", "unrecognized setting"),
            SettingIssue::new("REPLY_CHANCE", "must be between 0.0 and 1.0"),
        ]);

        let message = err.to_string();
        assert!(err.is_validation());
        assert!(message.contains("FOO: unrecognized setting"));
        assert!(message.contains("REPLY_CHANCE"));
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_already_running_reports_progress() {
        let err = Error::AlreadyRunning {
            total: 4,
            completed: 1,
        };
        assert!(err.is_already_running());
        assert!(err.to_string().contains("1/4"));
        assert!(err.issues().is_empty());
    }

    #[test]
    fn test_transient_io_keeps_source() {
        let err = Error::TransientIo {
            operation: "append run log".to_string(),
            attempts: 3,
            source: std::io::Error::other("disk full"),
        };
        let message = err.to_string();
        assert!(message.contains("append run log"));
        assert!(message.contains("3 attempts"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
