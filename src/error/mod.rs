//! Error handling module for ClipBridge

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::errors::DomainError;

/// One reason a resolved plan cannot run, tied to the track it concerns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackIssue {
    /// Source track index, `None` for plan-wide problems
    pub track: Option<usize>,
    pub reason: String,
}

impl TrackIssue {
    pub fn track(index: usize, reason: impl Into<String>) -> Self {
        Self {
            track: Some(index),
            reason: reason.into(),
        }
    }

    pub fn plan(reason: impl Into<String>) -> Self {
        Self {
            track: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TrackIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.track {
            Some(index) => write!(f, "track {}: {}", index, self.reason),
            None => write!(f, "plan: {}", self.reason),
        }
    }
}

fn join_issues(issues: &[TrackIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for ClipBridge operations
#[derive(Error, Debug)]
pub enum ExportError {
    /// Resolved plan is inconsistent
    #[error("Invalid export plan: {}", join_issues(.issues))]
    Validation { issues: Vec<TrackIssue> },

    /// Job never acknowledged start within the watchdog threshold
    #[error("Conversion did not start within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Decode, encode or mux failure reported by the execution context
    #[error("Conversion failed: {message}")]
    Failed { message: String },

    /// A conversion is already running in this execution context
    #[error("A conversion is already running")]
    Busy,

    /// A newer request of the same kind replaced this one
    #[error("Request {request_id} was superseded by a newer request")]
    Superseded { request_id: u64 },

    /// Execution context went away before answering
    #[error("Execution context closed unexpectedly")]
    ContextClosed,

    /// Backend failure while probing or converting
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Domain rule violation
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExportError {
    /// Shorthand for backend failures
    pub fn backend(message: impl Into<String>) -> Self {
        ExportError::Backend {
            message: message.into(),
        }
    }
}

/// Result type alias for ClipBridge operations
pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_issue() {
        let err = ExportError::Validation {
            issues: vec![
                TrackIssue::track(3, "references no source track"),
                TrackIssue::plan("every track discarded"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Invalid export plan: track 3: references no source track; plan: every track discarded"
        );
    }

    #[test]
    fn test_domain_error_is_transparent() {
        let err: ExportError = DomainError::UnknownPreset("vhs".to_string()).into();
        assert_eq!(err.to_string(), "Unknown preset: vhs");
    }
}
