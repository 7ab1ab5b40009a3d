// Domain errors - Error types for the domain layer

use std::fmt;

/// Domain-specific error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// Export settings outside their valid ranges
    InvalidSettings(String),
    /// Codec or container name nobody knows about
    UnsupportedCodec(String),
    /// Preset name not present in the preset table
    UnknownPreset(String),
    /// Media probing failed
    ProbeFail(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::InvalidSettings(msg) => write!(f, "Invalid export settings: {}", msg),
            DomainError::UnsupportedCodec(msg) => write!(f, "Unsupported codec: {}", msg),
            DomainError::UnknownPreset(msg) => write!(f, "Unknown preset: {}", msg),
            DomainError::ProbeFail(msg) => write!(f, "Probe failed: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}
