//! Error taxonomy for the mockup engine
//!
//! Every failure is fatal to the request that raised it and is reported as a
//! single `MockupError`. Callers that need a wire shape use [`MockupError::report`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a [`MockupError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    SourceUnavailable,
    DimensionMismatch,
    InvalidGeometry,
    UnsupportedFormat,
    CompositionFailure,
    ResourceExhausted,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::DimensionMismatch => "DimensionMismatch",
            ErrorKind::InvalidGeometry => "InvalidGeometry",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::CompositionFailure => "CompositionFailure",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Process exit code used by the CLI for this kind of failure
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::SourceUnavailable => 2,
            ErrorKind::DimensionMismatch => 3,
            ErrorKind::InvalidGeometry => 4,
            ErrorKind::UnsupportedFormat => 5,
            ErrorKind::CompositionFailure => 6,
            ErrorKind::ResourceExhausted => 7,
            ErrorKind::Cancelled => 8,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mockup generation errors
#[derive(Debug, Error)]
pub enum MockupError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Dimension mismatch in {stage}: expected {}x{}, got {}x{}", .expected.0, .expected.1, .actual.0, .actual.1)]
    DimensionMismatch {
        stage: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Composition failure: {0}")]
    CompositionFailure(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Cancelled before {0}: deadline elapsed")]
    Cancelled(String),
}

impl MockupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MockupError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            MockupError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            MockupError::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            MockupError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            MockupError::CompositionFailure(_) => ErrorKind::CompositionFailure,
            MockupError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            MockupError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Structured `{kind, message}` form of this error
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for MockupError {
    fn from(err: reqwest::Error) -> Self {
        MockupError::SourceUnavailable(err.to_string())
    }
}

/// Serialisable error payload
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, MockupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_carries_kind_and_message() {
        let err = MockupError::DimensionMismatch {
            stage: "lighting",
            expected: (10, 20),
            actual: (10, 21),
        };
        let report = err.report();
        assert_eq!(report.kind, ErrorKind::DimensionMismatch);
        assert!(report.message.contains("10x20"));
        assert!(report.message.contains("lighting"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "DimensionMismatch");
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::SourceUnavailable,
            ErrorKind::DimensionMismatch,
            ErrorKind::InvalidGeometry,
            ErrorKind::UnsupportedFormat,
            ErrorKind::CompositionFailure,
            ErrorKind::ResourceExhausted,
            ErrorKind::Cancelled,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }
}
