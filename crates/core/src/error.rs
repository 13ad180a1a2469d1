//! Error types for Refcheck

use std::time::Duration;
use thiserror::Error;

use crate::types::Verdict;

/// Result type alias using Refcheck Error
pub type Result<T> = std::result::Result<T, Error>;

/// Refcheck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("Payment was rejected: {0}")]
    RejectedOutcome(String),

    #[error("No completion signal within {0:?}")]
    AmbiguousOutcome(Duration),

    #[error("Reference absent: {0}")]
    ReferenceAbsent(Verdict),

    #[error("Reference mismatch: api {api} != page {page}")]
    ReferenceMismatch { api: String, page: String },

    #[error("Listener setup failed: {0}")]
    ListenerSetup(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl Error {
    /// Whether this error is one of the reconciliation failure kinds
    pub fn is_reconciliation_failure(&self) -> bool {
        matches!(self, Error::ReferenceAbsent(_) | Error::ReferenceMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciliation_failure_kinds() {
        assert!(Error::ReferenceAbsent(Verdict::PageAbsent).is_reconciliation_failure());
        assert!(Error::ReferenceMismatch {
            api: "AB123456".to_string(),
            page: "AB123457".to_string(),
        }
        .is_reconciliation_failure());
        assert!(!Error::RejectedOutcome("declined".to_string()).is_reconciliation_failure());
        assert!(!Error::AmbiguousOutcome(Duration::from_secs(45)).is_reconciliation_failure());
    }
}
