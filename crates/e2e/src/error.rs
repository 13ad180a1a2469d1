//! Error types for journey runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright driver error: {0}")]
    Driver(String),

    #[error("Driver exited before replying to '{0}'")]
    DriverGone(String),

    #[error("Journey spec parse error: {0}")]
    SpecParse(String),

    #[error("Journey not found: {0}")]
    JourneyNotFound(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error(transparent)]
    Core(#[from] refcheck_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl E2eError {
    /// Map onto the error type the page surface contract speaks
    pub fn into_core(self) -> refcheck_core::Error {
        match self {
            E2eError::Core(e) => e,
            E2eError::Timeout(what) => refcheck_core::Error::Timeout(what),
            other => refcheck_core::Error::Page(other.to_string()),
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
