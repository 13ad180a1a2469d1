//! Correlation configuration

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Correlation configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Transaction response classification
    pub api: ApiConfig,

    /// Reference extraction
    pub references: ReferenceConfig,

    /// Completion race
    pub race: RaceConfig,
}

/// Tokens used to recognise the transaction confirmation response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Primary backend domain token
    pub primary_domain: String,

    /// Transaction endpoint path token
    pub transaction_path: String,

    /// Keyword for the loose fallback tier
    pub heuristic_keyword: String,

    /// Third-party payment processor token, never the target
    pub processor_exclusion: String,

    /// Analytics token, never the target
    pub analytics_exclusion: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            primary_domain: "cruk.org".to_string(),
            transaction_path: "/transaction".to_string(),
            heuristic_keyword: "donation".to_string(),
            processor_exclusion: "braintree".to_string(),
            analytics_exclusion: "analytics".to_string(),
        }
    }
}

/// Reference extraction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// General reference pattern (case-sensitive)
    pub general_pattern: String,

    /// Keywords tried in order before the bare pattern
    pub keywords: Vec<String>,

    /// Candidate JSON keys, dotted paths allowed
    pub candidate_keys: Vec<String>,

    /// Minimum length of a candidate key value
    pub min_key_value_len: usize,

    /// Maximum nesting depth visited when collecting strings
    pub max_depth: usize,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            general_pattern: "[A-Z0-9]{6,}".to_string(),
            keywords: vec![
                "reference".to_string(),
                "id".to_string(),
                "transaction".to_string(),
            ],
            candidate_keys: vec![
                "reference".to_string(),
                "transactionReference".to_string(),
                "donationReference".to_string(),
                "id".to_string(),
                "transactionId".to_string(),
            ],
            min_key_value_len: 6,
            max_depth: 64,
        }
    }
}

/// Completion race settings.
///
/// Text and URL patterns are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Success destination URL pattern
    pub success_url_pattern: String,

    /// Selector of the inline error indicator
    pub error_selector: String,

    /// Text the error indicator must contain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text_pattern: Option<String>,

    /// Selector of the element carrying the page reference
    pub confirmation_selector: String,

    /// Text the confirmation element must contain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_text_pattern: Option<String>,

    /// Overall race deadline
    pub deadline_ms: u64,

    /// Post-race error indicator poll
    pub short_poll_ms: u64,

    /// Wait for the confirmation page after a successful race
    pub confirmation_timeout_ms: u64,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            success_url_pattern: "thanks".to_string(),
            error_selector: "[role=\"alert\"]".to_string(),
            error_text_pattern: Some("sorry.*can't process.*payment".to_string()),
            confirmation_selector: "text=/your reference number is/i".to_string(),
            confirmation_text_pattern: None,
            deadline_ms: 45_000,
            short_poll_ms: 5_000,
            confirmation_timeout_ms: 30_000,
        }
    }
}

impl RaceConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn short_poll(&self) -> Duration {
        Duration::from_millis(self.short_poll_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

impl CorrelationConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that every pattern compiles and the timings are usable
    pub fn validate(&self) -> Result<()> {
        Regex::new(&self.references.general_pattern)?;
        insensitive(&self.race.success_url_pattern)?;
        if let Some(pattern) = &self.race.error_text_pattern {
            insensitive(pattern)?;
        }
        if let Some(pattern) = &self.race.confirmation_text_pattern {
            insensitive(pattern)?;
        }

        if self.api.primary_domain.is_empty() || self.api.transaction_path.is_empty() {
            return Err(Error::InvalidConfig(
                "api.primary_domain and api.transaction_path must be set".to_string(),
            ));
        }
        if self.race.deadline_ms == 0 {
            return Err(Error::InvalidConfig("race.deadline_ms must be > 0".to_string()));
        }
        if self.references.max_depth == 0 {
            return Err(Error::InvalidConfig(
                "references.max_depth must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Compile a pattern with case-insensitive matching
pub fn insensitive(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    PathBuf::from("refcheck.toml")
}
