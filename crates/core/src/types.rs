//! Core types for race outcomes, references and reconciliation

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Network responses
// ============================================================================

/// Snapshot of one completed network exchange observed by the page.
///
/// The body is not carried here; it is fetched on demand through
/// [`PageSurface::response_body`](crate::page::PageSurface::response_body)
/// using `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResponse {
    /// Page-local identifier used to retrieve the body
    pub id: u64,
    pub url: String,
    pub method: String,
    pub status: u16,
}

impl NetworkResponse {
    pub fn new(id: u64, method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            id,
            url: url.into(),
            method: method.into(),
            status,
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why a response was (or was not) accepted as the transaction response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchReason {
    DomainAndPathMatch,
    DonationHeuristicMatch,
    None,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::DomainAndPathMatch => "domain-and-path-match",
            MatchReason::DonationHeuristicMatch => "donation-heuristic-match",
            MatchReason::None => "none",
        }
    }
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseClassification {
    pub is_target_api: bool,
    pub reason: MatchReason,
}

impl From<MatchReason> for ResponseClassification {
    fn from(reason: MatchReason) -> Self {
        Self {
            is_target_api: reason != MatchReason::None,
            reason,
        }
    }
}

// ============================================================================
// Race outcome
// ============================================================================

/// The single signal that resolved a completion race
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RaceOutcome {
    /// A qualifying backend response was observed
    Transaction { response: NetworkResponse },
    /// The page reached the success destination
    Navigation,
    /// The error indicator became visible
    Error { text: String },
    /// Nothing resolved before the deadline
    Timeout,
}

impl RaceOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RaceOutcome::Transaction { .. } => "transaction",
            RaceOutcome::Navigation => "navigation",
            RaceOutcome::Error { .. } => "error",
            RaceOutcome::Timeout => "timeout",
        }
    }

    /// Outcomes an error banner is allowed to override
    pub fn is_overridable(&self) -> bool {
        matches!(self, RaceOutcome::Navigation | RaceOutcome::Timeout)
    }
}

// ============================================================================
// References
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSource {
    JsonKey,
    TextPattern,
    None,
}

/// A reference recovered by the extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedReference {
    pub value: String,
    pub source: ReferenceSource,
}

impl ExtractedReference {
    pub fn json_key(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: ReferenceSource::JsonKey,
        }
    }

    pub fn text_pattern(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: ReferenceSource::TextPattern,
        }
    }

    pub fn absent() -> Self {
        Self {
            value: String::new(),
            source: ReferenceSource::None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.source != ReferenceSource::None
    }

    /// The value, or `None` when nothing was extracted
    pub fn value(&self) -> Option<&str> {
        self.is_found().then_some(self.value.as_str())
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Matched,
    BothAbsent,
    ApiAbsent,
    PageAbsent,
    Mismatch,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Matched => "matched",
            Verdict::BothAbsent => "both-absent",
            Verdict::ApiAbsent => "api-absent",
            Verdict::PageAbsent => "page-absent",
            Verdict::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub api_reference: Option<String>,
    pub page_reference: Option<String>,
    pub matched: bool,
    pub verdict: Verdict,
}
