//! Refcheck Core Library
//!
//! Decision logic that sits between "payment submitted" and "outcome known"
//! in a browser-driven donation journey:
//! - Classifies observed network responses as the transaction confirmation
//! - Races the confirmation response, the success navigation and the inline
//!   error banner against a deadline
//! - Extracts the transaction reference from the API payload and from the
//!   rendered confirmation page
//! - Reconciles the two references
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SubmissionAttempt (per try)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CompletionRace                                             │
//! │    ├── transaction listener ── ResponseClassifier           │
//! │    ├── navigation listener  ── PageSurface::wait_for_url    │
//! │    ├── error listener       ── PageSurface::wait_for_visible│
//! │    └── post-race error poll (overrides nav / timeout)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ReferenceExtractor                                         │
//! │    ├── extract_from_payload (json-key → strings → text)     │
//! │    └── extract_from_text (reference → id → transaction →    │
//! │                           general pattern)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  reconcile(api, page) -> ReconciliationResult               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod attempt;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod page;
pub mod race;
pub mod reconciler;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;
pub mod types;

// Re-export commonly used types
pub use attempt::{AttemptReport, Disposition, SubmissionAttempt};
pub use classifier::ResponseClassifier;
pub use config::CorrelationConfig;
pub use error::{Error, Result};
pub use extractor::ReferenceExtractor;
pub use page::{ElementQuery, PageSurface, ResponseFeed};
pub use race::{CompletionRace, RaceReport};
pub use reconciler::reconcile;
#[cfg(any(test, feature = "scripted"))]
pub use scripted::{ScriptedEvent, ScriptedPage};
pub use types::*;

/// Refcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
