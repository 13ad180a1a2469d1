//! One submission attempt: race, extract, reconcile

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{insensitive, CorrelationConfig};
use crate::error::{Error, Result};
use crate::extractor::ReferenceExtractor;
use crate::page::{ElementQuery, PageSurface};
use crate::race::{CompletionRace, RaceReport};
use crate::reconciler::reconcile;
use crate::types::{ExtractedReference, NetworkResponse, RaceOutcome, ReconciliationResult, Verdict};

/// What the race says about the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Transaction response or success navigation, no error banner
    Confirmed,
    /// Error banner seen
    Rejected { text: String },
    /// Nothing seen before the deadline
    Ambiguous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    pub race: RaceReport,
    pub disposition: Disposition,
    pub api_reference: Option<ExtractedReference>,
    pub page_reference: Option<ExtractedReference>,
    pub reconciliation: Option<ReconciliationResult>,
}

impl AttemptReport {
    /// The verified transaction reference, or why there is none
    pub fn verify(&self) -> Result<String> {
        match &self.disposition {
            Disposition::Rejected { text } => Err(Error::RejectedOutcome(text.clone())),
            Disposition::Ambiguous => Err(Error::AmbiguousOutcome(Duration::from_millis(
                self.race.deadline_ms,
            ))),
            Disposition::Confirmed => match &self.reconciliation {
                Some(result) => result.clone().into_result(),
                None => Err(Error::ReferenceAbsent(Verdict::BothAbsent)),
            },
        }
    }
}

/// Per-attempt orchestration; construct one for every submission.
pub struct SubmissionAttempt {
    surface: Arc<dyn PageSurface>,
    race: CompletionRace,
    extractor: ReferenceExtractor,
    success_url: Regex,
    confirmation: ElementQuery,
    confirmation_timeout: Duration,
}

impl SubmissionAttempt {
    pub fn new(surface: Arc<dyn PageSurface>, config: &CorrelationConfig) -> Result<Self> {
        config.validate()?;

        let mut confirmation = ElementQuery::new(&config.race.confirmation_selector);
        if let Some(pattern) = &config.race.confirmation_text_pattern {
            confirmation = confirmation.with_text(pattern);
        }

        Ok(Self {
            race: CompletionRace::new(surface.clone(), config)?,
            extractor: ReferenceExtractor::new(&config.references)?,
            success_url: insensitive(&config.race.success_url_pattern)?,
            confirmation,
            confirmation_timeout: config.race.confirmation_timeout(),
            surface,
        })
    }

    /// Submit, resolve the race and, when the payment went through, compare
    /// the API reference with the one on the confirmation page.
    pub async fn run<F, Fut>(&self, submit: F) -> Result<AttemptReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let race = self.race.run(submit).await?;

        let disposition = match &race.outcome {
            RaceOutcome::Error { text } => Disposition::Rejected { text: text.clone() },
            RaceOutcome::Timeout => Disposition::Ambiguous,
            RaceOutcome::Transaction { .. } | RaceOutcome::Navigation => Disposition::Confirmed,
        };

        if disposition != Disposition::Confirmed {
            match &disposition {
                Disposition::Rejected { text } => warn!("Payment was rejected: {}", text),
                _ => warn!(
                    "No completion signal within {} ms, outcome unknown",
                    race.deadline_ms
                ),
            }
            return Ok(AttemptReport {
                race,
                disposition,
                api_reference: None,
                page_reference: None,
                reconciliation: None,
            });
        }

        let api_reference = match &race.transaction {
            Some(response) => Some(self.api_reference(response).await),
            None => None,
        };
        let page_reference = self.page_reference().await;
        let reconciliation = reconcile(api_reference.as_ref(), page_reference.as_ref());

        Ok(AttemptReport {
            race,
            disposition,
            api_reference,
            page_reference,
            reconciliation: Some(reconciliation),
        })
    }

    async fn api_reference(&self, response: &NetworkResponse) -> ExtractedReference {
        match self.surface.response_body(response).await {
            Ok(body) => {
                let reference = self.extractor.extract_from_payload(&body);
                if let Some(value) = reference.value() {
                    info!("API reference {} from {}", value, response.url);
                }
                reference
            }
            Err(e) => {
                warn!("Could not read transaction response body: {}", e);
                ExtractedReference::absent()
            }
        }
    }

    async fn page_reference(&self) -> Option<ExtractedReference> {
        if let Err(e) = self
            .surface
            .wait_for_url(&self.success_url, self.confirmation_timeout)
            .await
        {
            warn!("Confirmation page not reached: {}", e);
            return None;
        }

        match self
            .surface
            .wait_for_visible(&self.confirmation, self.confirmation_timeout)
            .await
        {
            Ok(text) => Some(self.extractor.extract_from_text(&text)),
            Err(e) => {
                warn!("Confirmation reference not found: {}", e);
                None
            }
        }
    }
}
