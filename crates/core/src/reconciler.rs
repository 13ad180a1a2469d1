//! Reference reconciliation

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::{ExtractedReference, ReconciliationResult, Verdict};

/// Compare the API reference with the page reference.
///
/// Equality is exact and case-sensitive. A reference whose source is `none`
/// counts as absent.
pub fn reconcile(
    api: Option<&ExtractedReference>,
    page: Option<&ExtractedReference>,
) -> ReconciliationResult {
    let api_reference = api.and_then(ExtractedReference::value).map(str::to_string);
    let page_reference = page.and_then(ExtractedReference::value).map(str::to_string);

    let verdict = match (&api_reference, &page_reference) {
        (None, None) => Verdict::BothAbsent,
        (None, Some(_)) => Verdict::ApiAbsent,
        (Some(_), None) => Verdict::PageAbsent,
        (Some(a), Some(p)) if a == p => Verdict::Matched,
        (Some(_), Some(_)) => Verdict::Mismatch,
    };

    match verdict {
        Verdict::Matched => info!("Transaction references match: {}", api_reference.as_deref().unwrap_or_default()),
        Verdict::Mismatch => warn!(
            "Transaction references differ: api={:?} page={:?}",
            api_reference, page_reference
        ),
        _ => warn!("Transaction reference reconciliation: {}", verdict),
    }

    ReconciliationResult {
        api_reference,
        page_reference,
        matched: verdict == Verdict::Matched,
        verdict,
    }
}

impl ReconciliationResult {
    /// The agreed reference, or the matching failure kind
    pub fn into_result(self) -> Result<String> {
        match (self.verdict, self.api_reference, self.page_reference) {
            (Verdict::Matched, Some(reference), _) => Ok(reference),
            (Verdict::Mismatch, Some(api), Some(page)) => Err(Error::ReferenceMismatch { api, page }),
            (verdict, _, _) => Err(Error::ReferenceAbsent(verdict)),
        }
    }
}
