//! Transaction response classification

use crate::config::ApiConfig;
use crate::types::{MatchReason, NetworkResponse, ResponseClassification};

/// Decides whether a response is the transaction confirmation.
///
/// Two tiers, strict first: domain and path tokens, then a loose keyword
/// heuristic restricted to successful responses that are not processor or
/// analytics traffic.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    domain: String,
    path: String,
    keyword: String,
    exclusions: [String; 2],
}

impl ResponseClassifier {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            domain: config.primary_domain.to_lowercase(),
            path: config.transaction_path.to_lowercase(),
            keyword: config.heuristic_keyword.to_lowercase(),
            exclusions: [
                config.processor_exclusion.to_lowercase(),
                config.analytics_exclusion.to_lowercase(),
            ],
        }
    }

    pub fn classify(&self, response: &NetworkResponse) -> ResponseClassification {
        let url = response.url.to_lowercase();

        let reason = if self.is_transaction_endpoint(&url) {
            MatchReason::DomainAndPathMatch
        } else if response.is_success()
            && url.contains(&self.keyword)
            && !self.is_excluded(&url)
        {
            MatchReason::DonationHeuristicMatch
        } else {
            MatchReason::None
        };

        reason.into()
    }

    /// Strict tier only; used to recover the response after a navigation win
    pub fn is_transaction_endpoint(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        url.contains(&self.domain) && url.contains(&self.path)
    }

    fn is_excluded(&self, url: &str) -> bool {
        self.exclusions
            .iter()
            .any(|token| !token.is_empty() && url.contains(token.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn classifier() -> ResponseClassifier {
        ResponseClassifier::new(&ApiConfig::default())
    }

    #[test_case("https://api.cruk.org/transaction/confirm", 200, MatchReason::DomainAndPathMatch ; "strict tier")]
    #[test_case("https://api.cruk.org/transaction/confirm", 500, MatchReason::DomainAndPathMatch ; "strict tier ignores status")]
    #[test_case("https://API.CRUK.ORG/Transaction", 201, MatchReason::DomainAndPathMatch ; "strict tier ignores case")]
    #[test_case("https://pay.example.com/donation/submit", 200, MatchReason::DonationHeuristicMatch ; "heuristic tier")]
    #[test_case("https://pay.example.com/donation/submit", 400, MatchReason::None ; "heuristic needs success")]
    #[test_case("https://braintree.example.com/donation", 200, MatchReason::None ; "processor excluded")]
    #[test_case("https://analytics.example.com/donation-view", 200, MatchReason::None ; "analytics excluded")]
    #[test_case("https://cruk.org/support-us/your-donation", 200, MatchReason::DonationHeuristicMatch ; "domain without path falls to heuristic")]
    #[test_case("https://cdn.example.com/app.js", 200, MatchReason::None ; "unrelated")]
    fn test_classify(url: &str, status: u16, expected: MatchReason) {
        let response = NetworkResponse::new(1, "POST", url, status);
        let classification = classifier().classify(&response);
        assert_eq!(classification.reason, expected);
        assert_eq!(classification.is_target_api, expected != MatchReason::None);
    }

    #[test]
    fn test_strict_tier_wins_over_heuristic() {
        let response = NetworkResponse::new(1, "POST", "https://cruk.org/transaction/donation", 200);
        assert_eq!(
            classifier().classify(&response).reason,
            MatchReason::DomainAndPathMatch
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = classifier();
        let response = NetworkResponse::new(7, "GET", "https://x.org/donation/ok", 204);
        assert_eq!(classifier.classify(&response), classifier.classify(&response));
    }
}
