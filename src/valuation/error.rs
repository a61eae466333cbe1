//! Error taxonomy for source fetching and valuation runs

use crate::valuation::types::SourceId;
use std::time::Duration;
use thiserror::Error;

/// Failures attributable to a single source. Always recovered locally -
/// the run continues without that source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Source could not be reached or returned an unparseable error body
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Explicit rate-limit signal; callers can back off this source
    #[error("source rate limited: {0}")]
    RateLimited(String),
}

/// Run-level failures. Only a total failure surfaces as a failed run.
#[derive(Debug, Error)]
pub enum ValuationError {
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Every source failed to produce any price-relevant data
    #[error("no pricing data available for {0}")]
    NoPricingData(String),

    /// Cache returned a fact observed in the future - a programming
    /// error, not a retryable condition
    #[error("cache fact for {key}/{source_id} has observed_at in the future")]
    StaleCacheInconsistency { key: String, source_id: SourceId },

    #[error("valuation run exceeded {0:?}")]
    RunTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display() {
        let e = SourceError::Unavailable("connection refused".to_string());
        assert_eq!(e.to_string(), "source unavailable: connection refused");

        let e = SourceError::RateLimited("429 from provider".to_string());
        assert_eq!(e.to_string(), "source rate limited: 429 from provider");
    }

    #[test]
    fn test_valuation_error_from_source() {
        let e: ValuationError = SourceError::Unavailable("down".to_string()).into();
        assert!(matches!(e, ValuationError::Source(_)));
    }

    #[test]
    fn test_stale_cache_inconsistency_display() {
        let e = ValuationError::StaleCacheInconsistency {
            key: "123 MAIN STREET|DENVER|CO|80211".to_string(),
            source_id: SourceId::ScrapeListingA,
        };
        assert!(e.to_string().contains("scrape_listing_a"));
        assert!(e.to_string().contains("observed_at in the future"));
    }
}
