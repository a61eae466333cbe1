//! Pipeline orchestration - fan out to every configured source, gather
//! whatever arrives in time, then select comparables and reconcile a
//! consensus valuation. One slow or broken source never sinks the run.

use crate::sources::SourceFetcher;
use crate::valuation::audit::AuditRecorder;
use crate::valuation::cache::FactCache;
use crate::valuation::comps;
use crate::valuation::config::EngineConfig;
use crate::valuation::consensus;
use crate::valuation::error::{SourceError, ValuationError};
use crate::valuation::types::{
    ComparableCandidate, FetchOutcome, PriceEstimate, PropertyFact, SourceAttempt,
    SubjectProperty, ValuationResult,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ValuationPipeline {
    cache: Arc<FactCache>,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    audit: Arc<AuditRecorder>,
    config: EngineConfig,
    /// Global cap on in-flight fetches across simultaneous runs
    limiter: Arc<Semaphore>,
}

impl ValuationPipeline {
    pub fn new(
        cache: Arc<FactCache>,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
        audit: Arc<AuditRecorder>,
        config: EngineConfig,
    ) -> ValuationPipeline {
        let limiter = Arc::new(Semaphore::new(config.limits.max_concurrent_fetches));
        ValuationPipeline {
            cache,
            fetchers,
            audit,
            config,
            limiter,
        }
    }

    pub fn cache(&self) -> &Arc<FactCache> {
        &self.cache
    }

    pub fn audit(&self) -> &Arc<AuditRecorder> {
        &self.audit
    }

    /// Run the full valuation for one subject property.
    ///
    /// Source failures are recorded and tolerated; the run itself fails
    /// only when no source yields a usable fact, or when the run-level
    /// deadline fires.
    pub async fn run(
        &self,
        subject: &SubjectProperty,
        candidate_pool: Vec<ComparableCandidate>,
        ai_narrative_estimate: Option<PriceEstimate>,
    ) -> Result<(Uuid, ValuationResult), ValuationError> {
        let run_id = self.audit.start_run(&subject.key);

        let gather = self.gather_facts(run_id, subject);
        let facts = match tokio::time::timeout(self.config.limits.run_timeout, gather).await {
            Ok(facts) => facts,
            Err(_) => {
                let err = ValuationError::RunTimeout(self.config.limits.run_timeout);
                self.audit.fail_run(run_id, &err);
                return Err(err);
            }
        };

        if facts.is_empty() {
            let err = ValuationError::NoPricingData(subject.key.to_string());
            self.audit.fail_run(run_id, &err);
            return Err(err);
        }

        let comparables = comps::select_and_adjust(
            subject,
            candidate_pool,
            self.config.comps.max_results,
            &self.config.comps,
        );

        let result = consensus::reconcile(
            &subject.key,
            &facts,
            comparables,
            ai_narrative_estimate,
            &self.config.consensus,
        );

        info!(
            run_id = %run_id,
            subject = %subject.key,
            estimate = ?result.estimated_value,
            confidence = %result.confidence_level,
            "valuation run finished"
        );
        self.audit.complete_run(run_id, result.clone());
        Ok((run_id, result))
    }

    /// Scatter one fetch task per configured source and gather whatever
    /// succeeds. Every attempt is recorded, classified, and timed.
    async fn gather_facts(&self, run_id: Uuid, subject: &SubjectProperty) -> Vec<PropertyFact> {
        let mut set = JoinSet::new();

        for fetcher in &self.fetchers {
            let fetcher = fetcher.clone();
            let cache = self.cache.clone();
            let limiter = self.limiter.clone();
            let key = subject.key.clone();
            let source = fetcher.source();
            let budget = self.config.limits.source_timeout(source);

            set.spawn(async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            SourceAttempt {
                                source,
                                outcome: FetchOutcome::Unavailable,
                                duration_ms: 0,
                                detail: Some("fetch limiter closed".to_string()),
                            },
                            None,
                        );
                    }
                };

                let started = Instant::now();
                let fetch_key = key.clone();
                let outcome = tokio::time::timeout(
                    budget,
                    cache.get_or_fetch(&key, source, || fetcher.fetch(fetch_key)),
                )
                .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                let (classified, detail, fact) = match outcome {
                    Err(_) => (
                        FetchOutcome::TimedOut,
                        Some(format!("no response within {:?}", budget)),
                        None,
                    ),
                    Ok(Ok(fact)) => (FetchOutcome::Succeeded, None, Some(fact)),
                    Ok(Err(e)) => {
                        let classified = match &e {
                            ValuationError::Source(SourceError::RateLimited(_)) => {
                                FetchOutcome::RateLimited
                            }
                            _ => FetchOutcome::Unavailable,
                        };
                        (classified, Some(e.to_string()), None)
                    }
                };

                (
                    SourceAttempt {
                        source,
                        outcome: classified,
                        duration_ms,
                        detail,
                    },
                    fact,
                )
            });
        }

        let mut facts = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((attempt, fact)) => {
                    self.audit.record_source_attempt(run_id, attempt);
                    if let Some(fact) = fact {
                        facts.push((*fact).clone());
                    }
                }
                Err(e) => warn!(run_id = %run_id, error = %e, "source task aborted"),
            }
        }
        facts
    }
}
