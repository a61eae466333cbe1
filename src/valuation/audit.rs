//! Audit/provenance recorder - every valuation run is recorded with its
//! source attempts, timing, cost, and resulting valuation. Runs are never
//! deleted; they form the queryable history for cost and reliability
//! monitoring.

use crate::valuation::config::CostTable;
use crate::valuation::error::ValuationError;
use crate::valuation::types::{
    AnalysisRun, RunStatus, SourceAttempt, SubjectKey, ValuationResult,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// In-memory run recorder. The Postgres store persists finished runs
/// separately (see store module).
pub struct AuditRecorder {
    costs: CostTable,
    runs: Mutex<RunLog>,
}

#[derive(Default)]
struct RunLog {
    by_id: HashMap<Uuid, AnalysisRun>,
    order: Vec<Uuid>,
}

impl AuditRecorder {
    pub fn new(costs: CostTable) -> AuditRecorder {
        AuditRecorder {
            costs,
            runs: Mutex::new(RunLog::default()),
        }
    }

    /// Open a run in status running and return its id
    pub fn start_run(&self, subject_key: &SubjectKey) -> Uuid {
        let id = Uuid::new_v4();
        let run = AnalysisRun {
            id,
            subject_key: subject_key.clone(),
            started_at: Utc::now(),
            completed_at: None,
            attempts: Vec::new(),
            cost_estimate: 0.0,
            status: RunStatus::Running,
            error_detail: None,
            result: None,
        };

        let mut log = self.runs.lock().unwrap();
        log.by_id.insert(id, run);
        log.order.push(id);

        info!(run_id = %id, subject = %subject_key, "analysis run started");
        id
    }

    /// Record one source fetch attempt, success or failure, with timing.
    /// Each attempt accrues the source's estimated call cost.
    pub fn record_source_attempt(&self, run_id: Uuid, attempt: SourceAttempt) {
        let mut log = self.runs.lock().unwrap();
        if let Some(run) = log.by_id.get_mut(&run_id) {
            run.cost_estimate += self.costs.for_source(attempt.source);
            run.attempts.push(attempt);
        } else {
            warn!(run_id = %run_id, "attempt recorded against unknown run");
        }
    }

    /// Finalize a run as completed. Partial success (some sources failed
    /// but consensus still produced a result) is still completed.
    pub fn complete_run(&self, run_id: Uuid, result: ValuationResult) {
        let mut log = self.runs.lock().unwrap();
        if let Some(run) = log.by_id.get_mut(&run_id) {
            run.status = RunStatus::Completed;
            run.completed_at = Some(Utc::now());
            run.result = Some(result);
            info!(
                run_id = %run_id,
                attempted = run.sources_attempted(),
                succeeded = run.sources_succeeded(),
                "analysis run completed"
            );
        }
    }

    /// Finalize a run as failed, or timeout when the run-level deadline
    /// fired. Failures carry a classification, not a stack trace.
    pub fn fail_run(&self, run_id: Uuid, error: &ValuationError) {
        let status = match error {
            ValuationError::RunTimeout(_) => RunStatus::Timeout,
            _ => RunStatus::Failed,
        };

        let mut log = self.runs.lock().unwrap();
        if let Some(run) = log.by_id.get_mut(&run_id) {
            run.status = status;
            run.completed_at = Some(Utc::now());
            run.error_detail = Some(error.to_string());
            warn!(run_id = %run_id, status = %status, error = %error, "analysis run failed");
        }
    }

    pub fn get(&self, run_id: Uuid) -> Option<AnalysisRun> {
        self.runs.lock().unwrap().by_id.get(&run_id).cloned()
    }

    /// All runs in start order, oldest first
    pub fn runs(&self) -> Vec<AnalysisRun> {
        let log = self.runs.lock().unwrap();
        log.order
            .iter()
            .filter_map(|id| log.by_id.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::error::SourceError;
    use crate::valuation::types::{ConfidenceLevel, FetchOutcome, SourceId};
    use std::time::Duration;

    fn key() -> SubjectKey {
        SubjectKey::new("123 Main St", "Denver", "CO", "80211")
    }

    fn attempt(source: SourceId, outcome: FetchOutcome) -> SourceAttempt {
        SourceAttempt {
            source,
            outcome,
            duration_ms: 120,
            detail: None,
        }
    }

    fn result() -> ValuationResult {
        ValuationResult {
            subject_key: key(),
            estimated_value: Some(450_000),
            value_range_low: Some(420_000),
            value_range_high: Some(480_000),
            confidence_level: ConfidenceLevel::Medium,
            data_quality_score: 60,
            contributing_sources: Vec::new(),
            comparables_used: Vec::new(),
            reasoning: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_run_lifecycle_completed() {
        let recorder = AuditRecorder::new(CostTable::default());
        let id = recorder.start_run(&key());

        assert_eq!(recorder.get(id).unwrap().status, RunStatus::Running);

        recorder.record_source_attempt(id, attempt(SourceId::RegistryApi, FetchOutcome::Succeeded));
        recorder.record_source_attempt(
            id,
            attempt(SourceId::ScrapeListingA, FetchOutcome::Unavailable),
        );
        recorder.complete_run(id, result());

        let run = recorder.get(id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
        assert!(run.result.is_some());
        // Partial success is still completed, with the gap visible
        assert_eq!(run.sources_attempted(), 2);
        assert_eq!(run.sources_succeeded(), 1);
    }

    #[test]
    fn test_cost_accrues_per_attempt() {
        let recorder = AuditRecorder::new(CostTable::default());
        let id = recorder.start_run(&key());

        recorder.record_source_attempt(id, attempt(SourceId::RegistryApi, FetchOutcome::Succeeded));
        recorder.record_source_attempt(
            id,
            attempt(SourceId::ScrapeListingA, FetchOutcome::RateLimited),
        );

        let run = recorder.get(id).unwrap();
        assert!((run.cost_estimate - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_fail_run_classifies_timeout() {
        let recorder = AuditRecorder::new(CostTable::default());

        let id = recorder.start_run(&key());
        recorder.fail_run(id, &ValuationError::RunTimeout(Duration::from_secs(120)));
        assert_eq!(recorder.get(id).unwrap().status, RunStatus::Timeout);

        let id = recorder.start_run(&key());
        recorder.fail_run(
            id,
            &ValuationError::NoPricingData(key().to_string()),
        );
        let run = recorder.get(id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_detail.unwrap().contains("no pricing data"));
    }

    #[test]
    fn test_failure_attempts_recorded_with_classification() {
        let recorder = AuditRecorder::new(CostTable::default());
        let id = recorder.start_run(&key());

        let err = SourceError::RateLimited("429".to_string());
        recorder.record_source_attempt(
            id,
            SourceAttempt {
                source: SourceId::ScrapeListingB,
                outcome: FetchOutcome::RateLimited,
                duration_ms: 40,
                detail: Some(err.to_string()),
            },
        );

        let run = recorder.get(id).unwrap();
        assert_eq!(run.attempts[0].outcome, FetchOutcome::RateLimited);
        assert!(run.attempts[0].detail.as_ref().unwrap().contains("rate limited"));
    }

    #[test]
    fn test_runs_ordered_oldest_first() {
        let recorder = AuditRecorder::new(CostTable::default());
        let a = recorder.start_run(&key());
        let b = recorder.start_run(&key());

        let runs = recorder.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, a);
        assert_eq!(runs[1].id, b);
    }
}
