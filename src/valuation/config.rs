//! Engine configuration - TTLs, similarity weights, adjustment rates,
//! consensus tolerances, and concurrency limits.
//! All tunables live here rather than as constants buried in logic.

use crate::valuation::types::SourceId;
use chrono::Duration as ChronoDuration;
use std::time::Duration;

/// Per-source cache freshness policy
#[derive(Debug, Clone)]
pub struct TtlConfig {
    /// Registry/authoritative data changes slowly
    pub registry: ChronoDuration,
    /// Scraped listing data goes stale within hours
    pub scraped: ChronoDuration,
    /// AI measurement facts never expire - recomputing requires a new image
    pub ai_measurement: Option<ChronoDuration>,
}

impl Default for TtlConfig {
    fn default() -> Self {
        TtlConfig {
            registry: ChronoDuration::days(7),
            scraped: ChronoDuration::hours(6),
            ai_measurement: None,
        }
    }
}

impl TtlConfig {
    pub fn for_source(&self, source: SourceId) -> Option<ChronoDuration> {
        match source {
            SourceId::RegistryApi => Some(self.registry),
            SourceId::ScrapeListingA | SourceId::ScrapeListingB | SourceId::ScrapeListingC => {
                Some(self.scraped)
            }
            SourceId::AiMeasurement => self.ai_measurement,
        }
    }
}

/// Similarity penalties and dollar adjustment rates for comparables
#[derive(Debug, Clone)]
pub struct ComparableConfig {
    /// Penalty points per bedroom-count difference
    pub bedroom_penalty: f64,
    /// Penalty points per bathroom-count difference
    pub bathroom_penalty: f64,
    /// Penalty points per percent of square-footage difference
    pub sqft_pct_penalty: f64,
    /// Penalty points per year of age difference
    pub age_penalty: f64,
    /// Penalty points per mile within the first mile
    pub distance_near_penalty: f64,
    /// Penalty points per mile beyond one mile
    pub distance_far_penalty: f64,
    /// Flat penalty for a property-type mismatch; large enough to
    /// usually push the score below the floor
    pub type_mismatch_penalty: f64,
    /// Flat penalty when a candidate is missing a comparison field
    pub missing_field_penalty: f64,

    /// Candidates scoring below this are excluded, not zero-weighted
    pub similarity_floor: f64,
    /// Candidates sold more than this many months ago are excluded
    pub recency_months: i64,
    pub max_results: usize,

    /// Dollar value per bedroom difference
    pub per_bedroom_value: i64,
    /// Dollar value per bathroom difference
    pub per_bathroom_value: i64,
    /// Dollar value per square foot of size difference
    pub per_sqft_value: i64,
    /// Dollar value per square foot of lot difference
    pub per_lot_sqft_value: i64,
    /// Dollar value per year of age difference
    pub per_year_value: i64,
    /// Annual market appreciation used to project comp prices to the
    /// subject's as-of date
    pub annual_appreciation: f64,
}

impl Default for ComparableConfig {
    fn default() -> Self {
        ComparableConfig {
            bedroom_penalty: 6.0,
            bathroom_penalty: 4.0,
            sqft_pct_penalty: 0.75,
            age_penalty: 0.3,
            distance_near_penalty: 5.0,
            distance_far_penalty: 15.0,
            type_mismatch_penalty: 60.0,
            missing_field_penalty: 5.0,
            similarity_floor: 50.0,
            recency_months: 12,
            max_results: 6,
            per_bedroom_value: 15_000,
            per_bathroom_value: 10_000,
            per_sqft_value: 150,
            per_lot_sqft_value: 2,
            per_year_value: 500,
            annual_appreciation: 0.03,
        }
    }
}

/// Consensus blending tolerances
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Range applied around a lone estimate with no range of its own
    pub single_source_range_pct: f64,
    /// Estimates agreeing within this coefficient of variation earn
    /// High confidence
    pub agreement_tolerance: f64,
    /// A pair of estimates both scoring below this quality cannot earn
    /// High confidence no matter how closely they agree
    pub weak_quality_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            single_source_range_pct: 0.10,
            agreement_tolerance: 0.10,
            weak_quality_threshold: 40.0,
        }
    }
}

/// Concurrency and timeout limits for a pipeline run
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub registry_timeout: Duration,
    pub scrape_timeout: Duration,
    pub ai_timeout: Duration,
    /// Hard wall for the whole run; exceeding it records status timeout
    pub run_timeout: Duration,
    /// Global cap on in-flight fetches across simultaneous runs
    pub max_concurrent_fetches: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        RunLimits {
            registry_timeout: Duration::from_secs(15),
            scrape_timeout: Duration::from_secs(45),
            ai_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(120),
            max_concurrent_fetches: 8,
        }
    }
}

impl RunLimits {
    pub fn source_timeout(&self, source: SourceId) -> Duration {
        match source {
            SourceId::RegistryApi => self.registry_timeout,
            SourceId::ScrapeListingA | SourceId::ScrapeListingB | SourceId::ScrapeListingC => {
                self.scrape_timeout
            }
            SourceId::AiMeasurement => self.ai_timeout,
        }
    }
}

/// Estimated dollar cost per source call, for run cost accounting
#[derive(Debug, Clone)]
pub struct CostTable {
    pub registry_call: f64,
    pub scrape_call: f64,
    pub ai_call: f64,
}

impl Default for CostTable {
    fn default() -> Self {
        CostTable {
            registry_call: 0.05,
            scrape_call: 0.01,
            ai_call: 0.02,
        }
    }
}

impl CostTable {
    pub fn for_source(&self, source: SourceId) -> f64 {
        match source {
            SourceId::RegistryApi => self.registry_call,
            SourceId::ScrapeListingA | SourceId::ScrapeListingB | SourceId::ScrapeListingC => {
                self.scrape_call
            }
            SourceId::AiMeasurement => self.ai_call,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub ttl: TtlConfig,
    pub comps: ComparableConfig,
    pub consensus: ConsensusConfig,
    pub limits: RunLimits,
    pub costs: CostTable,
}
