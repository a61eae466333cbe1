//! Core data types for the valuation engine
//! Pure data structures with no behavior beyond accessors

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Data sources that can contribute a view of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    RegistryApi,
    ScrapeListingA,
    ScrapeListingB,
    ScrapeListingC,
    AiMeasurement,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::RegistryApi => "registry_api",
            SourceId::ScrapeListingA => "scrape_listing_a",
            SourceId::ScrapeListingB => "scrape_listing_b",
            SourceId::ScrapeListingC => "scrape_listing_c",
            SourceId::AiMeasurement => "ai_measurement",
        }
    }

    pub fn from_str(s: &str) -> Option<SourceId> {
        match s {
            "registry_api" => Some(SourceId::RegistryApi),
            "scrape_listing_a" => Some(SourceId::ScrapeListingA),
            "scrape_listing_b" => Some(SourceId::ScrapeListingB),
            "scrape_listing_c" => Some(SourceId::ScrapeListingC),
            "ai_measurement" => Some(SourceId::AiMeasurement),
        _ => None,
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized address key - the same physical property always maps to the
/// same key regardless of how a source formats the address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl SubjectKey {
    /// Build a key from raw address components, normalizing case,
    /// whitespace, and common street-type abbreviations
    pub fn new(street: &str, city: &str, state: &str, postal_code: &str) -> SubjectKey {
        SubjectKey {
            street: normalize_street(street),
            city: collapse_upper(city),
            state: collapse_upper(state),
            postal_code: postal_code.trim().to_string(),
        }
    }

    /// Canonical string form used as a cache/storage key
    pub fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

fn collapse_upper(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn normalize_street(s: &str) -> String {
    let upper = collapse_upper(s);
    upper
        .split(' ')
        .map(|word| {
            let trimmed = word.trim_end_matches('.');
            match trimmed {
                "ST" => "STREET",
                "AVE" | "AV" => "AVENUE",
                "RD" => "ROAD",
                "DR" => "DRIVE",
                "LN" => "LANE",
                "CT" => "COURT",
                "BLVD" => "BOULEVARD",
                "PL" => "PLACE",
                "HWY" => "HIGHWAY",
                other => other,
            }
            .to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical field names shared by every source
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Bedrooms,
    Bathrooms,
    SquareFeet,
    LotSize,
    YearBuilt,
    LastSalePrice,
    LastSaleDate,
    AssessedValue,
    EstimatedValue,
    EstimatedValueLow,
    EstimatedValueHigh,
    ListingPrice,
    WalkScore,
    TransitScore,
    DaysOnMarket,
    AppreciationRate,
    AmenityCount,
}

/// A single field value - numbers for most fields, dates for sale dates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// One field as observed by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactField {
    pub value: FieldValue,
    /// 0.0-1.0
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

/// One provider's view of one property at one point in time.
/// Immutable once created - a refetch produces a new fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyFact {
    pub source: SourceId,
    pub subject_key: SubjectKey,
    pub fields: BTreeMap<FieldName, FactField>,
    /// Opaque source response, retained for audit only
    pub raw_payload: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

impl PropertyFact {
    pub fn number(&self, field: FieldName) -> Option<f64> {
        self.fields.get(&field).and_then(|f| f.value.as_number())
    }

    pub fn date(&self, field: FieldName) -> Option<NaiveDate> {
        self.fields.get(&field).and_then(|f| f.value.as_date())
    }

    pub fn has(&self, field: FieldName) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn confidence(&self, field: FieldName) -> Option<f64> {
        self.fields.get(&field).map(|f| f.confidence)
    }
}

/// Property types (US residential market)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    SingleFamily,
    Condo,
    Townhouse,
    MultiFamily,
    Land,
    Other,
}

impl PropertyType {
    /// Parse a provider's free-text property type
    pub fn parse(s: &str) -> PropertyType {
        let lower = s.to_lowercase();
        if lower.contains("single") || lower.contains("sfr") || lower.contains("house") {
            PropertyType::SingleFamily
        } else if lower.contains("condo") || lower.contains("apartment") {
            PropertyType::Condo
        } else if lower.contains("townhouse") || lower.contains("townhome") {
            PropertyType::Townhouse
        } else if lower.contains("multi") || lower.contains("duplex") {
            PropertyType::MultiFamily
        } else if lower.contains("land") || lower.contains("lot") {
            PropertyType::Land
        } else {
            PropertyType::Other
        }
    }
}

/// The property being valued
#[derive(Debug, Clone)]
pub struct SubjectProperty {
    pub key: SubjectKey,
    pub property_type: PropertyType,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i32>,
    pub lot_size_sqft: Option<i32>,
    pub year_built: Option<i32>,
    /// Valuation as-of date; comp sale prices are projected to this date
    pub as_of: NaiveDate,
}

/// One itemized dollar adjustment applied to a comparable's sale price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub reason: String,
    pub amount: i64,
}

/// A candidate sold property used to value the subject.
/// Similarity and adjustments are zeroed until the selector computes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparableCandidate {
    pub address: String,
    pub sale_price: i64,
    pub sale_date: NaiveDate,
    pub distance_miles: f64,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i32>,
    pub lot_size_sqft: Option<i32>,
    pub year_built: Option<i32>,
    pub property_type: PropertyType,
    pub data_source: SourceId,

    // Derived by the selector
    pub similarity_score: f64,
    pub adjustments: Vec<Adjustment>,
    pub adjusted_price: i64,
}

impl ComparableCandidate {
    pub fn net_adjustment(&self) -> i64 {
        self.adjustments.iter().map(|a| a.amount).sum()
    }
}

/// Confidence label on a reconciled valuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLevel::Low => write!(f, "Low"),
            ConfidenceLevel::Medium => write!(f, "Medium"),
            ConfidenceLevel::High => write!(f, "High"),
        }
    }
}

/// An independent price signal entering the consensus blend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateOrigin {
    Avm,
    Comparables,
    AiNarrative,
}

impl std::fmt::Display for EstimateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimateOrigin::Avm => write!(f, "AVM"),
            EstimateOrigin::Comparables => write!(f, "comparables"),
            EstimateOrigin::AiNarrative => write!(f, "AI narrative"),
        }
    }
}

/// Weight a source carried in the final blend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceWeight {
    pub origin: EstimateOrigin,
    pub weight: f64,
}

/// Price estimate supplied by the AI narrative estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceEstimate {
    pub value: i64,
    pub range_low: Option<i64>,
    pub range_high: Option<i64>,
    /// 0.0-1.0
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// The reconciled output for one subject property.
/// Never mutated after creation - a new analysis produces a new result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResult {
    pub subject_key: SubjectKey,
    pub estimated_value: Option<i64>,
    pub value_range_low: Option<i64>,
    pub value_range_high: Option<i64>,
    pub confidence_level: ConfidenceLevel,
    /// 0-100
    pub data_quality_score: u8,
    pub contributing_sources: Vec<SourceWeight>,
    pub comparables_used: Vec<ComparableCandidate>,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

/// Terminal and in-progress states of an analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Classified outcome of a single source fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Succeeded,
    Unavailable,
    RateLimited,
    TimedOut,
}

/// One recorded source fetch attempt within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: SourceId,
    pub outcome: FetchOutcome,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

/// One execution of the full valuation pipeline (audit entity)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub subject_key: SubjectKey,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: Vec<SourceAttempt>,
    pub cost_estimate: f64,
    pub status: RunStatus,
    pub error_detail: Option<String>,
    pub result: Option<ValuationResult>,
}

impl AnalysisRun {
    pub fn sources_attempted(&self) -> usize {
        self.attempts.len()
    }

    pub fn sources_succeeded(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == FetchOutcome::Succeeded)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_key_normalization() {
        let a = SubjectKey::new("123  Main St.", "Denver", "co", "80211");
        let b = SubjectKey::new("123 MAIN STREET", " denver ", "CO", " 80211 ");
        assert_eq!(a, b);
        assert_eq!(a.street, "123 MAIN STREET");
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_subject_key_abbreviations() {
        let key = SubjectKey::new("45 Oak Ave", "Boston", "MA", "02101");
        assert_eq!(key.street, "45 OAK AVENUE");

        let key = SubjectKey::new("9 Elm Blvd.", "Boston", "MA", "02101");
        assert_eq!(key.street, "9 ELM BOULEVARD");
    }

    #[test]
    fn test_property_type_parse() {
        assert_eq!(
            PropertyType::parse("Single Family Residence"),
            PropertyType::SingleFamily
        );
        assert_eq!(PropertyType::parse("CONDO"), PropertyType::Condo);
        assert_eq!(PropertyType::parse("Townhome"), PropertyType::Townhouse);
        assert_eq!(PropertyType::parse("Vacant Lot"), PropertyType::Land);
        assert_eq!(PropertyType::parse("mystery"), PropertyType::Other);
    }

    #[test]
    fn test_source_id_roundtrip() {
        for source in [
            SourceId::RegistryApi,
            SourceId::ScrapeListingA,
            SourceId::ScrapeListingB,
            SourceId::ScrapeListingC,
            SourceId::AiMeasurement,
        ] {
            assert_eq!(SourceId::from_str(source.as_str()), Some(source));
        }
        assert_eq!(SourceId::from_str("bogus"), None);
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(ConfidenceLevel::Low < ConfidenceLevel::Medium);
        assert!(ConfidenceLevel::Medium < ConfidenceLevel::High);
    }
}
