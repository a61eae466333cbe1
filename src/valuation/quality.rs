//! Data quality scoring - 0-100 completeness/reliability ratings for a
//! single source's contribution and for a whole run.
//!
//! Each category is all-or-nothing so the score stays auditable and
//! stable under small input changes.

use crate::valuation::types::{ComparableCandidate, FieldName, PropertyFact};

const PRICE_DATA_POINTS: u8 = 30;
const CORE_CHARACTERISTICS_POINTS: u8 = 25;
const MARKET_METRICS_POINTS: u8 = 15;
const LIVABILITY_POINTS: u8 = 10;
const HISTORY_POINTS: u8 = 10;
const AMENITY_POINTS: u8 = 10;

/// Score one source's contribution in [0, 100]
pub fn score_fact(fact: &PropertyFact) -> u8 {
    let mut score: u8 = 0;

    // Any price signal at all
    if fact.has(FieldName::LastSalePrice)
        || fact.has(FieldName::EstimatedValue)
        || fact.has(FieldName::ListingPrice)
        || fact.has(FieldName::AssessedValue)
    {
        score += PRICE_DATA_POINTS;
    }

    // Core characteristics require all three, no partial credit
    if fact.has(FieldName::Bedrooms)
        && fact.has(FieldName::Bathrooms)
        && fact.has(FieldName::SquareFeet)
    {
        score += CORE_CHARACTERISTICS_POINTS;
    }

    if fact.has(FieldName::DaysOnMarket) {
        score += MARKET_METRICS_POINTS;
    }

    if fact.has(FieldName::WalkScore) || fact.has(FieldName::TransitScore) {
        score += LIVABILITY_POINTS;
    }

    // Historical price series means a dated prior sale
    if fact.has(FieldName::LastSalePrice) && fact.has(FieldName::LastSaleDate) {
        score += HISTORY_POINTS;
    }

    if fact.has(FieldName::AmenityCount) {
        score += AMENITY_POINTS;
    }

    score
}

const MEAN_SOURCE_WEIGHT: f64 = 0.5;
const SOURCE_COUNT_WEIGHT: f64 = 0.25;
const COMPARABLE_COUNT_WEIGHT: f64 = 0.25;

/// Saturation points: three independent sources or five usable
/// comparables earn full credit for their component
const SOURCE_COUNT_SATURATION: f64 = 3.0;
const COMPARABLE_COUNT_SATURATION: f64 = 5.0;

/// Aggregate quality for a full run. All three components move the
/// score: mean per-source quality, number of independent sources, and
/// number of usable comparables.
pub fn score_run(facts: &[PropertyFact], comparables: &[ComparableCandidate]) -> u8 {
    if facts.is_empty() && comparables.is_empty() {
        return 0;
    }

    let mean_source = if facts.is_empty() {
        0.0
    } else {
        facts.iter().map(|f| score_fact(f) as f64).sum::<f64>() / facts.len() as f64
    };

    let source_count = (facts.len() as f64 / SOURCE_COUNT_SATURATION).min(1.0) * 100.0;
    let comp_count = (comparables.len() as f64 / COMPARABLE_COUNT_SATURATION).min(1.0) * 100.0;

    let combined = mean_source * MEAN_SOURCE_WEIGHT
        + source_count * SOURCE_COUNT_WEIGHT
        + comp_count * COMPARABLE_COUNT_WEIGHT;

    combined.round().clamp(0.0, 100.0) as u8
}

/// Pseudo-quality score for the comparables-based estimate entering the
/// consensus blend, driven by comp count and mean similarity
pub fn score_comp_estimate(comparables: &[ComparableCandidate]) -> u8 {
    if comparables.is_empty() {
        return 0;
    }

    let mean_similarity = comparables
        .iter()
        .map(|c| c.similarity_score)
        .sum::<f64>()
        / comparables.len() as f64;
    let count_component =
        (comparables.len() as f64 / COMPARABLE_COUNT_SATURATION).min(1.0) * 100.0;

    (mean_similarity * 0.6 + count_component * 0.4).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::types::{
        FactField, FieldValue, PropertyType, SourceId, SubjectKey,
    };
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;

    fn fact_with(fields: &[(FieldName, f64)]) -> PropertyFact {
        let now = Utc::now();
        let mut map = BTreeMap::new();
        for (name, value) in fields {
            map.insert(
                *name,
                FactField {
                    value: FieldValue::Number(*value),
                    confidence: 1.0,
                    observed_at: now,
                },
            );
        }
        PropertyFact {
            source: SourceId::RegistryApi,
            subject_key: SubjectKey::new("1 Test St", "Denver", "CO", "80211"),
            fields: map,
            raw_payload: serde_json::Value::Null,
            observed_at: now,
        }
    }

    fn comp(similarity: f64) -> ComparableCandidate {
        ComparableCandidate {
            address: "2 Test St".to_string(),
            sale_price: 400_000,
            sale_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            distance_miles: 0.3,
            bedrooms: Some(3),
            bathrooms: Some(2.0),
            square_feet: Some(1500),
            lot_size_sqft: None,
            year_built: Some(1990),
            property_type: PropertyType::SingleFamily,
            data_source: SourceId::RegistryApi,
            similarity_score: similarity,
            adjustments: Vec::new(),
            adjusted_price: 400_000,
        }
    }

    #[test]
    fn test_empty_fact_scores_zero() {
        assert_eq!(score_fact(&fact_with(&[])), 0);
    }

    #[test]
    fn test_core_characteristics_all_or_nothing() {
        // Two of three core fields earn no category credit
        let partial = fact_with(&[(FieldName::Bedrooms, 3.0), (FieldName::Bathrooms, 2.0)]);
        let full = fact_with(&[
            (FieldName::Bedrooms, 3.0),
            (FieldName::Bathrooms, 2.0),
            (FieldName::SquareFeet, 1500.0),
        ]);
        assert_eq!(score_fact(&partial), 0);
        assert_eq!(score_fact(&full), 25);
    }

    #[test]
    fn test_full_fact_scores_100() {
        let mut fact = fact_with(&[
            (FieldName::EstimatedValue, 425_000.0),
            (FieldName::LastSalePrice, 350_000.0),
            (FieldName::Bedrooms, 3.0),
            (FieldName::Bathrooms, 2.0),
            (FieldName::SquareFeet, 1500.0),
            (FieldName::DaysOnMarket, 12.0),
            (FieldName::WalkScore, 80.0),
            (FieldName::AmenityCount, 4.0),
        ]);
        fact.fields.insert(
            FieldName::LastSaleDate,
            FactField {
                value: FieldValue::Date(NaiveDate::from_ymd_opt(2020, 1, 15).unwrap()),
                confidence: 1.0,
                observed_at: Utc::now(),
            },
        );
        assert_eq!(score_fact(&fact), 100);
    }

    #[test]
    fn test_run_score_rewards_breadth_over_one_perfect_source() {
        let perfect = fact_with(&[
            (FieldName::EstimatedValue, 425_000.0),
            (FieldName::LastSalePrice, 350_000.0),
            (FieldName::Bedrooms, 3.0),
            (FieldName::Bathrooms, 2.0),
            (FieldName::SquareFeet, 1500.0),
            (FieldName::DaysOnMarket, 12.0),
            (FieldName::WalkScore, 80.0),
            (FieldName::AmenityCount, 4.0),
        ]);
        let adequate = fact_with(&[
            (FieldName::EstimatedValue, 430_000.0),
            (FieldName::Bedrooms, 3.0),
            (FieldName::Bathrooms, 2.0),
            (FieldName::SquareFeet, 1480.0),
        ]);

        let one_source_no_comps = score_run(&[perfect], &[]);
        let comps: Vec<_> = (0..5).map(|_| comp(80.0)).collect();
        let two_sources_with_comps =
            score_run(&[adequate.clone(), adequate], &comps);

        assert!(two_sources_with_comps > one_source_no_comps);
    }

    #[test]
    fn test_run_score_empty_inputs() {
        assert_eq!(score_run(&[], &[]), 0);
    }

    #[test]
    fn test_comp_estimate_score() {
        assert_eq!(score_comp_estimate(&[]), 0);
        let comps: Vec<_> = (0..5).map(|_| comp(90.0)).collect();
        let few: Vec<_> = (0..2).map(|_| comp(90.0)).collect();
        assert!(score_comp_estimate(&comps) > score_comp_estimate(&few));
    }
}
