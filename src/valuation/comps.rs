//! Comparable selection and adjustment - similarity scoring, recency and
//! floor filtering, itemized dollar adjustments, ranking.

use crate::valuation::config::ComparableConfig;
use crate::valuation::types::{Adjustment, ComparableCandidate, SubjectProperty};
use chrono::Months;
use tracing::debug;

/// Score, adjust, filter, and rank a candidate pool against the subject.
///
/// Candidates below the similarity floor or outside the recency window
/// are excluded, never zero-weighted. An empty result is not an error -
/// the consensus engine treats "no comparables" as a data-quality signal.
pub fn select_and_adjust(
    subject: &SubjectProperty,
    candidate_pool: Vec<ComparableCandidate>,
    max_results: usize,
    config: &ComparableConfig,
) -> Vec<ComparableCandidate> {
    let cutoff = subject
        .as_of
        .checked_sub_months(Months::new(config.recency_months.max(0) as u32));

    let mut scored: Vec<ComparableCandidate> = candidate_pool
        .into_iter()
        .filter(|cand| match cutoff {
            Some(cutoff) => cand.sale_date >= cutoff && cand.sale_date <= subject.as_of,
            None => true,
        })
        .map(|mut cand| {
            cand.similarity_score = similarity(subject, &cand, config);
            cand.adjustments = adjustments(subject, &cand, config);
            cand.adjusted_price = cand.sale_price + cand.net_adjustment();
            cand
        })
        .filter(|cand| cand.similarity_score >= config.similarity_floor)
        .collect();

    // Highest similarity first, ties broken by shorter distance
    scored.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.distance_miles
                    .partial_cmp(&b.distance_miles)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    scored.truncate(max_results);

    debug!(
        subject = %subject.key,
        selected = scored.len(),
        "comparable selection complete"
    );

    scored
}

/// Similarity in [0, 100]: start at 100 and subtract weighted penalties
/// for each mismatch
pub fn similarity(
    subject: &SubjectProperty,
    cand: &ComparableCandidate,
    config: &ComparableConfig,
) -> f64 {
    let mut score = 100.0;

    score -= match (subject.bedrooms, cand.bedrooms) {
        (Some(s), Some(c)) => (s - c).abs() as f64 * config.bedroom_penalty,
        _ => config.missing_field_penalty,
    };

    score -= match (subject.bathrooms, cand.bathrooms) {
        (Some(s), Some(c)) => (s - c).abs() * config.bathroom_penalty,
        _ => config.missing_field_penalty,
    };

    score -= match (subject.square_feet, cand.square_feet) {
        (Some(s), Some(c)) if s > 0 => {
            let pct_diff = (s - c).abs() as f64 / s as f64 * 100.0;
            pct_diff * config.sqft_pct_penalty
        }
        _ => config.missing_field_penalty,
    };

    score -= match (subject.year_built, cand.year_built) {
        (Some(s), Some(c)) => (s - c).abs() as f64 * config.age_penalty,
        _ => config.missing_field_penalty,
    };

    // Distance curve: linear within a mile, steeper beyond
    let d = cand.distance_miles.max(0.0);
    score -= if d <= 1.0 {
        d * config.distance_near_penalty
    } else {
        config.distance_near_penalty + (d - 1.0) * config.distance_far_penalty
    };

    if cand.property_type != subject.property_type {
        score -= config.type_mismatch_penalty;
    }

    score.clamp(0.0, 100.0)
}

/// Translate each structural difference into a signed dollar amount.
/// Adjustments are itemized so the reasoning stays auditable.
pub fn adjustments(
    subject: &SubjectProperty,
    cand: &ComparableCandidate,
    config: &ComparableConfig,
) -> Vec<Adjustment> {
    let mut items = Vec::new();

    if let (Some(s), Some(c)) = (subject.bedrooms, cand.bedrooms) {
        let amount = (s - c) as i64 * config.per_bedroom_value;
        if amount != 0 {
            items.push(Adjustment {
                reason: "bedroom_count".to_string(),
                amount,
            });
        }
    }

    if let (Some(s), Some(c)) = (subject.bathrooms, cand.bathrooms) {
        let amount = ((s - c) * config.per_bathroom_value as f64).round() as i64;
        if amount != 0 {
            items.push(Adjustment {
                reason: "bathroom_count".to_string(),
                amount,
            });
        }
    }

    if let (Some(s), Some(c)) = (subject.square_feet, cand.square_feet) {
        let amount = (s - c) as i64 * config.per_sqft_value;
        if amount != 0 {
            items.push(Adjustment {
                reason: "square_footage".to_string(),
                amount,
            });
        }
    }

    if let (Some(s), Some(c)) = (subject.lot_size_sqft, cand.lot_size_sqft) {
        let amount = (s - c) as i64 * config.per_lot_sqft_value;
        if amount != 0 {
            items.push(Adjustment {
                reason: "lot_size".to_string(),
                amount,
            });
        }
    }

    if let (Some(s), Some(c)) = (subject.year_built, cand.year_built) {
        let amount = (s - c) as i64 * config.per_year_value;
        if amount != 0 {
            items.push(Adjustment {
                reason: "year_built".to_string(),
                amount,
            });
        }
    }

    // Project the comp's sale price to the subject's as-of date using the
    // market appreciation rate. An older sale adjusts upward.
    let days = (subject.as_of - cand.sale_date).num_days();
    if days != 0 {
        let years = days as f64 / 365.0;
        let amount =
            (cand.sale_price as f64 * config.annual_appreciation * years).round() as i64;
        if amount != 0 {
            items.push(Adjustment {
                reason: "time_of_sale".to_string(),
                amount,
            });
        }
    }

    items
}
