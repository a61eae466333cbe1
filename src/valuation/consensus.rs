//! Valuation consensus - reconcile the registry AVM, the comparable-based
//! estimate, and any AI narrative estimate into one value range with a
//! confidence label and a data-quality score.

use crate::valuation::config::ConsensusConfig;
use crate::valuation::quality;
use crate::valuation::types::{
    ComparableCandidate, ConfidenceLevel, EstimateOrigin, FieldName, PriceEstimate,
    PropertyFact, SourceId, SourceWeight, SubjectKey, ValuationResult,
};
use chrono::Utc;
use tracing::{debug, info};

/// One independent price signal entering the blend
struct PointEstimate {
    origin: EstimateOrigin,
    value: f64,
    range_low: Option<f64>,
    range_high: Option<f64>,
    /// The contributing source's own data-quality score, used as the
    /// blend weight
    quality: f64,
}

/// Merge all available price signals into a single ValuationResult.
///
/// Never fabricates a number: with no price signal at all the result
/// carries a null estimate, Low confidence, and a zero quality score.
pub fn reconcile(
    subject_key: &SubjectKey,
    facts: &[PropertyFact],
    comparables: Vec<ComparableCandidate>,
    ai_narrative_estimate: Option<PriceEstimate>,
    config: &ConsensusConfig,
) -> ValuationResult {
    let estimates = collect_estimates(facts, &comparables, ai_narrative_estimate.as_ref());
    let data_quality_score = quality::score_run(facts, &comparables);

    if estimates.is_empty() {
        info!(subject = %subject_key, "no pricing data from any source");
        return ValuationResult {
            subject_key: subject_key.clone(),
            estimated_value: None,
            value_range_low: None,
            value_range_high: None,
            confidence_level: ConfidenceLevel::Low,
            data_quality_score: 0,
            contributing_sources: Vec::new(),
            comparables_used: comparables,
            reasoning: format!(
                "No pricing data was available for {} from any source; no estimate produced.",
                subject_key
            ),
            created_at: Utc::now(),
        };
    }

    let (estimated_value, range_low, range_high) = blend(&estimates, config);
    let dispersion = coefficient_of_variation(&estimates);
    let confidence_level = confidence(&estimates, dispersion, config);

    let total_weight: f64 = estimates.iter().map(|e| e.quality).sum();
    let mut contributing_sources: Vec<SourceWeight> = estimates
        .iter()
        .map(|e| SourceWeight {
            origin: e.origin,
            weight: if total_weight > 0.0 {
                e.quality / total_weight
            } else {
                1.0 / estimates.len() as f64
            },
        })
        .collect();
    contributing_sources
        .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));

    let reasoning = build_reasoning(
        &estimates,
        &comparables,
        estimated_value,
        dispersion,
        config,
    );

    debug!(
        subject = %subject_key,
        estimate = estimated_value,
        confidence = %confidence_level,
        sources = estimates.len(),
        "consensus complete"
    );

    ValuationResult {
        subject_key: subject_key.clone(),
        estimated_value: Some(estimated_value),
        value_range_low: Some(range_low),
        value_range_high: Some(range_high),
        confidence_level,
        data_quality_score,
        contributing_sources,
        comparables_used: comparables,
        reasoning,
        created_at: Utc::now(),
    }
}

fn collect_estimates(
    facts: &[PropertyFact],
    comparables: &[ComparableCandidate],
    ai_estimate: Option<&PriceEstimate>,
) -> Vec<PointEstimate> {
    let mut estimates = Vec::new();

    // Authoritative AVM from the registry fact, if present
    if let Some(registry) = facts.iter().find(|f| f.source == SourceId::RegistryApi) {
        if let Some(value) = registry.number(FieldName::EstimatedValue) {
            estimates.push(PointEstimate {
                origin: EstimateOrigin::Avm,
                value,
                range_low: registry.number(FieldName::EstimatedValueLow),
                range_high: registry.number(FieldName::EstimatedValueHigh),
                quality: quality::score_fact(registry) as f64,
            });
        }
    }

    // Similarity-weighted mean of adjusted comp prices
    if let Some(value) = comp_estimate(comparables) {
        estimates.push(PointEstimate {
            origin: EstimateOrigin::Comparables,
            value,
            range_low: None,
            range_high: None,
            quality: quality::score_comp_estimate(comparables) as f64,
        });
    }

    // AI narrative estimate, never trusted alone with high confidence
    if let Some(ai) = ai_estimate {
        estimates.push(PointEstimate {
            origin: EstimateOrigin::AiNarrative,
            value: ai.value as f64,
            range_low: ai.range_low.map(|v| v as f64),
            range_high: ai.range_high.map(|v| v as f64),
            quality: (ai.confidence.clamp(0.0, 1.0) * 100.0).max(1.0),
        });
    }

    estimates
}

/// Confidence-weighted mean of adjusted prices, weight = similarity / 100
fn comp_estimate(comparables: &[ComparableCandidate]) -> Option<f64> {
    if comparables.is_empty() {
        return None;
    }
    let total_weight: f64 = comparables.iter().map(|c| c.similarity_score / 100.0).sum();
    if total_weight <= 0.0 {
        return None;
    }
    let weighted_sum: f64 = comparables
        .iter()
        .map(|c| c.adjusted_price as f64 * (c.similarity_score / 100.0))
        .sum();
    Some(weighted_sum / total_weight)
}

/// Weighted average plus a range bounding the spread of the underlying
/// estimates - never narrower than the most divergent contributor
fn blend(estimates: &[PointEstimate], config: &ConsensusConfig) -> (i64, i64, i64) {
    let total_weight: f64 = estimates.iter().map(|e| e.quality).sum();
    let value = if total_weight > 0.0 {
        estimates.iter().map(|e| e.value * e.quality).sum::<f64>() / total_weight
    } else {
        estimates.iter().map(|e| e.value).sum::<f64>() / estimates.len() as f64
    };

    let mut low = f64::MAX;
    let mut high = f64::MIN;
    for e in estimates {
        low = low.min(e.range_low.unwrap_or(e.value)).min(e.value);
        high = high.max(e.range_high.unwrap_or(e.value)).max(e.value);
    }

    // A lone estimate with no range of its own gets the configured spread
    if estimates.len() == 1 {
        low = low.min(value * (1.0 - config.single_source_range_pct));
        high = high.max(value * (1.0 + config.single_source_range_pct));
        if let Some(l) = estimates[0].range_low {
            low = l.min(value);
        }
        if let Some(h) = estimates[0].range_high {
            high = h.max(value);
        }
    }

    let value = value.round() as i64;
    let low = low.round().min(value as f64) as i64;
    let high = high.round().max(value as f64) as i64;
    (value, low, high)
}

/// Population coefficient of variation across point estimates
fn coefficient_of_variation(estimates: &[PointEstimate]) -> f64 {
    if estimates.len() < 2 {
        return 0.0;
    }
    let mean = estimates.iter().map(|e| e.value).sum::<f64>() / estimates.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = estimates
        .iter()
        .map(|e| (e.value - mean).powi(2))
        .sum::<f64>()
        / estimates.len() as f64;
    variance.sqrt() / mean
}

/// Deterministic confidence label.
/// A single source can never justify High, regardless of magnitude, and
/// neither can a pair of weak ones - agreement between two thin signals
/// is corroboration, not certainty.
fn confidence(
    estimates: &[PointEstimate],
    dispersion: f64,
    config: &ConsensusConfig,
) -> ConfidenceLevel {
    if estimates.len() < 2 {
        return ConfidenceLevel::Medium;
    }

    let label = if dispersion <= config.agreement_tolerance {
        ConfidenceLevel::High
    } else if dispersion <= config.agreement_tolerance * 2.0 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    };

    let weak_pair = estimates.len() == 2
        && estimates
            .iter()
            .all(|e| e.quality < config.weak_quality_threshold);
    if weak_pair {
        label.min(ConfidenceLevel::Medium)
    } else {
        label
    }
}

/// Tie the number back to the actual inputs: comp count, net adjustment
/// direction, and whether the independent signals agreed
fn build_reasoning(
    estimates: &[PointEstimate],
    comparables: &[ComparableCandidate],
    estimated_value: i64,
    dispersion: f64,
    config: &ConsensusConfig,
) -> String {
    let mut parts = Vec::new();

    let names: Vec<String> = estimates.iter().map(|e| e.origin.to_string()).collect();
    parts.push(format!(
        "Estimated ${} from {} price signal{} ({}).",
        estimated_value,
        estimates.len(),
        if estimates.len() == 1 { "" } else { "s" },
        names.join(", ")
    ));

    if comparables.is_empty() {
        parts.push("No usable comparable sales were found.".to_string());
    } else {
        let net: i64 = comparables.iter().map(|c| c.net_adjustment()).sum();
        let direction = if net > 0 {
            "upward"
        } else if net < 0 {
            "downward"
        } else {
            "neutral"
        };
        parts.push(format!(
            "{} comparable sale{} used with a net {} adjustment of ${}.",
            comparables.len(),
            if comparables.len() == 1 { "" } else { "s" },
            direction,
            net.abs()
        ));
    }

    if estimates.len() >= 2 {
        if dispersion <= config.agreement_tolerance {
            parts.push(format!(
                "Sources agree within {:.1}% of each other.",
                dispersion * 100.0
            ));
        } else {
            parts.push(format!(
                "Sources diverge by {:.1}%, widening the value range.",
                dispersion * 100.0
            ));
        }
    } else {
        parts.push("Single-source estimate; confidence capped at Medium.".to_string());
    }

    parts.join(" ")
}
