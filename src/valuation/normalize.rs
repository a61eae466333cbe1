//! Normalizers - map each provider's raw response to a canonical
//! PropertyFact. One normalizer per source, all producing the same shape.

use crate::valuation::error::SourceError;
use crate::valuation::sanitize;
use crate::valuation::types::{
    FactField, FieldName, FieldValue, PropertyFact, SourceId, SubjectKey,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Confidence assigned to fields parsed cleanly from the structured
/// registry API
const REGISTRY_CONFIDENCE: f64 = 1.0;

/// Confidence assigned to fields recovered from scraped listing pages
const SCRAPED_CONFIDENCE: f64 = 0.8;

/// Default confidence for AI-derived fields when the producer does not
/// report its own
const AI_DEFAULT_CONFIDENCE: f64 = 0.5;

/// Convert a provider's raw response into a PropertyFact.
///
/// Returns SourceError::Unavailable when the response is not valid
/// structured data at all - "source could not be reached" is distinct
/// from "source had nothing to say".
pub fn normalize(
    raw: &Value,
    source: SourceId,
    key: &SubjectKey,
    observed_at: DateTime<Utc>,
) -> Result<PropertyFact, SourceError> {
    let fields = match source {
        SourceId::RegistryApi => normalize_registry(raw, observed_at)?,
        SourceId::ScrapeListingA | SourceId::ScrapeListingB | SourceId::ScrapeListingC => {
            normalize_listing(raw, observed_at)?
        }
        SourceId::AiMeasurement => normalize_ai_measurement(raw, observed_at)?,
    };

    debug!(
        source = %source,
        subject = %key,
        field_count = fields.len(),
        "normalized source response"
    );

    Ok(PropertyFact {
        source,
        subject_key: key.clone(),
        fields,
        raw_payload: raw.clone(),
        observed_at,
    })
}

type Fields = BTreeMap<FieldName, FactField>;

fn put_number(fields: &mut Fields, name: FieldName, value: f64, confidence: f64, at: DateTime<Utc>) {
    fields.insert(
        name,
        FactField {
            value: FieldValue::Number(value),
            confidence,
            observed_at: at,
        },
    );
}

fn put_date(fields: &mut Fields, name: FieldName, value: NaiveDate, confidence: f64, at: DateTime<Utc>) {
    fields.insert(
        name,
        FactField {
            value: FieldValue::Date(value),
            confidence,
            observed_at: at,
        },
    );
}

/// Registry/AVM provider: nested JSON with building/lot/sale/assessment
/// groups and an optional AVM block
fn normalize_registry(raw: &Value, at: DateTime<Utc>) -> Result<Fields, SourceError> {
    let status_code = raw
        .pointer("/status/code")
        .and_then(Value::as_i64)
        .unwrap_or(-1);
    if status_code != 0 {
        let msg = raw
            .pointer("/status/msg")
            .and_then(Value::as_str)
            .unwrap_or("registry returned non-zero status");
        return Err(SourceError::Unavailable(msg.to_string()));
    }

    let prop = raw
        .get("property")
        .filter(|p| p.is_object())
        .ok_or_else(|| SourceError::Unavailable("property not found in registry".to_string()))?;

    let mut fields = Fields::new();
    let c = REGISTRY_CONFIDENCE;

    if let Some(v) = prop.pointer("/building/rooms/beds").and_then(sanitize::json_count) {
        put_number(&mut fields, FieldName::Bedrooms, v, c, at);
    }
    if let Some(v) = prop.pointer("/building/rooms/bathstotal").and_then(sanitize::json_count) {
        put_number(&mut fields, FieldName::Bathrooms, v, c, at);
    }
    if let Some(v) = prop.pointer("/building/size/universalsize").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::SquareFeet, v, c, at);
    }
    if let Some(v) = prop.pointer("/building/summary/yearbuilt").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::YearBuilt, v, c, at);
    }

    // Lot size arrives in acres; canonical unit is square feet
    if let Some(acres) = prop.pointer("/lot/lotsize_acres").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::LotSize, sanitize::acres_to_sqft(acres), c, at);
    } else if let Some(sqft) = prop.pointer("/lot/lotsize_sqft").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::LotSize, sqft, c, at);
    }

    if let Some(v) = prop.pointer("/sale/sale_amount").and_then(sanitize::json_currency) {
        put_number(&mut fields, FieldName::LastSalePrice, v as f64, c, at);
    }
    if let Some(d) = prop
        .pointer("/sale/sale_date")
        .and_then(Value::as_str)
        .and_then(parse_iso_date)
    {
        put_date(&mut fields, FieldName::LastSaleDate, d, c, at);
    }
    if let Some(v) = prop.pointer("/assessment/assessed_value").and_then(sanitize::json_currency) {
        put_number(&mut fields, FieldName::AssessedValue, v as f64, c, at);
    }

    if let Some(avm) = prop.get("avm") {
        // Registry reports its own AVM confidence on a 0-100 scale
        let avm_conf = avm
            .get("confidence")
            .and_then(sanitize::json_number)
            .map(|s| (s / 100.0).clamp(0.0, 1.0))
            .unwrap_or(c);

        if let Some(v) = avm.get("amount").and_then(sanitize::json_currency) {
            put_number(&mut fields, FieldName::EstimatedValue, v as f64, avm_conf, at);
        }
        if let Some(v) = avm.get("low").and_then(sanitize::json_currency) {
            put_number(&mut fields, FieldName::EstimatedValueLow, v as f64, avm_conf, at);
        }
        if let Some(v) = avm.get("high").and_then(sanitize::json_currency) {
            put_number(&mut fields, FieldName::EstimatedValueHigh, v as f64, avm_conf, at);
        }
    }

    Ok(fields)
}

/// Scraped listing source: flat JSON of human-formatted strings
/// ("$450,000", "3 bd", "1,500 sqft"). Sentinels map to missing fields.
fn normalize_listing(raw: &Value, at: DateTime<Utc>) -> Result<Fields, SourceError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| SourceError::Unavailable("listing response is not an object".to_string()))?;

    if let Some(err) = obj.get("error").and_then(Value::as_str) {
        return Err(SourceError::Unavailable(err.to_string()));
    }
    if obj.get("blocked").and_then(Value::as_bool) == Some(true) {
        return Err(SourceError::Unavailable("scrape blocked by target site".to_string()));
    }

    let mut fields = Fields::new();
    let c = SCRAPED_CONFIDENCE;

    if let Some(v) = obj.get("price").and_then(sanitize::json_currency) {
        put_number(&mut fields, FieldName::ListingPrice, v as f64, c, at);
    }
    if let Some(v) = obj.get("estimate").and_then(sanitize::json_currency) {
        put_number(&mut fields, FieldName::EstimatedValue, v as f64, c, at);
    }
    if let Some(v) = obj.get("beds").and_then(sanitize::json_count) {
        put_number(&mut fields, FieldName::Bedrooms, v, c, at);
    }
    if let Some(v) = obj.get("baths").and_then(sanitize::json_count) {
        put_number(&mut fields, FieldName::Bathrooms, v, c, at);
    }
    if let Some(v) = obj.get("sqft").and_then(sanitize::json_count) {
        put_number(&mut fields, FieldName::SquareFeet, v, c, at);
    }
    if let Some(v) = obj.get("lot_size_sqft").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::LotSize, v, c, at);
    }
    if let Some(v) = obj.get("year_built").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::YearBuilt, v, c, at);
    }
    if let Some(v) = obj.get("walk_score").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::WalkScore, v, c, at);
    }
    if let Some(v) = obj.get("transit_score").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::TransitScore, v, c, at);
    }
    if let Some(v) = obj.get("days_on_market").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::DaysOnMarket, v, c, at);
    }
    if let Some(v) = obj.get("appreciation_rate").and_then(sanitize::json_number) {
        put_number(&mut fields, FieldName::AppreciationRate, v, c, at);
    }
    if let Some(d) = obj
        .get("last_sale_date")
        .and_then(Value::as_str)
        .and_then(parse_iso_date)
    {
        put_date(&mut fields, FieldName::LastSaleDate, d, c, at);
    }
    if let Some(v) = obj.get("last_sale_price").and_then(sanitize::json_currency) {
        put_number(&mut fields, FieldName::LastSalePrice, v as f64, c, at);
    }
    if let Some(amenities) = obj.get("amenities").and_then(Value::as_array) {
        if !amenities.is_empty() {
            put_number(&mut fields, FieldName::AmenityCount, amenities.len() as f64, c, at);
        }
    }

    Ok(fields)
}

/// AI floor-plan measurement producer: total square feet plus per-room
/// data, with the producer's own confidence when reported
fn normalize_ai_measurement(raw: &Value, at: DateTime<Utc>) -> Result<Fields, SourceError> {
    let obj = raw.as_object().ok_or_else(|| {
        SourceError::Unavailable("measurement response is not an object".to_string())
    })?;

    if let Some(err) = obj.get("error").and_then(Value::as_str) {
        return Err(SourceError::Unavailable(err.to_string()));
    }

    // Use the producer's confidence directly; otherwise fall back to the
    // mid-band default for AI-inferred values
    let c = obj
        .get("confidence")
        .and_then(sanitize::json_number)
        .unwrap_or(AI_DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    let mut fields = Fields::new();

    if let Some(v) = obj.get("total_square_feet").and_then(sanitize::json_count) {
        if v > 0.0 {
            put_number(&mut fields, FieldName::SquareFeet, v, c, at);
        }
    }
    if let Some(v) = obj.get("bedrooms").and_then(sanitize::json_count) {
        put_number(&mut fields, FieldName::Bedrooms, v, c, at);
    }
    if let Some(v) = obj.get("bathrooms").and_then(sanitize::json_count) {
        put_number(&mut fields, FieldName::Bathrooms, v, c, at);
    }

    Ok(fields)
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
