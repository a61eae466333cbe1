//! Coercion of human-formatted provider values into numbers.
//!
//! Providers return strings like "$450,000", "$2.5M", "3 bd", "1,500 sqft",
//! "3.5% - 4.5%", or sentinel words like "Variable" where numbers are
//! expected. Every ambiguous or sentinel value maps to None, never to zero,
//! so "missing data" stays distinct from "value is zero".

/// Sentinel words providers use for unknown values
const SENTINELS: &[&str] = &[
    "unknown",
    "n/a",
    "na",
    "none",
    "null",
    "variable",
    "undeterminable",
    "tbd",
    "--",
    "-",
    "",
];

pub fn is_sentinel(s: &str) -> bool {
    let lower = s.trim().to_lowercase();
    SENTINELS.contains(&lower.as_str())
}

/// Parse a currency string to whole dollars.
/// Handles "$450,000", "450000", "$2.5M", "450K".
pub fn parse_currency(raw: &str) -> Option<i64> {
    if is_sentinel(raw) {
        return None;
    }

    let cleaned = raw.trim().replace(['$', ','], "");
    let upper = cleaned.to_uppercase();

    if let Some(stripped) = upper.strip_suffix('M') {
        return stripped
            .trim()
            .parse::<f64>()
            .ok()
            .map(|v| (v * 1_000_000.0).round() as i64);
    }
    if let Some(stripped) = upper.strip_suffix('K') {
        return stripped
            .trim()
            .parse::<f64>()
            .ok()
            .map(|v| (v * 1_000.0).round() as i64);
    }

    cleaned.parse::<f64>().ok().map(|v| v.round() as i64)
}

/// Parse a plain numeric string, tolerating commas and a trailing percent
/// sign. Range strings like "3.5% - 4.5%" are ambiguous and map to None.
pub fn parse_number(raw: &str) -> Option<f64> {
    if is_sentinel(raw) {
        return None;
    }

    let cleaned = raw.trim().replace(',', "");
    let cleaned = cleaned.trim_end_matches('%').trim();
    if cleaned.is_empty() {
        return None;
    }

    // A dash after the first character means a range, not a negative sign
    if cleaned.chars().skip(1).any(|c| c == '-') {
        return None;
    }

    cleaned.parse::<f64>().ok()
}

/// Extract a leading count from strings like "3 bd" or "2.5 ba"
pub fn parse_count(raw: &str) -> Option<f64> {
    if is_sentinel(raw) {
        return None;
    }

    let cleaned = raw.trim().replace(',', "");
    let digits: String = cleaned
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok()
}

/// Parse square footage strings like "1,500 sqft"
pub fn parse_sqft(raw: &str) -> Option<i64> {
    parse_count(raw).map(|v| v.round() as i64).filter(|v| *v > 0)
}

/// Coerce a JSON value to a number, going through the string sanitizer
/// when the provider formatted the number as text
pub fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Coerce a JSON value to whole dollars
pub fn json_currency(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|v| v.round() as i64),
        serde_json::Value::String(s) => parse_currency(s),
        _ => None,
    }
}

/// Coerce a JSON value to a count (beds/baths style)
pub fn json_count(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_count(s),
        _ => None,
    }
}

const SQFT_PER_ACRE: f64 = 43_560.0;

pub fn acres_to_sqft(acres: f64) -> f64 {
    acres * SQFT_PER_ACRE
}
