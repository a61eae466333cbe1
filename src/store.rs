//! Persistence - append-only storage for facts and analysis runs in
//! PostgreSQL. Facts and runs are immutable; nothing here updates a row.

use crate::valuation::types::{
    AnalysisRun, ComparableCandidate, PropertyFact, PropertyType, SourceId, SubjectKey,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

/// Persist one normalized fact. Returns the new row id.
pub async fn insert_fact(db: &PgPool, fact: &PropertyFact) -> Result<i64> {
    let body = serde_json::to_string(fact)?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO property_facts (subject_key, source, observed_at, fact)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(fact.subject_key.canonical())
    .bind(fact.source.as_str())
    .bind(fact.observed_at)
    .bind(body)
    .fetch_one(db)
    .await?;

    debug!(source = %fact.source, subject = %fact.subject_key, id, "fact stored");
    Ok(id)
}

/// Most recently observed fact for (subject, source), if any
pub async fn latest_fact(
    db: &PgPool,
    key: &SubjectKey,
    source: SourceId,
) -> Result<Option<PropertyFact>> {
    let row = sqlx::query_as::<_, FactRow>(
        r#"
        SELECT subject_key, source, observed_at, fact
        FROM property_facts
        WHERE subject_key = $1 AND source = $2
        ORDER BY observed_at DESC
        LIMIT 1
        "#,
    )
    .bind(key.canonical())
    .bind(source.as_str())
    .fetch_optional(db)
    .await?;

    row.map(fact_from_row).transpose()
}

/// Every stored fact for (subject, source), oldest first
pub async fn fact_history(
    db: &PgPool,
    key: &SubjectKey,
    source: SourceId,
) -> Result<Vec<PropertyFact>> {
    let rows = sqlx::query_as::<_, FactRow>(
        r#"
        SELECT subject_key, source, observed_at, fact
        FROM property_facts
        WHERE subject_key = $1 AND source = $2
        ORDER BY observed_at ASC
        "#,
    )
    .bind(key.canonical())
    .bind(source.as_str())
    .fetch_all(db)
    .await?;

    rows.into_iter().map(fact_from_row).collect()
}

/// Persist a finished analysis run with its attempts and result
pub async fn insert_run(db: &PgPool, run: &AnalysisRun) -> Result<()> {
    let body = serde_json::to_string(run)?;

    sqlx::query(
        r#"
        INSERT INTO analysis_runs (id, subject_key, status, started_at, completed_at, cost_estimate, run)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(run.id)
    .bind(run.subject_key.canonical())
    .bind(run.status.to_string())
    .bind(run.started_at)
    .bind(run.completed_at)
    .bind(run.cost_estimate)
    .bind(body)
    .execute(db)
    .await?;

    info!(run_id = %run.id, status = %run.status, "analysis run stored");
    Ok(())
}

/// Most recent runs for a subject, newest first
pub async fn recent_runs(db: &PgPool, key: &SubjectKey, limit: i64) -> Result<Vec<AnalysisRun>> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT run
        FROM analysis_runs
        WHERE subject_key = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#,
    )
    .bind(key.canonical())
    .bind(limit)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(run_from_row).collect()
}

/// Recorded sales near the subject, used as the comparable candidate
/// pool. Similarity and adjustments are computed by the selector, not
/// stored.
pub async fn comparable_pool(db: &PgPool, key: &SubjectKey) -> Result<Vec<ComparableCandidate>> {
    let rows = sqlx::query_as::<_, CompRow>(
        r#"
        SELECT address, sale_price, sale_date, distance_miles, bedrooms, bathrooms,
               square_feet, lot_size_sqft, year_built, property_type, data_source
        FROM comparable_sales
        WHERE postal_code = $1
        ORDER BY sale_date DESC
        "#,
    )
    .bind(&key.postal_code)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(comp_from_row).collect()
}

#[derive(sqlx::FromRow)]
struct CompRow {
    address: String,
    sale_price: i64,
    sale_date: NaiveDate,
    distance_miles: f64,
    bedrooms: Option<i32>,
    bathrooms: Option<f64>,
    square_feet: Option<i32>,
    lot_size_sqft: Option<i32>,
    year_built: Option<i32>,
    property_type: String,
    data_source: String,
}

fn comp_from_row(row: CompRow) -> Result<ComparableCandidate> {
    let data_source = SourceId::from_str(&row.data_source)
        .ok_or_else(|| anyhow!("unknown data source {}", row.data_source))?;

    Ok(ComparableCandidate {
        address: row.address,
        sale_price: row.sale_price,
        sale_date: row.sale_date,
        distance_miles: row.distance_miles,
        bedrooms: row.bedrooms,
        bathrooms: row.bathrooms,
        square_feet: row.square_feet,
        lot_size_sqft: row.lot_size_sqft,
        year_built: row.year_built,
        property_type: PropertyType::parse(&row.property_type),
        data_source,
        similarity_score: 0.0,
        adjustments: Vec::new(),
        adjusted_price: row.sale_price,
    })
}

#[derive(sqlx::FromRow)]
struct FactRow {
    subject_key: String,
    source: String,
    observed_at: DateTime<Utc>,
    fact: String,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run: String,
}

fn fact_from_row(row: FactRow) -> Result<PropertyFact> {
    let fact: PropertyFact = serde_json::from_str(&row.fact)?;

    // The index columns are derived from the body; disagreement means the
    // row was tampered with or written by incompatible code
    if SourceId::from_str(&row.source) != Some(fact.source) {
        return Err(anyhow!(
            "stored fact source {} does not match body {}",
            row.source,
            fact.source
        ));
    }
    if row.subject_key != fact.subject_key.canonical() {
        return Err(anyhow!(
            "stored fact key {} does not match body {}",
            row.subject_key,
            fact.subject_key.canonical()
        ));
    }
    if row.observed_at != fact.observed_at {
        return Err(anyhow!("stored fact timestamp does not match body"));
    }

    Ok(fact)
}

fn run_from_row(row: RunRow) -> Result<AnalysisRun> {
    Ok(serde_json::from_str(&row.run)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::types::RunStatus;

    fn fact() -> PropertyFact {
        PropertyFact {
            source: SourceId::RegistryApi,
            subject_key: SubjectKey::new("123 Main St", "Denver", "CO", "80211"),
            fields: Default::default(),
            raw_payload: serde_json::json!({"status": {"code": 0}}),
            observed_at: "2025-06-01T12:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_fact_row_roundtrip() {
        let fact = fact();
        let row = FactRow {
            subject_key: fact.subject_key.canonical(),
            source: fact.source.as_str().to_string(),
            observed_at: fact.observed_at,
            fact: serde_json::to_string(&fact).unwrap(),
        };

        let restored = fact_from_row(row).unwrap();
        assert_eq!(restored.source, fact.source);
        assert_eq!(restored.subject_key, fact.subject_key);
        assert_eq!(restored.raw_payload, fact.raw_payload);
    }

    #[test]
    fn test_fact_row_source_mismatch_rejected() {
        let fact = fact();
        let row = FactRow {
            subject_key: fact.subject_key.canonical(),
            source: "scrape_listing_a".to_string(),
            observed_at: fact.observed_at,
            fact: serde_json::to_string(&fact).unwrap(),
        };

        assert!(fact_from_row(row).is_err());
    }

    #[test]
    fn test_comp_row_parses_type_and_source() {
        let row = CompRow {
            address: "2 Oak St".to_string(),
            sale_price: 440_000,
            sale_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            distance_miles: 0.4,
            bedrooms: Some(3),
            bathrooms: Some(2.0),
            square_feet: Some(1450),
            lot_size_sqft: None,
            year_built: Some(1988),
            property_type: "Single Family Residence".to_string(),
            data_source: "registry_api".to_string(),
        };

        let comp = comp_from_row(row).unwrap();
        assert_eq!(comp.property_type, PropertyType::SingleFamily);
        assert_eq!(comp.data_source, SourceId::RegistryApi);
        assert_eq!(comp.adjusted_price, 440_000);
        assert!(comp.adjustments.is_empty());
    }

    #[test]
    fn test_comp_row_unknown_source_rejected() {
        let row = CompRow {
            address: "2 Oak St".to_string(),
            sale_price: 440_000,
            sale_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            distance_miles: 0.4,
            bedrooms: None,
            bathrooms: None,
            square_feet: None,
            lot_size_sqft: None,
            year_built: None,
            property_type: "condo".to_string(),
            data_source: "mystery_feed".to_string(),
        };

        assert!(comp_from_row(row).is_err());
    }

    #[test]
    fn test_run_row_roundtrip() {
        let run = AnalysisRun {
            id: uuid::Uuid::new_v4(),
            subject_key: SubjectKey::new("123 Main St", "Denver", "CO", "80211"),
            started_at: Utc::now(),
            completed_at: None,
            attempts: Vec::new(),
            cost_estimate: 0.07,
            status: RunStatus::Completed,
            error_detail: None,
            result: None,
        };
        let row = RunRow {
            run: serde_json::to_string(&run).unwrap(),
        };

        let restored = run_from_row(row).unwrap();
        assert_eq!(restored.id, run.id);
        assert_eq!(restored.status, RunStatus::Completed);
    }
}
