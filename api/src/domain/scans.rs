//! Scan domain - DB queries for scans and their detections
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Postgres};

/// One analysis run over an uploaded file
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Scan {
    pub id: i64,
    pub filename: String,
    pub media_type: String,
    pub duration_secs: Option<f64>,
    pub sample_interval_secs: f64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Classifier output for a single sampled frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Detection {
    #[serde(rename = "timestamp")]
    pub timestamp_secs: f64,
    pub confidence: f32,
}

pub struct NewScan<'a> {
    pub filename: &'a str,
    pub media_type: &'a str,
    pub duration_secs: Option<f64>,
    pub sample_interval_secs: f64,
    pub model: &'a str,
}

/// Split detections into the parallel columns used by UNNEST inserts and
/// segment building
pub fn columns(detections: &[Detection]) -> (Vec<f64>, Vec<f32>) {
    detections
        .iter()
        .map(|d| (d.timestamp_secs, d.confidence))
        .unzip()
}

/// Insert a scan row, returning its id
pub async fn create_scan<'e, E>(executor: E, scan: &NewScan<'_>) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO scans (filename, media_type, duration_secs, sample_interval_secs, model)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(scan.filename)
    .bind(scan.media_type)
    .bind(scan.duration_secs)
    .bind(scan.sample_interval_secs)
    .bind(scan.model)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// Bulk insert detections for a scan
pub async fn insert_detections<'e, E>(
    executor: E,
    scan_id: i64,
    detections: &[Detection],
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if detections.is_empty() {
        return Ok(0);
    }

    let (timestamps, confidences) = columns(detections);

    let result = sqlx::query(
        r#"
        INSERT INTO detections (scan_id, timestamp_secs, confidence)
        SELECT $1, t, c
        FROM UNNEST($2::float8[], $3::float4[]) AS d(t, c)
        "#,
    )
    .bind(scan_id)
    .bind(timestamps)
    .bind(confidences)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_scan<'e, E>(executor: E, scan_id: i64) -> Result<Option<Scan>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, filename, media_type, duration_secs, sample_interval_secs, model, created_at
        FROM scans
        WHERE id = $1
        "#,
    )
    .bind(scan_id)
    .fetch_optional(executor)
    .await
}

/// Most recent scan, used when a render request names none
pub async fn latest_scan<'e, E>(executor: E) -> Result<Option<Scan>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, filename, media_type, duration_secs, sample_interval_secs, model, created_at
        FROM scans
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(executor)
    .await
}

pub async fn list_scans<'e, E>(executor: E, limit: i64) -> Result<Vec<Scan>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, filename, media_type, duration_secs, sample_interval_secs, model, created_at
        FROM scans
        ORDER BY created_at DESC, id DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await
}

/// Detections for a scan in timestamp order
pub async fn list_detections<'e, E>(
    executor: E,
    scan_id: i64,
) -> Result<Vec<Detection>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT timestamp_secs, confidence
        FROM detections
        WHERE scan_id = $1
        ORDER BY timestamp_secs ASC
        "#,
    )
    .bind(scan_id)
    .fetch_all(executor)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_serializes_with_wire_names() {
        let json = serde_json::to_value(Detection {
            timestamp_secs: 4.0,
            confidence: 0.5,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"timestamp": 4.0, "confidence": 0.5}));
    }

    #[test]
    fn columns_keep_pairs_aligned() {
        let (timestamps, confidences) = columns(&[
            Detection {
                timestamp_secs: 0.0,
                confidence: 0.25,
            },
            Detection {
                timestamp_secs: 2.0,
                confidence: 0.75,
            },
        ]);
        assert_eq!(timestamps, vec![0.0, 2.0]);
        assert_eq!(confidences, vec![0.25, 0.75]);
    }
}
