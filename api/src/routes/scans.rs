//! Read access to recorded scans

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::domain::scans::{self, Detection, Scan};
use crate::segments::{self, Segment};
use crate::services::detection;
use crate::services::error::ApiError;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scans", get(list_scans))
        .route("/scans/{id}", get(get_scan))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

/// GET /scans - Most recent scans first
async fn list_scans(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Scan>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    Ok(Json(scans::list_scans(&state.db, limit).await?))
}

#[derive(Debug, Deserialize)]
struct ScanQuery {
    threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ScanDetail {
    #[serde(flatten)]
    scan: Scan,
    threshold: f32,
    nsfw_results: Vec<Detection>,
    segments: Vec<Segment>,
}

/// GET /scans/{id} - A scan with its detections and the blur segments they produce
async fn get_scan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<i64>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<ScanDetail>, ApiError> {
    let threshold = query.threshold.unwrap_or(state.config.nsfw_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ApiError::BadRequest(
            "threshold must be a number between 0 and 1".into(),
        ));
    }

    let scan = scans::get_scan(&state.db, scan_id)
        .await?
        .ok_or(ApiError::NotFound("Scan"))?;
    let detections = scans::list_detections(&state.db, scan_id).await?;

    let mut blur = detection::blur_segments(&detections, threshold, &state.config)?;
    if let Some(duration) = scan.duration_secs {
        blur = segments::clamp_to(blur, duration);
    }

    Ok(Json(ScanDetail {
        scan,
        threshold,
        nsfw_results: detections,
        segments: blur,
    }))
}
