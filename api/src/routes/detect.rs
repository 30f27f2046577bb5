//! Upload endpoints that run the classifier and record a scan

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::post,
};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::content_filter::{LabelScore, round3};
use crate::domain::scans::{self, Detection, NewScan};
use crate::media;
use crate::services::detection;
use crate::services::error::{ApiError, LogErr};
use crate::uploads::{self, MediaKind, UploadError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", post(upload))
        .route("/upload-image", post(upload_image))
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    scan_id: i64,
    filename: String,
    duration_seconds: Option<f64>,
    nsfw_results: Vec<Detection>,
}

/// POST /upload - Sample and classify an uploaded video, persisting the detections
async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let file = uploads::read_upload(multipart).await?.file;

    let (duration_secs, detections) = match file.kind {
        MediaKind::Video => {
            let duration =
                media::probe_duration(&state.config.ffprobe_path, &file.path).await?;
            let detections =
                detection::scan_video(&state.classifier, &file.path, &state.config).await?;
            (Some(duration), detections)
        }
        // A still image is a one-frame scan at t=0
        MediaKind::Image => {
            let data = tokio::fs::read(&file.path)
                .await
                .log_500("[upload] Failed to read upload")?;
            let prediction = detection::classify_image(&state.classifier, data).await?;
            let detections = vec![Detection {
                timestamp_secs: 0.0,
                confidence: round3(prediction.nsfw),
            }];
            (None, detections)
        }
    };

    let mut tx = state.db.begin().await?;
    let scan_id = scans::create_scan(
        &mut *tx,
        &NewScan {
            filename: &file.filename,
            media_type: file.kind.as_str(),
            duration_secs,
            sample_interval_secs: state.config.sample_interval_secs,
            model: state.classifier.name(),
        },
    )
    .await?;
    scans::insert_detections(&mut *tx, scan_id, &detections).await?;
    tx.commit().await?;

    let flagged = detections
        .iter()
        .filter(|d| d.confidence >= state.config.nsfw_threshold)
        .count();
    log::info!(
        "[upload] Scan {} of {} ({} bytes): {} frames, {} flagged",
        scan_id,
        file.filename,
        file.size,
        detections.len(),
        flagged
    );

    Ok(Json(UploadResponse {
        scan_id,
        filename: file.filename.clone(),
        duration_seconds: duration_secs,
        nsfw_results: detections,
    }))
}

#[derive(Debug, Serialize)]
struct ImageResponse {
    result: Vec<LabelScore>,
}

/// POST /upload-image - Classify a single image without recording a scan
async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ImageResponse>, ApiError> {
    let file = uploads::read_upload(multipart).await?.file;

    if file.kind != MediaKind::Image {
        return Err(UploadError::Unsupported(file.content_type.clone()).into());
    }

    let data = tokio::fs::read(&file.path)
        .await
        .log_500("[upload] Failed to read upload")?;
    let prediction = detection::classify_image(&state.classifier, data).await?;

    Ok(Json(ImageResponse {
        result: prediction.ranked(),
    }))
}
