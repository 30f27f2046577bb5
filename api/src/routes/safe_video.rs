//! Renders a blurred copy of an uploaded video from a recorded scan

use axum::{
    Router,
    extract::{Multipart, State},
    http::header,
    response::IntoResponse,
    routing::post,
};
use std::sync::Arc;

use crate::AppState;
use crate::constants::{SAFE_VIDEO_DISPOSITION, SAFE_VIDEO_FILENAME};
use crate::domain::scans;
use crate::media;
use crate::segments;
use crate::services::detection;
use crate::services::error::{ApiError, LogErr};
use crate::uploads::{self, MediaKind, UploadError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/generate-safe-video", post(generate_safe_video))
}

/// Optional `threshold` form field, falling back to the configured default
fn parse_threshold(raw: Option<&String>, default: f32) -> Result<f32, ApiError> {
    match raw.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(s) => s
            .parse::<f32>()
            .ok()
            .filter(|v| (0.0..=1.0).contains(v))
            .ok_or_else(|| ApiError::BadRequest("threshold must be a number between 0 and 1".into())),
    }
}

fn parse_scan_id(raw: Option<&String>) -> Result<Option<i64>, ApiError> {
    match raw.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest("scan_id must be an integer".into())),
    }
}

/// POST /generate-safe-video - Blur the flagged ranges of the uploaded video
///
/// Detections come from `scan_id` when given, otherwise from the most recent
/// scan. With no scan on record the video is re-encoded unblurred.
async fn generate_safe_video(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = uploads::read_upload(multipart).await?;
    let file = &form.file;

    if file.kind != MediaKind::Video {
        return Err(UploadError::Unsupported(file.content_type.clone()).into());
    }

    let threshold = parse_threshold(form.fields.get("threshold"), state.config.nsfw_threshold)?;
    let scan = match parse_scan_id(form.fields.get("scan_id"))? {
        Some(id) => Some(
            scans::get_scan(&state.db, id)
                .await?
                .ok_or(ApiError::NotFound("Scan"))?,
        ),
        None => scans::latest_scan(&state.db).await?,
    };

    let detections = match &scan {
        Some(scan) => scans::list_detections(&state.db, scan.id).await?,
        None => {
            log::warn!("[safe_video] No scans recorded, rendering without blur");
            Vec::new()
        }
    };

    let mut blur = detection::blur_segments(&detections, threshold, &state.config)?;
    match media::probe_duration(&state.config.ffprobe_path, &file.path).await {
        Ok(duration) => blur = segments::clamp_to(blur, duration),
        Err(e) => log::warn!("[safe_video] Could not probe {}: {}", file.filename, e),
    }

    let out_dir = file
        .path
        .parent()
        .map(|p| p.join("render"))
        .ok_or_else(|| ApiError::BadRequest("upload has no parent directory".into()))?;
    tokio::fs::create_dir_all(&out_dir)
        .await
        .log_500("[safe_video] Failed to create render dir")?;
    let output_path = out_dir.join(SAFE_VIDEO_FILENAME);

    media::render_blurred(
        &state.config.ffmpeg_path,
        &file.path,
        &output_path,
        &blur,
        state.config.blur_sigma,
        state.config.ffmpeg_threads,
    )
    .await?;

    let bytes = tokio::fs::read(&output_path)
        .await
        .log_500("[safe_video] Failed to read rendered video")?;

    log::info!(
        "[safe_video] Rendered {} using scan {:?}: {} segment(s) at threshold {}",
        file.filename,
        scan.as_ref().map(|s| s.id),
        blur.len(),
        threshold
    );

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4"),
            (header::CONTENT_DISPOSITION, SAFE_VIDEO_DISPOSITION),
        ],
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_defaults_when_absent_or_blank() {
        assert_eq!(parse_threshold(None, 0.8).unwrap(), 0.8);
        assert_eq!(parse_threshold(Some(&" ".to_string()), 0.8).unwrap(), 0.8);
        assert_eq!(parse_threshold(Some(&"0.6".to_string()), 0.8).unwrap(), 0.6);
    }

    #[test]
    fn threshold_must_be_a_probability() {
        assert!(parse_threshold(Some(&"1.2".to_string()), 0.8).is_err());
        assert!(parse_threshold(Some(&"high".to_string()), 0.8).is_err());
    }

    #[test]
    fn scan_id_is_optional_integer() {
        assert_eq!(parse_scan_id(None).unwrap(), None);
        assert_eq!(parse_scan_id(Some(&"42".to_string())).unwrap(), Some(42));
        assert!(parse_scan_id(Some(&"forty-two".to_string())).is_err());
    }
}
