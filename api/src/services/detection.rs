//! Runs the classifier over uploaded media.
//!
//! Inference is CPU-bound, so every forward pass goes through
//! `spawn_blocking` to keep the async workers free.

use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;

use crate::config::Config;
use crate::content_filter::{Classifier, IMAGE_SIZE, Prediction, round3};
use crate::domain::scans::{self, Detection};
use crate::media::FrameSampler;
use crate::segments::{Segment, SegmentError, timestamps_to_segments};
use crate::services::error::{ApiError, LogErr};

/// Classify one batch of scaled RGB frames off the async runtime
pub async fn classify_batch(
    classifier: &Arc<dyn Classifier>,
    batch: Vec<Vec<u8>>,
) -> Result<Vec<Prediction>, ApiError> {
    let classifier = Arc::clone(classifier);
    tokio::task::spawn_blocking(move || classifier.classify(&batch))
        .await
        .log_500("[nsfw] Classifier task panicked")?
        .log_500("[nsfw] Classification failed")
}

/// Sample a video and classify every frame, batching forward passes.
/// Only one batch of frames is held in memory at a time.
pub async fn scan_video(
    classifier: &Arc<dyn Classifier>,
    path: &Path,
    config: &Config,
) -> Result<Vec<Detection>, ApiError> {
    let batch_size = config.classifier_batch_size.max(1);
    let mut sampler = FrameSampler::spawn(
        &config.ffmpeg_path,
        path,
        config.sample_interval_secs,
        IMAGE_SIZE as u32,
        config.ffmpeg_threads,
    )?;

    let mut detections = Vec::new();
    let mut timestamps = Vec::with_capacity(batch_size);
    let mut batch = Vec::with_capacity(batch_size);

    while let Some(frame) = sampler.next_frame().await? {
        timestamps.push(frame.timestamp_secs);
        batch.push(frame.rgb);

        if batch.len() == batch_size {
            let predictions = classify_batch(classifier, std::mem::take(&mut batch)).await?;
            collect_detections(&mut detections, timestamps.drain(..), &predictions);
        }
    }

    if !batch.is_empty() {
        let predictions = classify_batch(classifier, batch).await?;
        collect_detections(&mut detections, timestamps.drain(..), &predictions);
    }

    let frames = sampler.finish().await?;
    log::info!(
        "[nsfw] Classified {} frames from {:?}",
        frames,
        path.file_name().unwrap_or_default()
    );

    Ok(detections)
}

fn collect_detections(
    detections: &mut Vec<Detection>,
    timestamps: impl Iterator<Item = f64>,
    predictions: &[Prediction],
) {
    detections.extend(
        timestamps
            .zip(predictions)
            .map(|(timestamp_secs, prediction)| Detection {
                timestamp_secs,
                confidence: round3(prediction.nsfw),
            }),
    );
}

/// Blur segments for a scan's detections at the given threshold
pub fn blur_segments(
    detections: &[Detection],
    threshold: f32,
    config: &Config,
) -> Result<Vec<Segment>, SegmentError> {
    let (timestamps, confidences) = scans::columns(detections);
    timestamps_to_segments(
        &timestamps,
        &confidences,
        threshold,
        config.blur_merge_gap_secs,
        config.blur_pad_secs,
    )
}

/// Decode an encoded image (png, jpeg, webp, gif) and classify it
pub async fn classify_image(
    classifier: &Arc<dyn Classifier>,
    data: Vec<u8>,
) -> Result<Prediction, ApiError> {
    let scaler = Arc::clone(classifier);
    let scaled = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let rgba = image::load_from_memory(&data)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        scaler.scale(rgba.as_raw(), width, height)
    })
    .await
    .log_500("[nsfw] Decode task panicked")?
    .log_status("Could not decode image", StatusCode::UNPROCESSABLE_ENTITY)?;

    classify_batch(classifier, vec![scaled])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR, "empty prediction".into()))
}
