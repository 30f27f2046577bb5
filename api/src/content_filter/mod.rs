use anyhow::{Result, anyhow};
use image::{ImageBuffer, Rgba};
use serde::Serialize;
use std::sync::Arc;

use crate::config::{Config, FilterKind};

/// Side length of the square RGB input the classifiers expect
pub const IMAGE_SIZE: usize = 224;

/// Softmax output for one image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub normal: f32,
    pub nsfw: f32,
}

/// One label/score pair as reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct LabelScore {
    pub label: &'static str,
    pub score: f32,
}

impl Prediction {
    /// Both labels, highest score first
    pub fn ranked(&self) -> Vec<LabelScore> {
        let mut labels = vec![
            LabelScore {
                label: "nsfw",
                score: round3(self.nsfw),
            },
            LabelScore {
                label: "normal",
                score: round3(self.normal),
            },
        ];
        labels.sort_by(|a, b| b.score.total_cmp(&a.score));
        labels
    }
}

/// Round to three decimals for client-facing scores
pub fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

/// Pluggable image classifier for NSFW detection
pub trait Classifier: Send + Sync {
    /// Identifier recorded alongside each scan
    fn name(&self) -> &str;

    /// Scale image to model input size (224x224 RGB)
    fn scale(&self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        scale_rgba(rgba, width, height)
    }

    /// Classify batch of scaled images in a single pass
    fn classify(&self, scaled_images: &[Vec<u8>]) -> Result<Vec<Prediction>>;
}

/// Resize RGBA pixels to IMAGE_SIZE square and drop the alpha channel
pub fn scale_rgba(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let img: ImageBuffer<Rgba<u8>, _> = ImageBuffer::from_raw(width, height, rgba.to_vec())
        .ok_or_else(|| anyhow!("Invalid image dimensions"))?;

    let resized = image::imageops::resize(
        &img,
        IMAGE_SIZE as u32,
        IMAGE_SIZE as u32,
        image::imageops::FilterType::Triangle,
    );

    let mut rgb = Vec::with_capacity(IMAGE_SIZE * IMAGE_SIZE * 3);
    for pixel in resized.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
    }

    Ok(rgb)
}

/// Build the classifier selected by `CONTENT_FILTER`.
/// Loading the ViT downloads weights on first use, so call this off the async runtime.
pub fn from_config(config: &Config) -> Result<Arc<dyn Classifier>> {
    match config.content_filter {
        FilterKind::Nsfw => Ok(Arc::new(NsfwClassifier::new(&config.model_repo)?)),
        FilterKind::NoOp => {
            log::warn!("[nsfw] CONTENT_FILTER=noop, every frame will be reported as normal");
            Ok(Arc::new(NoOpClassifier::new()))
        }
    }
}

mod noop;
mod nsfw;

pub use noop::NoOpClassifier;
pub use nsfw::NsfwClassifier;
