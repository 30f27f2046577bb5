use anyhow::Result;

use super::{Classifier, Prediction};

/// No-op classifier that always reports normal - for testing or opt-out
pub struct NoOpClassifier;

impl NoOpClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoOpClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for NoOpClassifier {
    fn name(&self) -> &str {
        "noop"
    }

    fn classify(&self, scaled_images: &[Vec<u8>]) -> Result<Vec<Prediction>> {
        Ok(vec![
            Prediction {
                normal: 1.0,
                nsfw: 0.0,
            };
            scaled_images.len()
        ])
    }
}
