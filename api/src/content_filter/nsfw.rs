use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use hf_hub::{Repo, RepoType, api::sync::Api};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Classifier, IMAGE_SIZE, Prediction};

// ViT image processors for these checkpoints use mean=0.5, std=0.5 on every channel
const MEAN: f32 = 0.5;
const STD: f32 = 0.5;

/// Label layout read from the checkpoint's config.json
#[derive(Debug, Deserialize)]
struct LabelConfig {
    id2label: HashMap<String, String>,
}

#[derive(Debug, PartialEq)]
struct LabelIndices {
    normal: usize,
    nsfw: usize,
    num_labels: usize,
}

impl LabelConfig {
    fn resolve(&self) -> Result<LabelIndices> {
        let find = |wanted: &str| -> Result<usize> {
            self.id2label
                .iter()
                .find(|(_, label)| label.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| anyhow!("Model config has no '{}' label", wanted))?
                .0
                .parse::<usize>()
                .map_err(|e| anyhow!("Bad label index for '{}': {}", wanted, e))
        };

        let indices = LabelIndices {
            normal: find("normal")?,
            nsfw: find("nsfw")?,
            num_labels: self.id2label.len(),
        };

        if indices.normal >= indices.num_labels || indices.nsfw >= indices.num_labels {
            return Err(anyhow!("Label index out of range: {:?}", indices));
        }
        Ok(indices)
    }
}

/// Two-class ViT classifier (normal / nsfw) loaded from the Hugging Face hub
pub struct NsfwClassifier {
    model: Mutex<vit::Model>,
    device: Device,
    labels: LabelIndices,
    repo: String,
}

impl NsfwClassifier {
    pub fn new(model_repo: &str) -> Result<Self> {
        #[cfg(feature = "metal")]
        let device = Device::new_metal(0).unwrap_or(Device::Cpu);
        #[cfg(not(feature = "metal"))]
        let device = Device::Cpu;

        log::info!("[nsfw] Loading {} on {:?}", model_repo, device);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_repo.to_string(), RepoType::Model));

        let model_path = repo.get("model.safetensors")?;
        let config_path = repo.get("config.json")?;

        let raw_config = std::fs::read_to_string(config_path)?;
        let config: vit::Config = serde_json::from_str(&raw_config)?;
        let labels = serde_json::from_str::<LabelConfig>(&raw_config)?.resolve()?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &device)? };
        let model = vit::Model::new(&config, labels.num_labels, vb)?;

        log::info!("[nsfw] Model loaded ({} labels)", labels.num_labels);

        Ok(Self {
            model: Mutex::new(model),
            device,
            labels,
            repo: model_repo.to_string(),
        })
    }
}

/// Pack scaled RGB images into a normalized (N, 3, H, W) tensor
fn preprocess_batch(scaled_images: &[Vec<u8>], device: &Device) -> Result<Tensor> {
    let plane = IMAGE_SIZE * IMAGE_SIZE;
    let batch_size = scaled_images.len();
    let mut data = vec![0f32; batch_size * 3 * plane];

    for (batch_idx, scaled_rgb) in scaled_images.iter().enumerate() {
        if scaled_rgb.len() != plane * 3 {
            return Err(anyhow!(
                "Image {} expected {}x{}x3 RGB, got {} bytes",
                batch_idx,
                IMAGE_SIZE,
                IMAGE_SIZE,
                scaled_rgb.len()
            ));
        }

        let offset = batch_idx * 3 * plane;
        for (i, px) in scaled_rgb.chunks_exact(3).enumerate() {
            for (channel, value) in px.iter().enumerate() {
                data[offset + channel * plane + i] = (*value as f32 / 255.0 - MEAN) / STD;
            }
        }
    }

    Ok(Tensor::from_vec(
        data,
        (batch_size, 3, IMAGE_SIZE, IMAGE_SIZE),
        device,
    )?)
}

impl Classifier for NsfwClassifier {
    fn name(&self) -> &str {
        &self.repo
    }

    fn classify(&self, scaled_images: &[Vec<u8>]) -> Result<Vec<Prediction>> {
        if scaled_images.is_empty() {
            return Ok(vec![]);
        }

        let input = preprocess_batch(scaled_images, &self.device)?;
        let logits = {
            let model = self.model.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            model.forward(&input)?
        };

        let probs = candle_nn::ops::softmax(&logits, 1)?.to_vec2::<f32>()?;

        let predictions: Vec<Prediction> = probs
            .iter()
            .map(|row| Prediction {
                normal: row.get(self.labels.normal).copied().unwrap_or(0.0),
                nsfw: row.get(self.labels.nsfw).copied().unwrap_or(0.0),
            })
            .collect();

        let flagged = predictions.iter().filter(|p| p.nsfw >= 0.5).count();
        log::debug!(
            "[nsfw] Batch of {} classified, {} leaning nsfw",
            predictions.len(),
            flagged
        );

        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_config(json: &str) -> LabelConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn resolves_label_indices() {
        let config = label_config(
            r#"{"model_type": "vit", "id2label": {"0": "normal", "1": "nsfw"}}"#,
        );
        assert_eq!(
            config.resolve().unwrap(),
            LabelIndices {
                normal: 0,
                nsfw: 1,
                num_labels: 2
            }
        );
    }

    #[test]
    fn label_lookup_ignores_case() {
        let config = label_config(r#"{"id2label": {"0": "NSFW", "1": "Normal"}}"#);
        let labels = config.resolve().unwrap();
        assert_eq!(labels.nsfw, 0);
        assert_eq!(labels.normal, 1);
    }

    #[test]
    fn rejects_checkpoints_without_nsfw_label() {
        let config = label_config(
            r#"{"id2label": {"0": "drawings", "1": "hentai", "2": "neutral", "3": "porn", "4": "sexy"}}"#,
        );
        assert!(config.resolve().is_err());
    }

    #[test]
    fn preprocess_normalizes_into_chw() {
        let mut rgb = vec![0u8; IMAGE_SIZE * IMAGE_SIZE * 3];
        rgb[0] = 255; // first pixel, red channel
        rgb[4] = 255; // second pixel, green channel

        let tensor = preprocess_batch(&[rgb], &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, IMAGE_SIZE, IMAGE_SIZE]);

        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let plane = IMAGE_SIZE * IMAGE_SIZE;
        assert_eq!(values[0], 1.0);
        assert_eq!(values[1], -1.0);
        assert_eq!(values[plane + 1], 1.0);
        assert_eq!(values[2 * plane], -1.0);
    }

    #[test]
    fn preprocess_rejects_unscaled_images() {
        assert!(preprocess_batch(&[vec![0u8; 10]], &Device::Cpu).is_err());
    }
}
