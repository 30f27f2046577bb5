//! Runtime configuration read from the environment.
//!
//! Every setting has a default, so the service starts with no variables set
//! apart from a reachable `DATABASE_URL`.

use std::env;
use std::str::FromStr;

use crate::constants::*;

/// Which classifier backs the detection endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Nsfw,
    NoOp,
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nsfw" => Ok(FilterKind::Nsfw),
            "noop" | "none" | "off" => Ok(FilterKind::NoOp),
            other => Err(format!("unknown content filter: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub content_filter: FilterKind,
    pub model_repo: String,
    pub sample_interval_secs: f64,
    pub nsfw_threshold: f32,
    pub blur_pad_secs: f64,
    pub blur_merge_gap_secs: f64,
    pub blur_sigma: f64,
    pub classifier_batch_size: usize,
    pub max_upload_size: usize,
    pub ffmpeg_threads: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            content_filter: FilterKind::Nsfw,
            model_repo: DEFAULT_MODEL_REPO.to_string(),
            sample_interval_secs: DEFAULT_SAMPLE_INTERVAL_SECS,
            nsfw_threshold: DEFAULT_NSFW_THRESHOLD,
            blur_pad_secs: DEFAULT_BLUR_PAD_SECS,
            blur_merge_gap_secs: DEFAULT_BLUR_MERGE_GAP_SECS,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            classifier_batch_size: DEFAULT_CLASSIFIER_BATCH_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            ffmpeg_threads: DEFAULT_FFMPEG_THREADS,
            ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
            ffprobe_path: DEFAULT_FFPROBE_PATH.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable or out-of-range values
    /// fall back to the default and are logged.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            port: parsed::<u16, _>(&lookup, "PORT")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.port),
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parsed::<u32, _>(&lookup, "DATABASE_MAX_CONNECTIONS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.database_max_connections),
            content_filter: parsed::<FilterKind, _>(&lookup, "CONTENT_FILTER").unwrap_or(defaults.content_filter),
            model_repo: lookup("NSFW_MODEL_REPO")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.model_repo),
            sample_interval_secs: parsed::<f64, _>(&lookup, "SAMPLE_INTERVAL_SECS")
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(defaults.sample_interval_secs),
            nsfw_threshold: parsed::<f32, _>(&lookup, "NSFW_THRESHOLD")
                .filter(|v| (0.0..=1.0).contains(v))
                .unwrap_or(defaults.nsfw_threshold),
            blur_pad_secs: parsed::<f64, _>(&lookup, "BLUR_PAD_SECS")
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.blur_pad_secs),
            blur_merge_gap_secs: parsed::<f64, _>(&lookup, "BLUR_MERGE_GAP_SECS")
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.blur_merge_gap_secs),
            blur_sigma: parsed::<f64, _>(&lookup, "BLUR_SIGMA")
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(defaults.blur_sigma),
            classifier_batch_size: parsed::<usize, _>(&lookup, "CLASSIFIER_BATCH_SIZE")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.classifier_batch_size),
            max_upload_size: parsed::<usize, _>(&lookup, "MAX_UPLOAD_SIZE")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_upload_size),
            ffmpeg_threads: parsed::<usize, _>(&lookup, "FFMPEG_THREADS").unwrap_or(defaults.ffmpeg_threads),
            ffmpeg_path: lookup("FFMPEG_PATH")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: lookup("FFPROBE_PATH")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.ffprobe_path),
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[config] Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
