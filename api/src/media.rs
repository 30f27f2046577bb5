//! ffprobe/ffmpeg wrappers: duration probing, frame sampling and blur rendering.
//!
//! Frames are piped out of ffmpeg as raw RGB already scaled to the classifier
//! input size, so a sampled frame never touches disk and only one is held at a
//! time.

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::segments::Segment;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("could not determine media duration")]
    UnknownDuration,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Leading stderr bytes kept for error reports; the rest is read and discarded
const STDERR_KEEP_BYTES: usize = 16 * 1024;

/// One decoded frame, packed RGB at the sampler's square size
pub struct SampledFrame {
    pub timestamp_secs: f64,
    pub rgb: Vec<u8>,
}

/// Media duration in seconds, via ffprobe
pub async fn probe_duration(ffprobe: &str, path: &Path) -> Result<f64, MediaError> {
    let output = Command::new(ffprobe)
        .args(["-v", "error"])
        .args(["-show_entries", "format=duration"])
        .args(["-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| MediaError::Spawn("ffprobe", e))?;

    if !output.status.success() {
        return Err(MediaError::Ffmpeg(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(stdout: &str) -> Result<f64, MediaError> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d >= 0.0)
        .ok_or(MediaError::UnknownDuration)
}

/// Streams frames sampled every `interval_secs` from a running ffmpeg
pub struct FrameSampler {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    frame_len: usize,
    interval_secs: f64,
    index: usize,
}

impl FrameSampler {
    pub fn spawn(
        ffmpeg: &str,
        path: &Path,
        interval_secs: f64,
        size: u32,
        threads: usize,
    ) -> Result<Self, MediaError> {
        let vf = format!("fps=1/{},scale={}:{}", interval_secs, size, size);
        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-threads", &threads.to_string()])
            .arg("-i")
            .arg(path)
            .args(["-an", "-sn"])
            .args(["-vf", &vf])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Spawn("ffmpeg", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Ffmpeg("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::Ffmpeg("stderr not captured".into()))?;

        Ok(Self {
            child,
            stdout,
            stderr: drain_stderr(stderr),
            frame_len: size as usize * size as usize * 3,
            interval_secs,
            index: 0,
        })
    }

    /// Next frame, or `None` once ffmpeg has written everything
    pub async fn next_frame(&mut self) -> Result<Option<SampledFrame>, MediaError> {
        let mut rgb = vec![0u8; self.frame_len];
        let mut filled = 0;

        while filled < self.frame_len {
            let n = self.stdout.read(&mut rgb[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled < self.frame_len {
            if filled > 0 {
                log::warn!(
                    "[media] Discarding truncated frame ({} of {} bytes)",
                    filled,
                    self.frame_len
                );
            }
            return Ok(None);
        }

        let frame = SampledFrame {
            timestamp_secs: self.index as f64 * self.interval_secs,
            rgb,
        };
        self.index += 1;
        Ok(Some(frame))
    }

    /// Wait for ffmpeg to exit and surface its error output on failure
    pub async fn finish(self) -> Result<usize, MediaError> {
        let Self {
            mut child,
            stdout,
            stderr,
            index,
            ..
        } = self;

        drop(stdout);
        let status = child.wait().await?;
        let stderr = stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(MediaError::Ffmpeg(stderr));
        }
        Ok(index)
    }
}

/// Read stderr to EOF so ffmpeg never blocks on a full pipe while we read stdout
fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = STDERR_KEEP_BYTES.saturating_sub(kept.len());
                    kept.extend_from_slice(&buf[..n.min(room)]);
                }
            }
        }
        String::from_utf8_lossy(&kept).trim().to_string()
    })
}

/// ffmpeg filter that blurs the whole frame inside the given segments
pub fn blur_filter(segments: &[Segment], sigma: f64) -> Option<String> {
    if segments.is_empty() {
        return None;
    }

    let enable = segments
        .iter()
        .map(|s| format!("between(t,{:.3},{:.3})", s.start, s.end))
        .collect::<Vec<_>>()
        .join("+");

    Some(format!("gblur=sigma={}:enable='{}'", sigma, enable))
}

/// Re-encode `input` to H.264/AAC mp4 with blur applied over `segments`
pub async fn render_blurred(
    ffmpeg: &str,
    input: &Path,
    output: &Path,
    segments: &[Segment],
    sigma: f64,
    threads: usize,
) -> Result<(), MediaError> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"])
        .args(["-threads", &threads.to_string()])
        .arg("-i")
        .arg(input);

    if let Some(vf) = blur_filter(segments, sigma) {
        cmd.args(["-vf", &vf]);
    }

    let result = cmd
        .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
        .args(["-c:a", "aac"])
        .args(["-movflags", "+faststart"])
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| MediaError::Spawn("ffmpeg", e))?;

    if !result.status.success() {
        return Err(MediaError::Ffmpeg(
            String::from_utf8_lossy(&result.stderr).trim().to_string(),
        ));
    }

    log::info!(
        "[media] Rendered {:?} with {} blurred segment(s)",
        output.file_name().unwrap_or_default(),
        segments.len()
    );
    Ok(())
}
