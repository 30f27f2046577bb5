//! Multipart upload handling.
//!
//! The `file` field is streamed to a per-request temp directory that is
//! removed when the `UploadedFile` is dropped.

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

const FILE_FIELD: &str = "file";
const FALLBACK_FILENAME: &str = "upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// Classify by content type, falling back to the file extension when the
    /// client sent something generic
    pub fn detect(content_type: &str, filename: &str) -> Option<Self> {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.starts_with("image/") {
            return Some(MediaKind::Image);
        }
        if content_type.starts_with("video/") {
            return Some(MediaKind::Video);
        }

        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" => Some(MediaKind::Image),
            "mp4" | "mov" | "webm" | "mkv" | "avi" | "m4v" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("missing 'file' field")]
    MissingFile,
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An uploaded file living in its own temp directory
#[derive(Debug)]
pub struct UploadedFile {
    _dir: TempDir,
    pub path: PathBuf,
    pub filename: String,
    pub content_type: String,
    pub kind: MediaKind,
    pub size: u64,
}

/// The `file` part plus any plain text fields sent alongside it
#[derive(Debug)]
pub struct UploadForm {
    pub file: UploadedFile,
    pub fields: HashMap<String, String>,
}

/// Reduce a client-supplied filename to a safe basename
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    }
}

/// Drain the multipart body, streaming `file` to disk
pub async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, UploadError> {
    let mut file = None;
    let mut fields = HashMap::new();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name != FILE_FIELD {
            let value = field.text().await?;
            fields.insert(name, value);
            continue;
        }

        let filename = sanitize_filename(field.file_name().unwrap_or(FALLBACK_FILENAME));
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let kind = MediaKind::detect(&content_type, &filename)
            .ok_or_else(|| UploadError::Unsupported(content_type.clone()))?;

        let dir = tempfile::Builder::new().prefix("safeview_").tempdir()?;
        let path = dir.path().join(&filename);
        let mut out = tokio::fs::File::create(&path).await?;
        let mut size = 0u64;

        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;

        log::info!(
            "[upload] Received {} ({}, {} bytes)",
            filename,
            content_type,
            size
        );

        file = Some(UploadedFile {
            _dir: dir,
            path,
            filename,
            content_type,
            kind,
            size,
        });
    }

    Ok(UploadForm {
        file: file.ok_or(UploadError::MissingFile)?,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_kind_from_content_type() {
        assert_eq!(
            MediaKind::detect("video/mp4", "clip.bin"),
            Some(MediaKind::Video)
        );
        assert_eq!(
            MediaKind::detect("IMAGE/PNG", "clip.bin"),
            Some(MediaKind::Image)
        );
    }

    #[test]
    fn falls_back_to_extension() {
        assert_eq!(
            MediaKind::detect("application/octet-stream", "holiday.MOV"),
            Some(MediaKind::Video)
        );
        assert_eq!(
            MediaKind::detect("application/octet-stream", "photo.jpeg"),
            Some(MediaKind::Image)
        );
        assert_eq!(MediaKind::detect("text/plain", "notes.txt"), None);
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(r"C:\Users\me\My Clip.mov"), "My Clip.mov");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("<>|"), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }
}
