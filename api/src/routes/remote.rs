//! Fetch-and-check endpoint for media referenced by URL

use axum::{
    Form, Json, Router,
    extract::State,
    http::header,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::content_filter::LabelScore;
use crate::services::detection;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/analyze-url", post(analyze_url))
}

#[derive(Debug, Deserialize)]
struct AnalyzeUrlRequest {
    url: String,
}

/// Failures are reported in the body with a 200 status
#[derive(Debug, Default, Serialize)]
struct AnalyzeUrlResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Vec<LabelScore>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AnalyzeUrlResponse {
    fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            error: Some(message.into()),
            ..Default::default()
        })
    }
}

const TOO_LARGE: &str = "Remote file exceeds the upload size limit";

/// Only plain http(s) URLs are fetched
fn parse_media_url(raw: &str) -> Result<reqwest::Url, String> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| format!("Invalid URL: {}", e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("Unsupported URL scheme: {}", other)),
    }
}

/// Read the body chunk by chunk, giving up as soon as it passes `limit`
async fn read_limited(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>, String> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(TOO_LARGE.to_string());
    }

    let mut data = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        if data.len() + chunk.len() > limit {
            return Err(TOO_LARGE.to_string());
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// POST /analyze-url - Fetch remote media and classify it when it is an image
async fn analyze_url(
    State(state): State<Arc<AppState>>,
    Form(req): Form<AnalyzeUrlRequest>,
) -> Json<AnalyzeUrlResponse> {
    let url = match parse_media_url(&req.url) {
        Ok(url) => url,
        Err(e) => return AnalyzeUrlResponse::error(e),
    };

    let response = match state.http.get(url.clone()).send().await {
        Ok(r) => r,
        Err(e) => {
            log::warn!("[analyze_url] Fetch of {} failed: {}", url, e);
            return AnalyzeUrlResponse::error(e.to_string());
        }
    };

    if response.status() != reqwest::StatusCode::OK {
        return AnalyzeUrlResponse::error("Could not fetch file from URL");
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("video") {
        return Json(AnalyzeUrlResponse {
            message: Some("Media fetched successfully".into()),
            content_type: Some(content_type),
            ..Default::default()
        });
    }

    if !content_type.contains("image") {
        return AnalyzeUrlResponse::error(format!("Unsupported file type: {}", content_type));
    }

    let data = match read_limited(response, state.config.max_upload_size).await {
        Ok(data) => data,
        Err(e) => return AnalyzeUrlResponse::error(e),
    };

    match detection::classify_image(&state.classifier, data).await {
        Ok(prediction) => Json(AnalyzeUrlResponse {
            message: Some("Media fetched successfully".into()),
            content_type: Some(content_type),
            result: Some(prediction.ranked()),
            error: None,
        }),
        Err(e) => AnalyzeUrlResponse::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const CHUNK_LEN: usize = 64 * 1024;

    /// Serves one chunked `image/png` response without a Content-Length.
    /// `chunks: None` keeps sending until the client hangs up.
    async fn serve_chunked(chunks: Option<usize>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;

            let head = concat!(
                "HTTP/1.1 200 OK\r\n",
                "Content-Type: image/png\r\n",
                "Transfer-Encoding: chunked\r\n\r\n",
            );
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }

            let mut frame = format!("{:x}\r\n", CHUNK_LEN).into_bytes();
            frame.extend_from_slice(&vec![0u8; CHUNK_LEN]);
            frame.extend_from_slice(b"\r\n");

            let mut sent = 0;
            while chunks.is_none_or(|n| sent < n) {
                if socket.write_all(&frame).await.is_err() {
                    return;
                }
                sent += 1;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });

        addr
    }

    async fn fetch(addr: SocketAddr) -> reqwest::Response {
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(format!("http://{}/image.png", addr))
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn endless_chunked_body_stops_at_limit() {
        let response = fetch(serve_chunked(None).await).await;
        assert_eq!(response.content_length(), None);

        let result = tokio::time::timeout(Duration::from_secs(10), read_limited(response, 1024))
            .await
            .expect("body was read past the limit");
        assert_eq!(result.unwrap_err(), TOO_LARGE);
    }

    #[tokio::test]
    async fn chunked_body_within_limit_is_collected() {
        let response = fetch(serve_chunked(Some(3)).await).await;
        let data = read_limited(response, CHUNK_LEN * 3).await.unwrap();
        assert_eq!(data.len(), CHUNK_LEN * 3);
    }

    #[test]
    fn accepts_http_and_https() {
        assert!(parse_media_url("https://example.com/a.png").is_ok());
        assert!(parse_media_url("  http://example.com/b.mp4 ").is_ok());
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            parse_media_url("file:///etc/passwd").unwrap_err(),
            "Unsupported URL scheme: file"
        );
        assert!(parse_media_url("not a url").unwrap_err().starts_with("Invalid URL"));
    }

    #[test]
    fn error_body_only_has_error_key() {
        let Json(body) = AnalyzeUrlResponse::error("Could not fetch file from URL");
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"error": "Could not fetch file from URL"})
        );
    }
}
