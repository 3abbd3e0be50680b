//! Public HTTP API.
//!
//! Routes:
//! - `GET /api/info?url=` and `POST /api/info` - normalized metadata (JSON)
//! - `GET /api/download?url=&format=&filename=&ext=` - media stream (`itag` is accepted for `format`)
//! - `GET /health` - liveness with uptime and tool version
//! - `GET /metrics` - Prometheus text exposition
//!
//! Handlers only decode requests and map errors to statuses; all process
//! handling lives in tubecore.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use tubecore::core::validation::{ascii_filename, sanitize_filename};
use tubecore::{ChannelSink, Config, MediaError, MediaInfo, MediaRequest, MetadataFetcher, ProcessLauncher, StreamRelay};

/// Shared state for the web server.
pub struct AppState {
    pub fetcher: MetadataFetcher,
    pub relay: StreamRelay,
    /// Chunks buffered between a relay and its response body
    pub channel_capacity: usize,
    pub start_time: Instant,
    pub ytdlp_version: String,
}

impl AppState {
    pub fn from_config(config: &Config, launcher: Arc<dyn ProcessLauncher>, ytdlp_version: impl Into<String>) -> Self {
        Self {
            fetcher: MetadataFetcher::from_config(launcher.clone(), config),
            relay: StreamRelay::from_config(launcher, config),
            channel_capacity: config.relay.channel_capacity,
            start_time: Instant::now(),
            ytdlp_version: ytdlp_version.into(),
        }
    }
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/info", get(info_get_handler).post(info_post_handler))
        .route("/api/download", get(download_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server and run until Ctrl+C.
pub async fn start_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;

    log::info!("Starting tubeway on http://{}", addr);
    log::info!("  /api/info      - Media metadata (GET ?url= or POST {{\"url\"}})");
    log::info!("  /api/download  - Media stream (?url=&format=&filename=&ext=)");
    log::info!("  /health        - Health check");
    log::info!("  /metrics       - Prometheus metrics");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received, draining connections");
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    error_code: &'static str,
}

/// A [`MediaError`] rendered as a JSON error response
#[derive(Debug)]
pub struct ApiError(pub MediaError);

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        Self(err)
    }
}

/// HTTP status for each error kind
pub fn status_for(err: &MediaError) -> StatusCode {
    match err {
        MediaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        MediaError::ToolUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        MediaError::AuthenticationRequired { .. } => StatusCode::FORBIDDEN,
        MediaError::FetchFailed { .. } | MediaError::StreamFailure { .. } => StatusCode::BAD_GATEWAY,
        MediaError::MalformedOutput(_) | MediaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        MediaError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            log::error!("Request failed ({}): {}", status, self.0);
        } else if self.0.is_client_error() {
            log::info!("Bad request: {}", self.0);
        } else {
            log::warn!("Request rejected ({}): {}", status, self.0);
        }

        let body = ErrorResponse {
            success: false,
            error: self.0.user_message(),
            error_code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InfoParams {
    url: Option<String>,
}

#[derive(Serialize)]
struct InfoResponse {
    success: bool,
    #[serde(flatten)]
    info: MediaInfo,
}

/// GET /api/info?url=
async fn info_get_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InfoParams>,
) -> Result<Response, ApiError> {
    fetch_info(&state, params.url).await
}

/// POST /api/info with `{"url": "..."}`
async fn info_post_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InfoParams>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(params) = body.map_err(|e| MediaError::InvalidInput(format!("Invalid request body: {}", e.body_text())))?;
    fetch_info(&state, params.url).await
}

async fn fetch_info(state: &AppState, url: Option<String>) -> Result<Response, ApiError> {
    let request = MediaRequest::new(url.unwrap_or_default());
    let info = state.fetcher.fetch(&request).await?;
    Ok(Json(InfoResponse { success: true, info }).into_response())
}

// ============================================================================
// Download
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    url: Option<String>,
    format: Option<String>,
    /// Older clients send the format as `itag`
    itag: Option<String>,
    filename: Option<String>,
    ext: Option<String>,
}

/// Container extensions we can name a MIME type for
const CONTAINERS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("m4a", "audio/mp4"),
    ("mp3", "audio/mpeg"),
    ("mkv", "video/x-matroska"),
];

/// Extension and MIME type for a download, from `ext` or else the selector.
///
/// For a selector only the first `ext=` filter counts: in `bv*[ext=mp4]+ba[ext=m4a]`
/// the video part decides the container.
pub fn container_for(selector: &str, ext: Option<&str>) -> (&'static str, &'static str) {
    let requested = ext
        .map(|e| e.trim().trim_start_matches('.'))
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .or_else(|| selector_ext(selector));

    requested
        .and_then(|wanted| {
            CONTAINERS
                .iter()
                .find(|(ext, _)| ext.eq_ignore_ascii_case(&wanted))
                .copied()
        })
        .unwrap_or(("mp4", "video/mp4"))
}

/// First `ext=` value of a format selector, or the selector itself when it
/// is a bare extension like `mp3`.
fn selector_ext(selector: &str) -> Option<String> {
    let selector = selector.trim();
    if let Some(start) = selector.find("ext=") {
        let value: String = selector[start + 4..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        return (!value.is_empty()).then_some(value);
    }
    selector
        .chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then(|| selector.to_string())
}

/// `Content-Disposition` with an ASCII fallback and the RFC 5987 UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_filename(filename),
        urlencoding::encode(filename)
    )
}

fn download_filename(requested: Option<&str>, ext: &str) -> String {
    let base = requested.map(sanitize_filename).filter(|n| !n.is_empty());
    let base = base.unwrap_or_else(|| "download".to_string());
    let suffix = format!(".{}", ext);
    if base.to_ascii_lowercase().ends_with(&suffix) {
        base
    } else {
        format!("{}{}", base, suffix)
    }
}

/// GET /api/download
///
/// Errors before yt-dlp produced its first byte become JSON error responses.
/// After that the status line is already out, so a failure aborts the body.
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let format = params.format.or(params.itag).unwrap_or_default();
    let request = MediaRequest::new(params.url.unwrap_or_default()).with_format(format);

    let media = state.relay.open(&request).await?;

    let (ext, content_type) = container_for(&request.format_selector, params.ext.as_deref());
    let filename = download_filename(params.filename.as_deref(), ext);
    let disposition = content_disposition(&filename);

    let (mut sink, rx) = ChannelSink::new(state.channel_capacity);
    tokio::spawn(async move {
        // outcome is logged and counted by the relay itself
        let _ = media.relay(&mut sink).await;
    });

    let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// ============================================================================
// Health & metrics
// ============================================================================

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();

    let health_status = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime.as_secs(),
        "uptime_human": format_duration(uptime),
        "service": "tubeway",
        "version": env!("CARGO_PKG_VERSION"),
        "ytdlp_version": state.ytdlp_version,
    });

    (StatusCode::OK, Json(health_status))
}

/// GET /metrics
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubecore::download::ytdlp_errors::YtDlpErrorType;
    use tubecore::InvocationMode;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (MediaError::InvalidInput("x".into()), 400),
            (
                MediaError::ToolUnavailable {
                    bin: "yt-dlp".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                },
                503,
            ),
            (MediaError::AuthenticationRequired { stderr: String::new() }, 403),
            (
                MediaError::FetchFailed {
                    kind: YtDlpErrorType::Unknown,
                    exit_code: Some(1),
                    stderr: String::new(),
                },
                502,
            ),
            (MediaError::MalformedOutput("x".into()), 500),
            (
                MediaError::StreamFailure {
                    bytes_sent: 0,
                    exit_code: Some(1),
                    stderr: String::new(),
                },
                502,
            ),
            (
                MediaError::Timeout {
                    mode: InvocationMode::Metadata,
                    after: Duration::from_secs(1),
                },
                504,
            ),
            (MediaError::Io(std::io::Error::other("disk")), 500),
        ];

        for (err, expected) in cases {
            assert_eq!(status_for(&err).as_u16(), expected, "{:?}", err);
        }
    }

    #[test]
    fn test_container_for() {
        assert_eq!(container_for("best", None), ("mp4", "video/mp4"));
        assert_eq!(container_for("18", Some("webm")), ("webm", "video/webm"));
        assert_eq!(container_for("bestaudio[ext=m4a]", None), ("m4a", "audio/mp4"));
        assert_eq!(container_for("best", Some("MP3")), ("mp3", "audio/mpeg"));
        assert_eq!(container_for("best", Some("  ")), ("mp4", "video/mp4"));
        assert_eq!(container_for("mp3", None), ("mp3", "audio/mpeg"));
        assert_eq!(container_for("251", None), ("mp4", "video/mp4"));
        assert_eq!(container_for("best", Some(".mkv")), ("mkv", "video/x-matroska"));
    }

    #[test]
    fn test_container_for_merged_selector_follows_video_part() {
        assert_eq!(container_for("bv*[ext=mp4]+ba[ext=m4a]", None), ("mp4", "video/mp4"));
        assert_eq!(container_for("bv*[ext=webm]+ba[ext=m4a]/b", None), ("webm", "video/webm"));
        assert_eq!(container_for("bestvideo[height<=720]+bestaudio", None), ("mp4", "video/mp4"));
    }

    #[test]
    fn test_download_filename() {
        assert_eq!(download_filename(None, "mp4"), "download.mp4");
        assert_eq!(download_filename(Some("My Song.m4a"), "m4a"), "My Song.m4a");
        assert_eq!(download_filename(Some("a/b:c"), "webm"), "abc.webm");
        assert_eq!(download_filename(Some("  "), "mp3"), "download.mp3");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("Трек 1.mp3"),
            "attachment; filename=\"____ 1.mp3\"; filename*=UTF-8''%D0%A2%D1%80%D0%B5%D0%BA%201.mp3"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
        assert_eq!(format_duration(Duration::from_secs(90061)), "1d 1h 1m 1s");
    }
}
