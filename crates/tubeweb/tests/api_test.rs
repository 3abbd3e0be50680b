//! Router tests against a scripted yt-dlp
//!
//! Run with: cargo test -p tubeway --test api_test

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use tubecore::testing::{fixtures, ProcessScript, ScriptedLauncher};
use tubecore::{Config, MetadataFetcher};
use tubeweb::{router, AppState};

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

fn state_for(launcher: &Arc<ScriptedLauncher>) -> Arc<AppState> {
    Arc::new(AppState::from_config(&Config::default(), launcher.clone(), "2025.01.15"))
}

async fn get(state: Arc<AppState>, uri: &str) -> Response {
    router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn info_uri(url: &str) -> String {
    format!("/api/info?url={}", urlencoding::encode(url))
}

// ============================================================================
// /api/info
// ============================================================================

#[tokio::test]
async fn test_info_without_url_is_bad_request() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::new()));
    let response = get(state_for(&launcher), "/api/info").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "INVALID_INPUT");
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_info_returns_normalized_metadata() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::metadata(&fixtures::video_metadata(
        "dQw4w9WgXcQ",
    ))));
    let response = get(state_for(&launcher), &info_uri(VIDEO_URL)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["title"], "Never Gonna Give You Up");
    assert_eq!(body["canonical_url"], VIDEO_URL);
    assert_eq!(body["is_playlist"], false);
    assert_eq!(body["formats"][0]["format_id"], "140");
    assert_eq!(body["formats"][0]["resolution_label"], Value::Null);
    assert_eq!(body["formats"][2]["resolution_label"], "1080p");
}

#[tokio::test]
async fn test_info_post() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::metadata(&fixtures::video_metadata(
        "dQw4w9WgXcQ",
    ))));
    let request = Request::builder()
        .method("POST")
        .uri("/api/info")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::json!({ "url": VIDEO_URL }).to_string()))
        .unwrap();

    let response = router(state_for(&launcher)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["uploader"], "Rick Astley");
}

#[tokio::test]
async fn test_info_post_with_broken_json() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::new()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/info")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"url\": "))
        .unwrap();

    let response = router(state_for(&launcher)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error_code"], "INVALID_INPUT");
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_info_sign_in_is_forbidden() {
    let launcher = Arc::new(ScriptedLauncher::new(
        ProcessScript::new()
            .stderr("ERROR: [youtube] dQw4w9WgXcQ: Sign in to confirm you're not a bot\n")
            .exit_code(1),
    ));
    let response = get(state_for(&launcher), &info_uri(VIDEO_URL)).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error_code"], "AUTHENTICATION_REQUIRED");
    // raw stderr stays in the logs
    assert!(!body["error"].as_str().unwrap().contains("ERROR:"));
}

#[tokio::test]
async fn test_info_failure_is_bad_gateway() {
    let launcher = Arc::new(ScriptedLauncher::new(
        ProcessScript::new().stderr("ERROR: Video unavailable\n").exit_code(1),
    ));
    let response = get(state_for(&launcher), &info_uri(VIDEO_URL)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error_code"], "FETCH_FAILED");
}

#[tokio::test]
async fn test_info_timeout_is_gateway_timeout() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::new().hang_after_output()));
    let mut state = AppState::from_config(&Config::default(), launcher.clone(), "test");
    state.fetcher = MetadataFetcher::new(launcher.clone()).with_timeout(Some(Duration::from_millis(50)));

    let response = get(Arc::new(state), &info_uri(VIDEO_URL)).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(launcher.kill_count(), 1);
}

#[tokio::test]
async fn test_tool_unavailable_is_service_unavailable() {
    let launcher = Arc::new(ScriptedLauncher::unavailable());
    let response = get(state_for(&launcher), &info_uri(VIDEO_URL)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// /api/download
// ============================================================================

#[tokio::test]
async fn test_download_streams_body_with_headers() {
    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
    let script = data
        .chunks(50_000)
        .fold(ProcessScript::new(), |s, chunk| s.stdout(chunk.to_vec()));
    let launcher = Arc::new(ScriptedLauncher::new(script));

    let uri = format!(
        "/api/download?url={}&format=251&filename={}&ext=webm",
        urlencoding::encode(VIDEO_URL),
        urlencoding::encode("Rick \"Astley\"")
    );
    let response = get(state_for(&launcher), &uri).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Rick Astley.webm\"; filename*=UTF-8''Rick%20Astley.webm"
    );

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), data.len());
    assert_eq!(&body[..], &data[..]);

    let invocations = launcher.invocations();
    assert_eq!(invocations[0].format_selector(), Some("251"));
}

#[tokio::test]
async fn test_download_accepts_itag_and_defaults() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::new().stdout(b"media".to_vec())));
    let uri = format!("/api/download?url={}&itag=18", urlencoding::encode(VIDEO_URL));
    let response = get(state_for(&launcher), &uri).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"download.mp4\"; filename*=UTF-8''download.mp4"
    );
    let _ = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(launcher.invocations()[0].format_selector(), Some("18"));
}

#[tokio::test]
async fn test_download_failure_before_output_is_json_error() {
    let launcher = Arc::new(ScriptedLauncher::new(
        ProcessScript::new()
            .stderr("ERROR: Requested format is not available\n")
            .exit_code(1),
    ));
    let uri = format!("/api/download?url={}&format=999", urlencoding::encode(VIDEO_URL));
    let response = get(state_for(&launcher), &uri).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "STREAM_FAILURE");
}

#[tokio::test]
async fn test_download_failure_after_output_truncates_body() {
    let launcher = Arc::new(ScriptedLauncher::new(
        ProcessScript::new()
            .stdout(b"0123456789".to_vec())
            .stderr("ERROR: fragment not found\n")
            .exit_code(1),
    ));
    let uri = format!("/api/download?url={}", urlencoding::encode(VIDEO_URL));
    let response = get(state_for(&launcher), &uri).await;

    // headers were already committed
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn test_download_without_url() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::new()));
    let response = get(state_for(&launcher), "/api/download?format=best").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(launcher.launch_count(), 0);
}

// ============================================================================
// Health, metrics, CORS
// ============================================================================

#[tokio::test]
async fn test_health() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::new()));
    let response = get(state_for(&launcher), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "tubeway");
    assert_eq!(body["ytdlp_version"], "2025.01.15");
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_metrics() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::metadata(&fixtures::video_metadata("m"))));
    let state = state_for(&launcher);
    // make sure at least one tubeway metric has been touched
    let _ = get(state.clone(), &info_uri(VIDEO_URL)).await;

    let response = get(state, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("tubeway_metadata_requests_total"));
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let launcher = Arc::new(ScriptedLauncher::new(ProcessScript::new()));
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://example.org")
        .body(Body::empty())
        .unwrap();

    let response = router(state_for(&launcher)).oneshot(request).await.unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
