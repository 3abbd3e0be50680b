//! Metadata fetching and normalization
//!
//! Runs yt-dlp with `--dump-single-json`, collects the whole payload and
//! turns it into a [`MediaInfo`]. The payload is parsed exactly once into
//! typed raw structs; every default applied afterwards is listed in
//! [`parse_metadata`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

use crate::core::config::Config;
use crate::core::error::{MediaError, MediaResult};
use crate::core::metrics;
use crate::download::process::{
    spawn_stderr_drain, Invocation, InvocationMode, MediaRequest, ProcessExit, ProcessHandle, ProcessLauncher,
};
use crate::download::ytdlp_errors::{analyze_ytdlp_error, stderr_tail, YtDlpErrorType};

/// Largest slice of a bad payload echoed at error level (the rest goes to debug)
const PAYLOAD_PREVIEW_CHARS: usize = 2000;

/// Lines of stderr kept for classification and the error report
const STDERR_TAIL_LINES: usize = 200;

/// Normalized description of a media item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail_url: String,
    pub duration_seconds: Option<f64>,
    pub uploader: String,
    pub canonical_url: String,
    pub is_playlist: bool,
    pub extractor: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}

/// One encoded variant yt-dlp can deliver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub container_ext: String,
    /// `None` for audio-only variants
    pub resolution_label: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
    pub approximate_size_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    thumbnails: Option<Vec<RawThumbnail>>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    extractor: Option<String>,
    formats: Option<Vec<RawFormat>>,
    entries: Option<Vec<Option<RawInfo>>>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    resolution: Option<String>,
    height: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<RawFormat> for FormatDescriptor {
    fn from(raw: RawFormat) -> Self {
        // yt-dlp writes "none" for an absent stream; a missing codec is unknown, not absent
        let has_video = raw.vcodec.as_deref() != Some("none");
        let has_audio = raw.acodec.as_deref() != Some("none");

        let resolution_label = if has_video {
            non_blank(raw.resolution)
                .filter(|r| r != "audio only")
                .or_else(|| raw.height.filter(|h| *h > 0.0).map(|h| format!("{}p", h as u64)))
        } else {
            None
        };

        let approximate_size_bytes = raw
            .filesize
            .or(raw.filesize_approx)
            .filter(|size| *size >= 0.0)
            .map(|size| size as u64);

        Self {
            format_id: raw.format_id.unwrap_or_default(),
            container_ext: raw.ext.unwrap_or_default(),
            resolution_label,
            has_video,
            has_audio,
            approximate_size_bytes,
        }
    }
}

/// Parses a `--dump-single-json` payload into a [`MediaInfo`].
///
/// For playlists the first entry is the primary record. Defaults:
/// - `title`: "Untitled"
/// - `thumbnail_url`: first of `thumbnails`, then ""
/// - `uploader`: `channel`, then ""
/// - `canonical_url`: `webpage_url`, `original_url`, then `request_url`
/// - `extractor`: the top-level extractor when the entry has none
pub fn parse_metadata(payload: &[u8], request_url: &str) -> MediaResult<MediaInfo> {
    let mut raw: RawInfo =
        serde_json::from_slice(payload).map_err(|e| MediaError::MalformedOutput(format!("invalid JSON: {}", e)))?;

    let entries = raw.entries.take().unwrap_or_default();
    let is_playlist = !entries.is_empty();
    let top_extractor = raw.extractor.take();

    let mut primary = entries.into_iter().flatten().next().unwrap_or(raw);

    let thumbnail_url = non_blank(primary.thumbnail.take())
        .or_else(|| {
            primary
                .thumbnails
                .take()
                .unwrap_or_default()
                .into_iter()
                .find_map(|t| non_blank(t.url))
        })
        .unwrap_or_default();

    let canonical_url = non_blank(primary.webpage_url)
        .or_else(|| non_blank(primary.original_url))
        .unwrap_or_else(|| request_url.trim().to_string());

    Ok(MediaInfo {
        title: non_blank(primary.title).unwrap_or_else(|| "Untitled".to_string()),
        thumbnail_url,
        duration_seconds: primary.duration,
        uploader: non_blank(primary.uploader)
            .or_else(|| non_blank(primary.channel))
            .unwrap_or_default(),
        canonical_url,
        is_playlist,
        extractor: non_blank(primary.extractor).or(top_extractor),
        formats: primary
            .formats
            .unwrap_or_default()
            .into_iter()
            .map(FormatDescriptor::from)
            .collect(),
    })
}

struct CollectedOutput {
    stdout: Vec<u8>,
    stderr: String,
    exit: ProcessExit,
}

/// Fetches and normalizes metadata, one yt-dlp process per call
pub struct MetadataFetcher {
    launcher: Arc<dyn ProcessLauncher>,
    timeout: Option<Duration>,
    max_bytes: usize,
}

impl MetadataFetcher {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        let config = Config::default();
        Self::from_config(launcher, &config)
    }

    pub fn from_config(launcher: Arc<dyn ProcessLauncher>, config: &Config) -> Self {
        Self {
            launcher,
            timeout: config.ytdlp.metadata_timeout(),
            max_bytes: config.metadata.max_bytes,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Runs yt-dlp in metadata mode for `request.source_url`.
    ///
    /// The format selector is ignored. Nothing is retried.
    pub async fn fetch(&self, request: &MediaRequest) -> MediaResult<MediaInfo> {
        let start = Instant::now();
        let result = self.fetch_inner(request).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(info) => {
                log::info!(
                    "Metadata for {} fetched in {:.1}s: '{}' ({} formats)",
                    info.canonical_url,
                    elapsed,
                    info.title,
                    info.formats.len()
                );
                metrics::record_metadata_outcome("success", elapsed);
            }
            Err(e) => {
                metrics::record_metadata_outcome(e.category(), elapsed);
                metrics::record_error(e.metrics_label(), "metadata");
            }
        }
        result
    }

    async fn fetch_inner(&self, request: &MediaRequest) -> MediaResult<MediaInfo> {
        let invocation = Invocation::metadata(&request.source_url)?;
        let mut handle = self.launcher.launch(&invocation)?;
        log::debug!("Fetching metadata for {} (pid {:?})", invocation.source_url(), handle.id());

        let output = match self.timeout {
            Some(limit) => {
                let collected = tokio::time::timeout(limit, collect_output(&mut handle, self.max_bytes)).await;
                match collected {
                    Ok(result) => result?,
                    Err(_) => {
                        log::warn!(
                            "yt-dlp metadata for {} exceeded {}s, killing it",
                            invocation.source_url(),
                            limit.as_secs()
                        );
                        handle.terminate().await;
                        return Err(MediaError::Timeout {
                            mode: InvocationMode::Metadata,
                            after: limit,
                        });
                    }
                }
            }
            None => collect_output(&mut handle, self.max_bytes).await?,
        };

        if !output.exit.success() {
            let kind = analyze_ytdlp_error(&output.stderr);
            log::warn!(
                "yt-dlp metadata failed for {} (exit {:?}, {:?}): {}",
                invocation.source_url(),
                output.exit.code,
                kind,
                stderr_tail(&output.stderr, 5)
            );
            return Err(match kind {
                YtDlpErrorType::AuthenticationRequired => MediaError::AuthenticationRequired { stderr: output.stderr },
                _ => MediaError::FetchFailed {
                    kind,
                    exit_code: output.exit.code,
                    stderr: output.stderr,
                },
            });
        }

        parse_metadata(&output.stdout, invocation.source_url()).inspect_err(|e| {
            let raw = String::from_utf8_lossy(&output.stdout);
            let preview: String = raw.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
            log::error!(
                "yt-dlp exited 0 but its metadata is unusable ({}, {} bytes): {}",
                e,
                output.stdout.len(),
                preview
            );
            log::debug!("Full metadata payload: {}", raw);
        })
    }
}

/// Reads stdout (bounded) while stderr drains in its own task keeping only
/// a tail, then reaps.
///
/// Both pipes are consumed concurrently so a chatty stderr cannot fill its
/// pipe and stall the process while we wait on stdout.
async fn collect_output(handle: &mut ProcessHandle, max_bytes: usize) -> MediaResult<CollectedOutput> {
    let stderr_task = handle
        .take_stderr()
        .map(|stderr| spawn_stderr_drain(stderr, STDERR_TAIL_LINES));

    let mut stdout = handle
        .take_stdout()
        .ok_or_else(|| std::io::Error::other("yt-dlp stdout already taken"))?;

    let mut payload = Vec::new();
    (&mut stdout)
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut payload)
        .await?;

    if payload.len() > max_bytes {
        handle.terminate().await;
        if let Some(task) = stderr_task {
            task.abort();
        }
        return Err(MediaError::MalformedOutput(format!(
            "metadata payload exceeds {} bytes",
            max_bytes
        )));
    }

    let exit = handle.wait().await?;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    Ok(CollectedOutput {
        stdout: payload,
        stderr,
        exit,
    })
}
