use std::time::Duration;
use thiserror::Error;

use crate::core::validation::ValidationError;
use crate::download::process::InvocationMode;
use crate::download::ytdlp_errors::{metrics_label, user_message, YtDlpErrorType};

/// Errors produced while orchestrating a yt-dlp invocation.
///
/// Every variant is local to a single request; nothing here is retried by
/// the library. The HTTP layer maps variants onto status codes via [`MediaError::code`].
///
/// # Example
///
/// ```no_run
/// use tubecore::MediaError;
///
/// fn handle_error(err: MediaError) {
///     eprintln!("[{}] {}", err.code(), err.user_message());
/// }
/// ```
#[derive(Error, Debug)]
pub enum MediaError {
    /// Missing or malformed source URL, rejected before any process is spawned
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The yt-dlp binary could not be launched (deployment problem, not per-request)
    #[error("yt-dlp binary '{bin}' is unavailable: {source}")]
    ToolUnavailable {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    /// The source site demands credentials we do not have, or ours are stale
    #[error("Source requires authentication: {stderr}")]
    AuthenticationRequired { stderr: String },

    /// Nonzero exit while fetching metadata
    #[error("Metadata fetch failed ({kind:?}, exit code {exit_code:?}): {stderr}")]
    FetchFailed {
        kind: YtDlpErrorType,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Metadata did not parse even though yt-dlp reported success
    #[error("yt-dlp produced malformed metadata: {0}")]
    MalformedOutput(String),

    /// Nonzero exit or pipe error while emitting media
    #[error("Media stream failed after {bytes_sent} bytes (exit code {exit_code:?}): {stderr}")]
    StreamFailure {
        bytes_sent: u64,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The subprocess outlived its configured deadline and was killed
    #[error("yt-dlp {mode} timed out after {}s", .after.as_secs())]
    Timeout { mode: InvocationMode, after: Duration },

    /// Local IO failure around the subprocess
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with MediaError
pub type MediaResult<T> = Result<T, MediaError>;

impl From<ValidationError> for MediaError {
    fn from(err: ValidationError) -> Self {
        MediaError::InvalidInput(err.to_string())
    }
}

impl MediaError {
    /// Stable machine-readable code, used as `error_code` in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::InvalidInput(_) => "INVALID_INPUT",
            MediaError::ToolUnavailable { .. } => "TOOL_UNAVAILABLE",
            MediaError::AuthenticationRequired { .. } => "AUTHENTICATION_REQUIRED",
            MediaError::FetchFailed { .. } => "FETCH_FAILED",
            MediaError::MalformedOutput(_) => "MALFORMED_OUTPUT",
            MediaError::StreamFailure { .. } => "STREAM_FAILURE",
            MediaError::Timeout { .. } => "TIMEOUT",
            MediaError::Io(_) => "IO_ERROR",
        }
    }

    /// Returns subcategory for metrics
    pub fn category(&self) -> &'static str {
        match self {
            MediaError::InvalidInput(_) => "invalid_input",
            MediaError::ToolUnavailable { .. } => "tool_unavailable",
            MediaError::AuthenticationRequired { .. } => "authentication_required",
            MediaError::FetchFailed { .. } => "fetch_failed",
            MediaError::MalformedOutput(_) => "malformed_output",
            MediaError::StreamFailure { .. } => "stream_failure",
            MediaError::Timeout { mode, .. } => match mode {
                InvocationMode::Metadata => "fetch_timeout",
                InvocationMode::Stream => "stream_timeout",
            },
            MediaError::Io(_) => "io",
        }
    }

    /// Metrics label: the category, with failed fetches split by what yt-dlp reported.
    pub fn metrics_label(&self) -> &'static str {
        match self {
            MediaError::FetchFailed { kind, .. } => metrics_label(kind),
            _ => self.category(),
        }
    }

    /// Whether the caller sent something we refused to act on.
    pub fn is_client_error(&self) -> bool {
        matches!(self, MediaError::InvalidInput(_))
    }

    /// Message safe to show to an end user.
    ///
    /// Raw stderr stays in the logs; users get a short explanation instead.
    pub fn user_message(&self) -> String {
        match self {
            MediaError::InvalidInput(msg) => msg.clone(),
            MediaError::ToolUnavailable { .. } => {
                "The download service is misconfigured. Please try again later.".to_string()
            }
            MediaError::AuthenticationRequired { .. } => user_message(&YtDlpErrorType::AuthenticationRequired),
            MediaError::FetchFailed { kind, .. } => user_message(kind),
            MediaError::MalformedOutput(_) => "Failed to read media information.".to_string(),
            MediaError::StreamFailure { .. } => "Failed to download media.".to_string(),
            MediaError::Timeout { .. } => "The source took too long to respond. Please try again.".to_string(),
            MediaError::Io(_) => "Internal error while processing the request.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            MediaError::InvalidInput("x".into()),
            MediaError::ToolUnavailable {
                bin: "yt-dlp".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
            MediaError::AuthenticationRequired { stderr: String::new() },
            MediaError::FetchFailed {
                kind: YtDlpErrorType::Unknown,
                exit_code: Some(1),
                stderr: String::new(),
            },
            MediaError::MalformedOutput("x".into()),
            MediaError::StreamFailure {
                bytes_sent: 0,
                exit_code: Some(1),
                stderr: String::new(),
            },
            MediaError::Timeout {
                mode: InvocationMode::Stream,
                after: Duration::from_secs(1),
            },
        ];

        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_timeout_category_follows_mode() {
        let fetch = MediaError::Timeout {
            mode: InvocationMode::Metadata,
            after: Duration::from_secs(5),
        };
        let stream = MediaError::Timeout {
            mode: InvocationMode::Stream,
            after: Duration::from_secs(5),
        };
        assert_eq!(fetch.category(), "fetch_timeout");
        assert_eq!(stream.category(), "stream_timeout");
        assert_eq!(fetch.to_string(), "yt-dlp metadata timed out after 5s");
    }

    #[test]
    fn test_metrics_label_splits_fetch_failures() {
        let unavailable = MediaError::FetchFailed {
            kind: YtDlpErrorType::VideoUnavailable,
            exit_code: Some(1),
            stderr: String::new(),
        };
        let network = MediaError::FetchFailed {
            kind: YtDlpErrorType::NetworkError,
            exit_code: Some(1),
            stderr: String::new(),
        };
        assert_eq!(unavailable.metrics_label(), "video_unavailable");
        assert_eq!(network.metrics_label(), "network");
        assert_eq!(MediaError::MalformedOutput("x".into()).metrics_label(), "malformed_output");
    }

    #[test]
    fn test_user_message_hides_stderr() {
        let err = MediaError::FetchFailed {
            kind: YtDlpErrorType::Unknown,
            exit_code: Some(1),
            stderr: "Traceback (most recent call last)".into(),
        };
        assert!(!err.user_message().contains("Traceback"));
        assert!(err.to_string().contains("Traceback"));
    }

    #[test]
    fn test_validation_error_becomes_invalid_input() {
        let err: MediaError = ValidationError::MissingUrl.into();
        assert!(err.is_client_error());
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
