//! yt-dlp stderr analysis
//!
//! yt-dlp only reports *why* it failed as free text on stderr. These helpers
//! sort that text into a handful of kinds so the caller can tell an
//! authentication problem (fix the cookies) from everything else.

use serde::Serialize;

/// Kinds of yt-dlp failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YtDlpErrorType {
    /// The source wants a signed-in session, or our cookies are stale
    AuthenticationRequired,
    /// The site flagged the request as automated
    BotDetection,
    /// Private, removed, or region-locked media
    VideoUnavailable,
    /// Timeouts, DNS, refused connections
    NetworkError,
    /// Anything else
    Unknown,
}

const AUTH_MARKERS: &[&str] = &[
    "sign in to confirm",
    "please sign in",
    "login required",
    "requires authentication",
    "use --cookies",
    "cookies are no longer valid",
    "cookies have likely been rotated",
    "account cookies are no longer valid",
    "this video is available to this channel's members",
];

const BOT_MARKERS: &[&str] = &[
    "bot detection",
    "http error 403",
    "http error 429",
    "unable to extract",
    "signature extraction failed",
];

const UNAVAILABLE_MARKERS: &[&str] = &[
    "private video",
    "video unavailable",
    "this video is not available",
    "video is private",
    "video has been removed",
    "this video does not exist",
    "video is not available",
    "unsupported url",
    "http error 404",
];

const NETWORK_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection",
    "network is unreachable",
    "socket",
    "name or service not known",
    "temporary failure in name resolution",
    "failed to connect",
];

/// Analyzes yt-dlp stderr and determines the error type
///
/// Authentication markers win over everything else: "Sign in to confirm
/// you're not a bot" is an authentication problem, not bot detection.
pub fn analyze_ytdlp_error(stderr: &str) -> YtDlpErrorType {
    let stderr_lower = stderr.to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| stderr_lower.contains(m));

    if contains_any(AUTH_MARKERS) {
        YtDlpErrorType::AuthenticationRequired
    } else if contains_any(BOT_MARKERS) {
        YtDlpErrorType::BotDetection
    } else if contains_any(UNAVAILABLE_MARKERS) {
        YtDlpErrorType::VideoUnavailable
    } else if contains_any(NETWORK_MARKERS) {
        YtDlpErrorType::NetworkError
    } else {
        YtDlpErrorType::Unknown
    }
}

/// Returns the user-facing message for an error type
pub fn user_message(error_type: &YtDlpErrorType) -> String {
    match error_type {
        YtDlpErrorType::AuthenticationRequired => {
            "This media requires a signed-in session. The server's cookies are missing or expired.".to_string()
        }
        YtDlpErrorType::BotDetection => "The source blocked the request. Try again later.".to_string(),
        YtDlpErrorType::VideoUnavailable => {
            "This media is unavailable. It may be private, removed, or blocked in this region.".to_string()
        }
        YtDlpErrorType::NetworkError => "Network problem while contacting the source. Try again in a minute.".to_string(),
        YtDlpErrorType::Unknown => "Failed to fetch media. Check that the link is correct.".to_string(),
    }
}

/// Metrics label for an error type
pub fn metrics_label(error_type: &YtDlpErrorType) -> &'static str {
    match error_type {
        YtDlpErrorType::AuthenticationRequired => "authentication_required",
        YtDlpErrorType::BotDetection => "bot_detection",
        YtDlpErrorType::VideoUnavailable => "video_unavailable",
        YtDlpErrorType::NetworkError => "network",
        YtDlpErrorType::Unknown => "ytdlp_unknown",
    }
}

/// Last `max_lines` non-empty lines of stderr, for logs and error payloads.
pub fn stderr_tail(stderr: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_is_authentication() {
        let stderr = "ERROR: [youtube] dQw4w9WgXcQ: Sign in to confirm you're not a bot. \
                      Use --cookies-from-browser or --cookies for the authentication.";
        assert_eq!(analyze_ytdlp_error(stderr), YtDlpErrorType::AuthenticationRequired);
    }

    #[test]
    fn test_rotated_cookies_are_authentication() {
        let stderr = "WARNING: [youtube] The provided YouTube account cookies are no longer valid. \
                      They have likely been rotated in the browser as a security measure.";
        assert_eq!(analyze_ytdlp_error(stderr), YtDlpErrorType::AuthenticationRequired);
    }

    #[test]
    fn test_other_kinds() {
        assert_eq!(
            analyze_ytdlp_error("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            YtDlpErrorType::BotDetection
        );
        assert_eq!(
            analyze_ytdlp_error("ERROR: [youtube] abc: Private video"),
            YtDlpErrorType::VideoUnavailable
        );
        assert_eq!(
            analyze_ytdlp_error("ERROR: Unsupported URL: https://example.com/"),
            YtDlpErrorType::VideoUnavailable
        );
        assert_eq!(
            analyze_ytdlp_error("ERROR: <urlopen error [Errno -3] Temporary failure in name resolution>"),
            YtDlpErrorType::NetworkError
        );
        assert_eq!(analyze_ytdlp_error("ERROR: something odd"), YtDlpErrorType::Unknown);
        assert_eq!(analyze_ytdlp_error(""), YtDlpErrorType::Unknown);
    }

    #[test]
    fn test_stderr_tail() {
        let stderr = "one\n\ntwo\nthree\nfour\n";
        assert_eq!(stderr_tail(stderr, 2), "three\nfour");
        assert_eq!(stderr_tail(stderr, 10), "one\ntwo\nthree\nfour");
        assert_eq!(stderr_tail("", 3), "");
    }
}
