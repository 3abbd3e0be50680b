//! URL and filename validation utilities
//!
//! Provides security-focused validation for user inputs:
//! - Source URL validation (http/https with a host, nothing else)
//! - Filename sanitization for `Content-Disposition` headers

use thiserror::Error;
use url::Url;

/// Validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Nothing (or only whitespace) was supplied
    #[error("Missing URL")]
    MissingUrl,

    /// Not parseable as an absolute URL
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    /// Parsed, but not something yt-dlp should be pointed at
    #[error("Unsupported URL '{url}': {reason}")]
    UnsupportedUrl { url: String, reason: String },
}

/// Validates a source URL and returns it parsed.
///
/// # Security
/// - Empty or whitespace-only input is rejected
/// - Only HTTP/HTTPS schemes are allowed (no `file://`, no extractor prefixes like `ytsearch:`)
/// - A host is required
///
/// # Examples
/// ```
/// use tubecore::core::validation::validate_source_url;
///
/// assert!(validate_source_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
/// assert!(validate_source_url("https://vimeo.com/76979871").is_ok());
///
/// assert!(validate_source_url("   ").is_err());
/// assert!(validate_source_url("file:///etc/passwd").is_err());
/// assert!(validate_source_url("not a url").is_err());
/// ```
pub fn validate_source_url(raw: &str) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingUrl);
    }

    let parsed = Url::parse(trimmed).map_err(|e| ValidationError::MalformedUrl(format!("{} ({})", trimmed, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::UnsupportedUrl {
            url: trimmed.to_string(),
            reason: format!("invalid scheme: {}", parsed.scheme()),
        });
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(ValidationError::UnsupportedUrl {
            url: trimmed.to_string(),
            reason: "no host".to_string(),
        }),
    }
}

/// Sanitizes a filename by removing characters that are unsafe in file
/// systems or in a quoted header parameter.
///
/// # Examples
/// ```
/// use tubecore::core::validation::sanitize_filename;
///
/// assert_eq!(sanitize_filename("video.mp4"), "video.mp4");
/// assert_eq!(sanitize_filename("video:file.mp4"), "videofile.mp4");
/// assert_eq!(sanitize_filename("path/to/file.mp4"), "pathtofile.mp4");
/// assert_eq!(sanitize_filename("say \"hi\".mp4"), "say hi.mp4");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        // Remove filesystem-unsafe characters
        .filter(|c| !['/', '\\', ':', '*', '?', '"', '<', '>', '|'].contains(c))
        // Remove control characters
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// ASCII-only fallback for the plain `filename=` header parameter.
///
/// Non-ASCII characters become `_`; the full name goes in `filename*`.
pub fn ascii_filename(name: &str) -> String {
    sanitize_filename(name)
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect()
}
