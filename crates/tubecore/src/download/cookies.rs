//! Cookie file provisioning for yt-dlp
//!
//! The cookie file is resolved once at startup and handed to the launcher.
//! When the content comes from configuration (plain or base64) it is
//! written to the configured path; otherwise an existing file at that path
//! is used as-is. Requests never touch the file.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use std::path::{Path, PathBuf};

use crate::core::config::CookiesConfig;

const NETSCAPE_HEADER: &str = "Netscape HTTP Cookie File";

/// A cookie file that exists on disk and is passed to yt-dlp as `--cookies`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves the cookie file for this process.
///
/// # Returns
/// * `Ok(Some(CookieFile))` - content was written, or a file already exists at the path
/// * `Ok(None)` - no cookies configured, only public media will work
/// * `Err` - configured content could not be decoded or written
pub async fn provision_cookies(config: &CookiesConfig) -> Result<Option<CookieFile>> {
    let path = config.resolved_path();

    if let Some(content) = configured_content(config)? {
        write_cookie_file(&path, &content).await?;
        log::info!(
            "✅ Cookies written to {} ({} entries)",
            path.display(),
            count_cookie_entries(&content)
        );
        return Ok(Some(CookieFile::new(path)));
    }

    if tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
        log::info!("Using existing cookie file {}", path.display());
        return Ok(Some(CookieFile::new(path)));
    }

    Ok(None)
}

/// Plain content wins over base64 content; blank values count as unset.
fn configured_content(config: &CookiesConfig) -> Result<Option<String>> {
    if let Some(content) = config.content.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        return Ok(Some(content.to_string()));
    }

    let Some(encoded) = config.content_base64.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };

    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| anyhow::anyhow!("Invalid base64 in cookie content: {}", e))?;
    let content = String::from_utf8(decoded).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in cookies: {}", e))?;
    let content = content.trim();

    Ok((!content.is_empty()).then(|| content.to_string()))
}

/// Writes via a temp file and rename so yt-dlp never sees a half-written file.
async fn write_cookie_file(path: &Path, content: &str) -> Result<()> {
    if !content.contains(NETSCAPE_HEADER) {
        log::warn!(
            "⚠️  Cookie content has no '# {}' header, yt-dlp may reject it",
            NETSCAPE_HEADER
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let temp_path = PathBuf::from(format!("{}.tmp.{}", path.display(), std::process::id()));
    let mut body = content.to_string();
    body.push('\n');

    tokio::fs::write(&temp_path, body)
        .await
        .with_context(|| format!("Failed to write temp cookies file {}", temp_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("Failed to restrict permissions on {}", temp_path.display()))?;
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(anyhow::anyhow!("Failed to move cookies into {}: {}", path.display(), e));
    }

    Ok(())
}

/// Netscape format: domain TAB flag TAB path TAB secure TAB expires TAB name TAB value
fn count_cookie_entries(content: &str) -> usize {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && (!l.starts_with('#') || l.starts_with("#HttpOnly_")))
        .filter(|l| l.split('\t').count() >= 7)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
        .youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc\n\
        #HttpOnly_.youtube.com\tTRUE\t/\tTRUE\t1999999999\tHSID\tdef\n";

    fn config_in(dir: &Path) -> CookiesConfig {
        CookiesConfig {
            path: dir.join("cookies.txt").to_string_lossy().into_owned(),
            content: None,
            content_base64: None,
        }
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = provision_cookies(&config_in(dir.path())).await.unwrap();
        assert!(cookies.is_none());
    }

    #[tokio::test]
    async fn test_plain_content_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = CookiesConfig {
            content: Some(format!("  {}  ", SAMPLE)),
            ..config_in(dir.path())
        };

        let cookies = provision_cookies(&config).await.unwrap().unwrap();
        let written = std::fs::read_to_string(cookies.path()).unwrap();
        assert_eq!(written, format!("{}\n", SAMPLE.trim()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(cookies.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_base64_content_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let config = CookiesConfig {
            content_base64: Some(general_purpose::STANDARD.encode(SAMPLE)),
            ..config_in(dir.path())
        };

        let cookies = provision_cookies(&config).await.unwrap().unwrap();
        let written = std::fs::read_to_string(cookies.path()).unwrap();
        assert!(written.starts_with("# Netscape HTTP Cookie File"));
    }

    #[tokio::test]
    async fn test_invalid_base64_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CookiesConfig {
            content_base64: Some("***not base64***".to_string()),
            ..config_in(dir.path())
        };
        assert!(provision_cookies(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_existing_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(config.resolved_path(), SAMPLE).unwrap();

        let cookies = provision_cookies(&config).await.unwrap();
        assert_eq!(cookies, Some(CookieFile::new(config.resolved_path())));
    }

    #[test]
    fn test_count_cookie_entries() {
        assert_eq!(count_cookie_entries(SAMPLE), 2);
        assert_eq!(count_cookie_entries("# just a comment\n\n"), 0);
    }
}
