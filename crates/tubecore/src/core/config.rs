//! Layered service configuration
//!
//! Values are resolved once at startup, in increasing priority:
//! built-in defaults, an optional TOML file, `TUBEWAY_*` environment
//! variables (`__` separates nested keys), and the legacy variables the
//! service has always honoured (`PORT`, `YTDL_BIN`, `YOUTUBE_COOKIES`,
//! `YOUTUBE_COOKIES_B64`, `YOUTUBE_COOKIES_PATH`).
//!
//! The resulting [`Config`] is passed explicitly to the components that
//! need it; nothing reads the environment at request time.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for structured environment overrides, e.g. `TUBEWAY_SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "TUBEWAY_";

/// Config file picked up from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "tubeway.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ytdlp: YtDlpConfig,
    pub relay: RelayConfig,
    pub metadata: MetadataConfig,
    pub cookies: CookiesConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YtDlpConfig {
    /// yt-dlp binary name or path
    pub bin: String,
    /// Wall-clock limit for metadata dumps, 0 disables
    pub metadata_timeout_secs: u64,
    /// Wall-clock limit for a whole media stream, 0 disables
    pub stream_timeout_secs: u64,
    /// Passed as `--add-header` (e.g. `referer:youtube.com`)
    pub headers: Vec<String>,
    /// Passed as `--ffmpeg-location`
    pub ffmpeg_location: Option<String>,
    /// Operator-supplied arguments appended before the URL
    pub extra_args: Vec<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            bin: "yt-dlp".to_string(),
            metadata_timeout_secs: 240, // slow extractors can take minutes
            stream_timeout_secs: 3600,
            headers: Vec::new(),
            ffmpeg_location: None,
            extra_args: Vec::new(),
        }
    }
}

impl YtDlpConfig {
    pub fn metadata_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.metadata_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.stream_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upper bound for a single chunk read from yt-dlp's stdout
    pub buffer_size: usize,
    /// Chunks allowed in flight between the relay and the response body
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            channel_capacity: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Largest metadata payload accepted from yt-dlp
    pub max_bytes: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookiesConfig {
    /// Where the cookie file lives (or is written to at startup)
    pub path: String,
    /// Netscape cookie file content to write to `path` at startup
    pub content: Option<String>,
    /// Same as `content`, base64-encoded
    pub content_base64: Option<String>,
}

impl Default for CookiesConfig {
    fn default() -> Self {
        Self {
            path: "/tmp/cookies.txt".to_string(),
            content: None,
            content_base64: None,
        }
    }
}

impl CookiesConfig {
    /// Cookie path with `~` expanded
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of error, warn, info, debug, trace
    pub level: String,
    /// Also write logs to this file
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Legacy environment variables and the config keys they feed.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("port", "server.port"),
    ("ytdl_bin", "ytdlp.bin"),
    ("youtube_cookies", "cookies.content"),
    ("youtube_cookies_b64", "cookies.content_base64"),
    ("youtube_cookies_path", "cookies.path"),
];

impl Config {
    /// Builds the figment used by [`Config::load`].
    ///
    /// `file` is an explicit config path; without it `tubeway.toml` in the
    /// working directory is used when present.
    pub fn figment(file: Option<&Path>) -> Figment {
        let toml = match file {
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        let legacy_keys: Vec<&str> = LEGACY_ENV.iter().map(|(env, _)| *env).collect();

        Figment::from(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().only(&legacy_keys).map(|key| {
                let lowered = key.as_str().to_ascii_lowercase();
                LEGACY_ENV
                    .iter()
                    .find(|(env, _)| *env == lowered)
                    .map(|(_, target)| (*target).into())
                    .unwrap_or_else(|| lowered.into())
            }))
    }

    /// Resolves the configuration from every source.
    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        let config: Config = Self::figment(file).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), figment::Error> {
        if self.ytdlp.bin.trim().is_empty() {
            return Err(figment::Error::from("ytdlp.bin must not be empty".to_string()));
        }
        if self.relay.buffer_size == 0 {
            return Err(figment::Error::from("relay.buffer_size must be greater than zero".to_string()));
        }
        if self.relay.channel_capacity == 0 {
            return Err(figment::Error::from(
                "relay.channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load(None)?;
            assert_eq!(config, Config::default());
            assert_eq!(config.ytdlp.metadata_timeout(), Some(Duration::from_secs(240)));
            assert_eq!(config.server.port, 10000);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_and_prefixed_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tubeway.toml",
                r#"
                [ytdlp]
                bin = "/opt/yt-dlp"
                headers = ["referer:youtube.com", "user-agent:Mozilla/5.0"]

                [relay]
                buffer_size = 4096
                "#,
            )?;
            jail.set_env("TUBEWAY_SERVER__PORT", "8081");
            jail.set_env("TUBEWAY_YTDLP__STREAM_TIMEOUT_SECS", "0");

            let config = Config::load(None)?;
            assert_eq!(config.ytdlp.bin, "/opt/yt-dlp");
            assert_eq!(config.ytdlp.headers.len(), 2);
            assert_eq!(config.relay.buffer_size, 4096);
            assert_eq!(config.server.port, 8081);
            assert_eq!(config.ytdlp.stream_timeout(), None);
            Ok(())
        });
    }

    #[test]
    fn test_legacy_env_names() {
        Jail::expect_with(|jail| {
            jail.set_env("PORT", "5000");
            jail.set_env("YTDL_BIN", "/usr/local/bin/yt-dlp");
            jail.set_env("YOUTUBE_COOKIES_PATH", "/run/secrets/cookies.txt");
            jail.set_env("YOUTUBE_COOKIES", "# Netscape HTTP Cookie File");

            let config = Config::load(None)?;
            assert_eq!(config.server.port, 5000);
            assert_eq!(config.ytdlp.bin, "/usr/local/bin/yt-dlp");
            assert_eq!(config.cookies.path, "/run/secrets/cookies.txt");
            assert_eq!(config.cookies.content.as_deref(), Some("# Netscape HTTP Cookie File"));
            Ok(())
        });
    }

    #[test]
    fn test_zero_buffer_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("TUBEWAY_RELAY__BUFFER_SIZE", "0");
            assert!(Config::load(None).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_cookie_path_tilde_expansion() {
        let cookies = CookiesConfig {
            path: "~/cookies.txt".to_string(),
            ..Default::default()
        };
        assert!(!cookies.resolved_path().to_string_lossy().starts_with('~'));
    }
}
