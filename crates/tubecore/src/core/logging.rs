//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + optional file)
//! - A startup report of the yt-dlp and cookie configuration

use anyhow::Result;
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::str::FromStr;

use crate::core::config::{Config, LogConfig};
use crate::download::cookies::CookieFile;

/// Initialize logger for console and, when configured, file output
///
/// # Arguments
/// * `log` - Level and optional file path
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Bad level, unwritable log file, or a logger was already installed
pub fn init_logger(log: &LogConfig) -> Result<()> {
    let level = LevelFilter::from_str(&log.level)
        .map_err(|_| anyhow::anyhow!("Unknown log level '{}'", log.level))?;

    let config = ConfigBuilder::new()
        // hyper and tower are chatty at debug
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("tower")
        .build();

    // stderr only: `download` without `-o` writes media to stdout
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(path) = &log.file {
        let log_file = File::create(path).map_err(|e| anyhow::anyhow!("Failed to create log file {}: {}", path, e))?;
        loggers.push(WriteLogger::new(level, config, log_file));
    }

    CombinedLogger::init(loggers).map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the effective configuration at application startup
///
/// Covers the yt-dlp binary and version, timeouts, relay buffering and
/// whether requests will carry a cookie file.
pub fn log_startup_configuration(config: &Config, ytdlp_version: &str, cookies: Option<&CookieFile>) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("tubeway configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("yt-dlp binary:    {} (version {})", config.ytdlp.bin, ytdlp_version);
    log::info!(
        "timeouts:         metadata {}, stream {}",
        describe_timeout(config.ytdlp.metadata_timeout_secs),
        describe_timeout(config.ytdlp.stream_timeout_secs)
    );
    log::info!(
        "relay buffering:  {} bytes x {} chunks",
        config.relay.buffer_size,
        config.relay.channel_capacity
    );
    if !config.ytdlp.headers.is_empty() {
        log::info!("extra headers:    {}", config.ytdlp.headers.join(", "));
    }

    match cookies {
        Some(file) => {
            log::info!("✅ Cookies: {}", file.path().display());
            log::info!("   Restricted and age-gated media should be reachable");
        }
        None => {
            log::warn!("⚠️  Cookies: none configured. Public videos only.");
            log::warn!("   Set YOUTUBE_COOKIES (Netscape format) or mount a file at {}", config.cookies.path);
        }
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn describe_timeout(secs: u64) -> String {
    if secs == 0 {
        "disabled".to_string()
    } else {
        format!("{}s", secs)
    }
}
