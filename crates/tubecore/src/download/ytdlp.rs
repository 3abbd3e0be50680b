use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::error::{MediaError, MediaResult};

/// `--version` should answer almost instantly; anything slower is broken.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks that yt-dlp can be executed and returns its version string.
///
/// Called once at startup. A binary that cannot be launched, hangs, or
/// fails `--version` is reported as [`MediaError::ToolUnavailable`], which
/// the service treats as fatal.
pub async fn probe_version(bin: &str) -> MediaResult<String> {
    log::info!("Checking yt-dlp version...");

    let unavailable = |source: std::io::Error| MediaError::ToolUnavailable {
        bin: bin.to_string(),
        source,
    };

    let output = timeout(
        PROBE_TIMEOUT,
        Command::new(bin)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| {
        unavailable(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("--version did not answer within {}s", PROBE_TIMEOUT.as_secs()),
        ))
    })?
    .map_err(unavailable)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(unavailable(std::io::Error::other(format!(
            "--version exited with {}: {}",
            output.status,
            stderr.trim()
        ))));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    log::info!("Current yt-dlp version: {}", version);
    Ok(version)
}
