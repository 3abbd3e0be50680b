//! Launching yt-dlp as a subprocess
//!
//! Everything that starts a yt-dlp process goes through [`ProcessLauncher`].
//! The real launcher builds an argument vector and hands it to the OS
//! directly, never through a shell, so nothing in a URL or format selector
//! can be interpreted as a command. The source URL always comes last,
//! after `--`, so yt-dlp cannot mistake it for an option either.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::io;
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::core::config::YtDlpConfig;
use crate::core::error::{MediaError, MediaResult};
use crate::core::metrics::ACTIVE_PROCESSES;
use crate::core::validation::validate_source_url;
use crate::download::cookies::CookieFile;

/// Format selector used when the client does not ask for one.
///
/// Handed to yt-dlp verbatim; it picks the concrete variant.
pub const DEFAULT_FORMAT: &str = "best";

/// Longest stderr line kept; longer lines are split.
const STDERR_LINE_LIMIT: u64 = 4096;

/// What a client asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub source_url: String,
    pub format_selector: String,
}

impl MediaRequest {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            format_selector: DEFAULT_FORMAT.to_string(),
        }
    }

    /// Sets the format selector; blank selectors keep the default.
    pub fn with_format(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        let selector = selector.trim();
        if !selector.is_empty() {
            self.format_selector = selector.to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// `--dump-single-json`: structured metadata on stdout
    Metadata,
    /// `--output -`: media bytes on stdout
    Stream,
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationMode::Metadata => write!(f, "metadata"),
            InvocationMode::Stream => write!(f, "stream"),
        }
    }
}

/// A validated request to run yt-dlp once.
///
/// Construction is the only place a source URL is checked, so an
/// `Invocation` that exists always points at an http(s) URL with a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    mode: InvocationMode,
    source_url: String,
    format_selector: Option<String>,
}

impl Invocation {
    pub fn metadata(source_url: &str) -> MediaResult<Self> {
        validate_source_url(source_url)?;
        Ok(Self {
            mode: InvocationMode::Metadata,
            source_url: source_url.trim().to_string(),
            format_selector: None,
        })
    }

    pub fn stream(source_url: &str, format_selector: &str) -> MediaResult<Self> {
        validate_source_url(source_url)?;
        let selector = match format_selector.trim() {
            "" => DEFAULT_FORMAT,
            s => s,
        };
        Ok(Self {
            mode: InvocationMode::Stream,
            source_url: source_url.trim().to_string(),
            format_selector: Some(selector.to_string()),
        })
    }

    pub fn mode(&self) -> InvocationMode {
        self.mode
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn format_selector(&self) -> Option<&str> {
        self.format_selector.as_deref()
    }

    /// Mode-specific arguments, without cookies, headers or the URL
    fn mode_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self.mode {
            InvocationMode::Metadata => {
                args.extend(["--dump-single-json", "--playlist-items", "1", "--no-warnings"].map(String::from));
            }
            InvocationMode::Stream => {
                args.push("--format".to_string());
                args.push(self.format_selector().unwrap_or(DEFAULT_FORMAT).to_string());
                args.extend(
                    [
                        "--output",
                        "-",
                        "--playlist-items",
                        "1",
                        "--no-progress",
                        "--no-warnings",
                    ]
                    .map(String::from),
                );
            }
        }
        args
    }
}

/// How a subprocess ended. `code` is `None` when it was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Control over a running child process
#[async_trait]
pub trait ChildControl: Send {
    fn id(&self) -> Option<u32>;

    /// Waits for the process to exit and reaps it.
    async fn wait(&mut self) -> io::Result<ProcessExit>;

    /// Kills the process and reaps it.
    async fn kill(&mut self) -> io::Result<()>;
}

#[async_trait]
impl ChildControl for tokio::process::Child {
    fn id(&self) -> Option<u32> {
        tokio::process::Child::id(self)
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let status = tokio::process::Child::wait(self).await?;
        Ok(ProcessExit { code: status.code() })
    }

    async fn kill(&mut self) -> io::Result<()> {
        tokio::process::Child::kill(self).await
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// One in-flight yt-dlp process.
///
/// Owned by exactly one operation. Its stdout and stderr can be taken once;
/// the exit status is cached after the first successful `wait`.
pub struct ProcessHandle {
    child: Box<dyn ChildControl>,
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    exit: Option<ProcessExit>,
}

impl ProcessHandle {
    pub fn new(child: Box<dyn ChildControl>, stdout: BoxedReader, stderr: BoxedReader) -> Self {
        ACTIVE_PROCESSES.inc();
        Self {
            child,
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit: None,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take()
    }

    pub async fn wait(&mut self) -> io::Result<ProcessExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let exit = self.child.wait().await?;
        self.exit = Some(exit);
        Ok(exit)
    }

    /// Kills the process if it is still running and reaps it.
    pub async fn terminate(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            log::debug!("Failed to kill yt-dlp (pid {:?}): {}", self.child.id(), e);
        }
        self.exit = Some(ProcessExit { code: None });
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        ACTIVE_PROCESSES.dec();
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.child.id())
            .field("exit", &self.exit)
            .finish()
    }
}

/// Drains yt-dlp's stderr to EOF, logging each line, and returns the last
/// `max_lines` lines once the pipe closes.
///
/// Lines are decoded lossily. The pipe is never closed early: yt-dlp would
/// die on its next write into it.
pub fn spawn_stderr_drain<R>(stderr: R, max_lines: usize) -> JoinHandle<String>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(max_lines.min(64));
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match (&mut reader).take(STDERR_LINE_LIMIT).read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    log::debug!("[yt-dlp] {}", line);
                    if max_lines == 0 {
                        continue;
                    }
                    if tail.len() == max_lines {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                }
                Err(e) => {
                    log::debug!("yt-dlp stderr read failed, discarding the rest: {}", e);
                    if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                        log::debug!("yt-dlp stderr discard failed: {}", e);
                    }
                    break;
                }
            }
        }
        Vec::from(tail).join("\n")
    })
}

/// Starts one subprocess per invocation
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, invocation: &Invocation) -> MediaResult<ProcessHandle>;
}

/// Launches the real yt-dlp binary
#[derive(Debug, Clone)]
pub struct YtDlpLauncher {
    bin: String,
    cookies: Option<CookieFile>,
    headers: Vec<String>,
    ffmpeg_location: Option<String>,
    extra_args: Vec<String>,
}

impl YtDlpLauncher {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            cookies: None,
            headers: Vec::new(),
            ffmpeg_location: None,
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &YtDlpConfig, cookies: Option<CookieFile>) -> Self {
        Self {
            bin: config.bin.clone(),
            cookies,
            headers: config.headers.clone(),
            ffmpeg_location: config.ffmpeg_location.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    pub fn with_cookies(mut self, cookies: CookieFile) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    /// Full argument vector for an invocation. The URL is always last.
    pub fn build_args(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = invocation.mode_args();

        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.path().to_string_lossy().into_owned());
        }
        for header in &self.headers {
            args.push("--add-header".to_string());
            args.push(header.clone());
        }
        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.clone());
        }
        args.extend(self.extra_args.iter().cloned());

        args.push("--".to_string());
        args.push(invocation.source_url().to_string());
        args
    }
}

impl ProcessLauncher for YtDlpLauncher {
    fn launch(&self, invocation: &Invocation) -> MediaResult<ProcessHandle> {
        let args = self.build_args(invocation);
        log::debug!("[{}] {} {}", invocation.mode(), self.bin, args.join(" "));

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.bin, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("yt-dlp stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("yt-dlp stderr was not captured"))?;

        log::debug!("Spawned yt-dlp {} (pid {:?})", invocation.mode(), child.id());
        Ok(ProcessHandle::new(Box::new(child), Box::new(stdout), Box::new(stderr)))
    }
}

/// A binary that cannot be found or executed is a deployment problem.
fn spawn_error(bin: &str, err: io::Error) -> MediaError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            log::error!("❌ Cannot launch yt-dlp binary '{}': {}", bin, err);
            MediaError::ToolUnavailable {
                bin: bin.to_string(),
                source: err,
            }
        }
        _ => MediaError::Io(err),
    }
}
