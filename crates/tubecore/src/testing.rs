//! In-memory stand-ins for yt-dlp subprocesses
//!
//! [`ScriptedLauncher`] implements [`ProcessLauncher`] without spawning
//! anything: each launch plays back a [`ProcessScript`] (stdout chunks,
//! stderr text, an exit code) through real async pipes, so the code under
//! test sees backpressure, EOF and kills the same way it would with a real
//! child. The launcher records every invocation and every kill.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::core::error::{MediaError, MediaResult};
use crate::download::process::{ChildControl, Invocation, ProcessExit, ProcessHandle, ProcessLauncher};
use crate::download::relay::{ResponseSink, SinkClosed};

/// Size of the simulated stdout pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// What a simulated yt-dlp process does
#[derive(Debug, Clone, Default)]
pub struct ProcessScript {
    stdout: Vec<Bytes>,
    stderr: Vec<u8>,
    exit_code: i32,
    hang_after_output: bool,
    chunk_delay: Option<Duration>,
}

impl ProcessScript {
    /// Exits 0 without output
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints `info` as a `--dump-single-json` payload and exits 0
    pub fn metadata(info: &serde_json::Value) -> Self {
        Self::new().stdout(info.to_string())
    }

    /// Appends one stdout write
    pub fn stdout(mut self, chunk: impl Into<Bytes>) -> Self {
        self.stdout.push(chunk.into());
        self
    }

    /// Appends raw stderr output, which need not be valid UTF-8
    pub fn stderr(mut self, text: impl AsRef<[u8]>) -> Self {
        self.stderr.extend_from_slice(text.as_ref());
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Keeps stdout open and never exits once the output is written
    pub fn hang_after_output(mut self) -> Self {
        self.hang_after_output = true;
        self
    }

    /// Sleeps before every stdout write
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

/// [`ProcessLauncher`] that plays back a script instead of spawning yt-dlp
pub struct ScriptedLauncher {
    script: ProcessScript,
    unavailable: bool,
    invocations: Mutex<Vec<Invocation>>,
    kills: Arc<AtomicUsize>,
    kill_notify: Arc<Notify>,
    next_pid: AtomicU32,
}

impl ScriptedLauncher {
    pub fn new(script: ProcessScript) -> Self {
        Self {
            script,
            unavailable: false,
            invocations: Mutex::new(Vec::new()),
            kills: Arc::new(AtomicUsize::new(0)),
            kill_notify: Arc::new(Notify::new()),
            next_pid: AtomicU32::new(4000),
        }
    }

    /// Every launch fails as if the binary were missing
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(ProcessScript::new())
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn launch_count(&self) -> usize {
        self.invocations.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Resolves once at least one launched process has been killed
    pub async fn killed(&self) {
        loop {
            let notified = self.kill_notify.notified();
            if self.kill_count() > 0 {
                return;
            }
            notified.await;
        }
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&self, invocation: &Invocation) -> MediaResult<ProcessHandle> {
        if self.unavailable {
            return Err(MediaError::ToolUnavailable {
                bin: "yt-dlp".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(invocation.clone());

        let (mut child_stdout, our_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let script = self.script.clone();
        let writer = tokio::spawn(async move {
            for chunk in script.stdout {
                if let Some(delay) = script.chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                if child_stdout.write_all(&chunk).await.is_err() {
                    return;
                }
            }
            if script.hang_after_output {
                std::future::pending::<()>().await;
            }
        });

        let child = ScriptedChild {
            id: self.next_pid.fetch_add(1, Ordering::SeqCst),
            writer: Some(writer),
            exit_code: self.script.exit_code,
            killed: false,
            kills: self.kills.clone(),
            kill_notify: self.kill_notify.clone(),
        };
        let stderr = io::Cursor::new(self.script.stderr.clone());

        Ok(ProcessHandle::new(Box::new(child), Box::new(our_stdout), Box::new(stderr)))
    }
}

struct ScriptedChild {
    id: u32,
    /// Writes the scripted stdout; the process "exits" when it finishes
    writer: Option<JoinHandle<()>>,
    exit_code: i32,
    killed: bool,
    kills: Arc<AtomicUsize>,
    kill_notify: Arc<Notify>,
}

#[async_trait]
impl ChildControl for ScriptedChild {
    fn id(&self) -> Option<u32> {
        Some(self.id)
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        if self.killed {
            return Ok(ProcessExit { code: None });
        }
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.await;
            self.writer = None;
        }
        Ok(ProcessExit {
            code: Some(self.exit_code),
        })
    }

    async fn kill(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if !self.killed {
            self.killed = true;
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.kill_notify.notify_one();
        }
        Ok(())
    }
}

impl Drop for ScriptedChild {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

/// Sink that keeps everything it is given
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub chunks: Vec<Bytes>,
    pub finished: bool,
    pub aborted: Option<String>,
    close_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `chunks` chunks, then behaves like a departed client
    pub fn closing_after(chunks: usize) -> Self {
        Self {
            close_after: Some(chunks),
            ..Self::default()
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    fn is_gone(&self) -> bool {
        self.close_after.is_some_and(|limit| self.chunks.len() >= limit)
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        if self.is_gone() {
            return Err(SinkClosed);
        }
        self.chunks.push(chunk);
        Ok(())
    }

    async fn closed(&mut self) {
        if !self.is_gone() {
            std::future::pending::<()>().await;
        }
    }

    async fn finish(&mut self) {
        self.finished = true;
    }

    async fn abort(&mut self, reason: &str) {
        self.aborted = Some(reason.to_string());
    }
}

/// Canned yt-dlp payloads
pub mod fixtures {
    use serde_json::{json, Value};

    /// A `--dump-single-json` payload for one YouTube video with three formats:
    /// audio-only `140`, muxed `18` and video-only `137`.
    pub fn video_metadata(id: &str) -> Value {
        json!({
            "id": id,
            "title": "Never Gonna Give You Up",
            "thumbnail": format!("https://i.ytimg.com/vi/{}/maxresdefault.jpg", id),
            "duration": 212,
            "uploader": "Rick Astley",
            "channel": "Rick Astley",
            "webpage_url": format!("https://www.youtube.com/watch?v={}", id),
            "original_url": format!("https://youtu.be/{}", id),
            "extractor": "youtube",
            "formats": [
                {
                    "format_id": "140",
                    "ext": "m4a",
                    "vcodec": "none",
                    "acodec": "mp4a.40.2",
                    "resolution": "audio only",
                    "filesize": 3433514
                },
                {
                    "format_id": "18",
                    "ext": "mp4",
                    "vcodec": "avc1.42001E",
                    "acodec": "mp4a.40.2",
                    "resolution": "640x360",
                    "height": 360,
                    "filesize_approx": 11863742
                },
                {
                    "format_id": "137",
                    "ext": "mp4",
                    "vcodec": "avc1.640028",
                    "acodec": "none",
                    "height": 1080,
                    "filesize": null,
                    "filesize_approx": 80000000
                }
            ]
        })
    }
}
