//! Relaying yt-dlp's media stream into a response body
//!
//! A stream is relayed in two phases:
//!
//! 1. [`StreamRelay::open`] launches yt-dlp and waits for its first chunk of
//!    output. A failure here is an ordinary error and the caller can still
//!    answer with an error status.
//! 2. [`MediaStream::relay`] runs after the caller has committed to a
//!    successful response. From then on a failure can only cut the body
//!    short via [`ResponseSink::abort`].
//!
//! Memory stays bounded: one read buffer here plus whatever the sink
//! queues. The relay never reads more from the pipe until the sink has
//! accepted the previous chunk, so a slow client makes yt-dlp block on a
//! full pipe instead of piling bytes up in memory.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::config::Config;
use crate::core::error::{MediaError, MediaResult};
use crate::core::metrics;
use crate::download::process::{
    spawn_stderr_drain, BoxedReader, Invocation, InvocationMode, MediaRequest, ProcessHandle, ProcessLauncher,
};
use crate::download::ytdlp_errors::{analyze_ytdlp_error, YtDlpErrorType};

/// Lines of stderr kept for the failure report
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the stderr reader once the process is gone
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// The consumer of a response went away
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("response consumer is gone")]
pub struct SinkClosed;

/// Where relayed media goes
#[async_trait]
pub trait ResponseSink: Send {
    /// Hands over one chunk, waiting for capacity.
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;

    /// Resolves once the consumer is known to be gone.
    async fn closed(&mut self);

    /// Ends the body normally.
    async fn finish(&mut self);

    /// Ends the body abnormally so the client can tell the download is incomplete.
    async fn abort(&mut self, reason: &str);
}

/// Item type of the channel behind [`ChannelSink`]
pub type BodyChunk = io::Result<Bytes>;

/// Sink feeding a bounded channel, drained by an HTTP response body
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<BodyChunk>>,
}

impl ChannelSink {
    /// Creates the sink and the receiver the response body reads from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        let tx = self.tx.as_ref().ok_or(SinkClosed)?;
        tx.send(Ok(chunk)).await.map_err(|_| SinkClosed)
    }

    async fn closed(&mut self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    async fn finish(&mut self) {
        self.tx = None;
    }

    /// Waits for room in the channel however long it takes: dropping the
    /// sender without the error item would end the body cleanly. The wait
    /// ends once the body reads on or is dropped.
    async fn abort(&mut self, reason: &str) {
        if let Some(tx) = self.tx.take() {
            let err = io::Error::other(reason.to_string());
            if tx.send(Err(err)).await.is_err() {
                log::debug!("Response body already dropped, nothing to abort");
            }
        }
    }
}

/// Sink writing into any async writer (a file, stdout)
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ResponseSink for WriterSink<W> {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.writer.write_all(&chunk).await.map_err(|e| {
            log::warn!("Write failed: {}", e);
            SinkClosed
        })
    }

    /// A writer has no independent notion of its consumer leaving; write errors cover it.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }

    async fn finish(&mut self) {
        if let Err(e) = self.writer.flush().await {
            log::warn!("Flush failed: {}", e);
        }
        if let Err(e) = self.writer.shutdown().await {
            log::debug!("Shutdown failed: {}", e);
        }
    }

    async fn abort(&mut self, reason: &str) {
        log::warn!("Output is incomplete: {}", reason);
        if let Err(e) = self.writer.flush().await {
            log::warn!("Flush failed: {}", e);
        }
    }
}

/// How a relay that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// yt-dlp exited 0 and the sink took every byte
    Completed { bytes_sent: u64 },
    /// The consumer left; yt-dlp was killed
    ClientDisconnected { bytes_sent: u64 },
}

impl RelayOutcome {
    pub fn bytes_sent(&self) -> u64 {
        match self {
            RelayOutcome::Completed { bytes_sent } | RelayOutcome::ClientDisconnected { bytes_sent } => *bytes_sent,
        }
    }
}

/// Starts media streams, one yt-dlp process per stream
#[derive(Clone)]
pub struct StreamRelay {
    launcher: Arc<dyn ProcessLauncher>,
    buffer_size: usize,
    timeout: Option<Duration>,
}

impl StreamRelay {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        let config = Config::default();
        Self::from_config(launcher, &config)
    }

    pub fn from_config(launcher: Arc<dyn ProcessLauncher>, config: &Config) -> Self {
        Self {
            launcher,
            buffer_size: config.relay.buffer_size,
            timeout: config.ytdlp.stream_timeout(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Launches yt-dlp and waits until it has produced output or exited.
    ///
    /// Errors returned here happen before any byte reached the client.
    pub async fn open(&self, request: &MediaRequest) -> MediaResult<MediaStream> {
        let started = Instant::now();
        let result = self.open_inner(request, started).await;
        if let Err(e) = &result {
            metrics::record_stream_outcome(e.category(), started.elapsed().as_secs_f64());
            metrics::record_error(e.category(), "stream");
        }
        result
    }

    async fn open_inner(&self, request: &MediaRequest, started: Instant) -> MediaResult<MediaStream> {
        let invocation = Invocation::stream(&request.source_url, &request.format_selector)?;
        let mut handle = self.launcher.launch(&invocation)?;
        log::info!(
            "Streaming {} as '{}' (pid {:?})",
            invocation.source_url(),
            invocation.format_selector().unwrap_or_default(),
            handle.id()
        );

        let stderr = handle.take_stderr().map(|stderr| spawn_stderr_drain(stderr, STDERR_TAIL_LINES));
        let stdout = handle
            .take_stdout()
            .ok_or_else(|| io::Error::other("yt-dlp stdout already taken"))?;

        let mut stream = MediaStream {
            handle,
            stdout,
            stderr,
            first_chunk: None,
            buffer_size: self.buffer_size,
            timeout: self.timeout,
            deadline: self.timeout.map(|t| started + t),
            started,
            source_url: invocation.source_url().to_string(),
        };

        let mut scratch = vec![0u8; self.buffer_size];
        let read = {
            let deadline = until_deadline(stream.deadline);
            tokio::pin!(deadline);
            tokio::select! {
                read = stream.stdout.read(&mut scratch) => Some(read),
                _ = &mut deadline => None,
            }
        };

        match read {
            None => {
                stream.handle.terminate().await;
                log::warn!("yt-dlp produced nothing for {} before the deadline", stream.source_url);
                Err(stream.timeout_error())
            }
            Some(Err(e)) => {
                stream.handle.terminate().await;
                let stderr = stream.collect_stderr().await;
                Err(MediaError::StreamFailure {
                    bytes_sent: 0,
                    exit_code: None,
                    stderr: format!("{}\n{}", e, stderr).trim().to_string(),
                })
            }
            Some(Ok(0)) => stream.open_without_output().await,
            Some(Ok(n)) => {
                stream.first_chunk = Some(Bytes::copy_from_slice(&scratch[..n]));
                Ok(stream)
            }
        }
    }
}

/// A running yt-dlp stream that has produced its first chunk (or exited
/// cleanly without output) and is ready to be relayed
pub struct MediaStream {
    handle: ProcessHandle,
    stdout: BoxedReader,
    stderr: Option<JoinHandle<String>>,
    first_chunk: Option<Bytes>,
    buffer_size: usize,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    started: Instant,
    source_url: String,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("source_url", &self.source_url)
            .field("handle", &self.handle)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl MediaStream {
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Pipes the rest of the stream into `sink`.
    ///
    /// On error the sink has already been aborted.
    pub async fn relay<S>(mut self, sink: &mut S) -> MediaResult<RelayOutcome>
    where
        S: ResponseSink + ?Sized,
    {
        let result = self.pump(sink).await;
        let elapsed = self.started.elapsed().as_secs_f64();

        match &result {
            Ok(RelayOutcome::Completed { bytes_sent }) => {
                log::info!("Streamed {} bytes of {} in {:.1}s", bytes_sent, self.source_url, elapsed);
                metrics::record_stream_outcome("completed", elapsed);
            }
            Ok(RelayOutcome::ClientDisconnected { bytes_sent }) => {
                log::info!(
                    "Client left {} after {} bytes, yt-dlp killed",
                    self.source_url,
                    bytes_sent
                );
                metrics::record_stream_outcome("client_disconnected", elapsed);
            }
            Err(e) => {
                log::warn!("Stream of {} failed: {}", self.source_url, e);
                metrics::record_stream_outcome(e.category(), elapsed);
                metrics::record_error(e.category(), "stream");
            }
        }
        result
    }

    async fn pump<S>(&mut self, sink: &mut S) -> MediaResult<RelayOutcome>
    where
        S: ResponseSink + ?Sized,
    {
        let mut bytes_sent: u64 = 0;
        let mut scratch = vec![0u8; self.buffer_size];
        let mut pending = self.first_chunk.take();

        let deadline = until_deadline(self.deadline);
        tokio::pin!(deadline);

        loop {
            if let Some(chunk) = pending.take() {
                let len = chunk.len() as u64;
                tokio::select! {
                    sent = sink.send(chunk) => match sent {
                        Ok(()) => {
                            bytes_sent += len;
                            metrics::STREAM_BYTES_TOTAL.inc_by(len);
                        }
                        Err(SinkClosed) => return Ok(self.disconnect(bytes_sent).await),
                    },
                    _ = &mut deadline => return Err(self.time_out(sink, bytes_sent).await),
                }
            }

            let read = tokio::select! {
                read = self.stdout.read(&mut scratch) => read,
                _ = sink.closed() => return Ok(self.disconnect(bytes_sent).await),
                _ = &mut deadline => return Err(self.time_out(sink, bytes_sent).await),
            };

            match read {
                Ok(0) => break,
                Ok(n) => pending = Some(Bytes::copy_from_slice(&scratch[..n])),
                Err(e) => {
                    self.handle.terminate().await;
                    let stderr = self.collect_stderr().await;
                    sink.abort("yt-dlp output pipe failed").await;
                    return Err(MediaError::StreamFailure {
                        bytes_sent,
                        exit_code: None,
                        stderr: format!("{}\n{}", e, stderr).trim().to_string(),
                    });
                }
            }
        }

        let exit = tokio::select! {
            exit = self.handle.wait() => exit,
            _ = &mut deadline => return Err(self.time_out(sink, bytes_sent).await),
        };
        let stderr = self.collect_stderr().await;

        match exit {
            Ok(exit) if exit.success() => {
                sink.finish().await;
                Ok(RelayOutcome::Completed { bytes_sent })
            }
            Ok(exit) => {
                sink.abort("yt-dlp exited with an error").await;
                Err(MediaError::StreamFailure {
                    bytes_sent,
                    exit_code: exit.code,
                    stderr,
                })
            }
            Err(e) => {
                sink.abort("yt-dlp could not be reaped").await;
                Err(MediaError::StreamFailure {
                    bytes_sent,
                    exit_code: None,
                    stderr: format!("{}\n{}", e, stderr).trim().to_string(),
                })
            }
        }
    }

    /// EOF before the first byte: the exit status decides between an empty
    /// successful stream and a failure reported before the commit point.
    async fn open_without_output(mut self) -> MediaResult<MediaStream> {
        let waited = match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.handle.wait()).await.ok(),
            None => Some(self.handle.wait().await),
        };

        let exit = match waited {
            Some(exit) => exit?,
            None => {
                self.handle.terminate().await;
                return Err(self.timeout_error());
            }
        };

        let stderr = self.collect_stderr().await;
        if exit.success() {
            log::warn!("yt-dlp exited 0 without any output for {}", self.source_url);
            return Ok(self);
        }

        let kind = analyze_ytdlp_error(&stderr);
        log::warn!(
            "yt-dlp stream failed before any output for {} (exit {:?}, {:?})",
            self.source_url,
            exit.code,
            kind
        );
        Err(match kind {
            YtDlpErrorType::AuthenticationRequired => MediaError::AuthenticationRequired { stderr },
            _ => MediaError::StreamFailure {
                bytes_sent: 0,
                exit_code: exit.code,
                stderr,
            },
        })
    }

    async fn disconnect(&mut self, bytes_sent: u64) -> RelayOutcome {
        log::debug!("Killing yt-dlp (pid {:?}) for {}", self.handle.id(), self.source_url);
        self.handle.terminate().await;
        if let Some(task) = self.stderr.take() {
            task.abort();
        }
        RelayOutcome::ClientDisconnected { bytes_sent }
    }

    async fn time_out<S>(&mut self, sink: &mut S, bytes_sent: u64) -> MediaError
    where
        S: ResponseSink + ?Sized,
    {
        log::warn!(
            "yt-dlp stream of {} hit its deadline after {} bytes, killing it",
            self.source_url,
            bytes_sent
        );
        self.handle.terminate().await;
        if let Some(task) = self.stderr.take() {
            task.abort();
        }
        sink.abort("yt-dlp stream timed out").await;
        self.timeout_error()
    }

    fn timeout_error(&self) -> MediaError {
        MediaError::Timeout {
            mode: InvocationMode::Stream,
            after: self.timeout.unwrap_or_default(),
        }
    }

    async fn collect_stderr(&mut self) -> String {
        match self.stderr.take() {
            Some(task) => match tokio::time::timeout(STDERR_GRACE, task).await {
                Ok(Ok(tail)) => tail,
                _ => String::new(),
            },
            None => String::new(),
        }
    }
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
