//! tubecore - yt-dlp process orchestration for the tubeway front-end
//!
//! This library owns everything between an inbound media request and the
//! external `yt-dlp` binary: launching it safely, collecting and normalizing
//! its metadata, and relaying its media stream into a response body.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics and input validation
//! - `download`: process invocation, metadata fetcher, stream relay, cookies
//! - `testing`: scripted subprocess launcher (behind the `testing` feature)

pub mod core;
pub mod download;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use crate::core::config::Config;
pub use crate::core::error::{MediaError, MediaResult};
pub use download::metadata::{FormatDescriptor, MediaInfo, MetadataFetcher};
pub use download::process::{Invocation, InvocationMode, MediaRequest, ProcessHandle, ProcessLauncher, YtDlpLauncher};
pub use download::relay::{ChannelSink, MediaStream, RelayOutcome, ResponseSink, StreamRelay, WriterSink};
