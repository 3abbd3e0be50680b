//! yt-dlp invocation, metadata and media streaming

pub mod cookies;
pub mod metadata;
pub mod process;
pub mod relay;
pub mod ytdlp;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use cookies::{provision_cookies, CookieFile};
pub use metadata::{parse_metadata, FormatDescriptor, MediaInfo, MetadataFetcher};
pub use process::{Invocation, InvocationMode, MediaRequest, ProcessExit, ProcessHandle, ProcessLauncher, YtDlpLauncher};
pub use relay::{ChannelSink, MediaStream, RelayOutcome, ResponseSink, SinkClosed, StreamRelay, WriterSink};
pub use ytdlp::probe_version;
