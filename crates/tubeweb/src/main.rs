use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use tubecore::core::{init_logger, log_startup_configuration};
use tubecore::download::{probe_version, provision_cookies, CookieFile};
use tubecore::{Config, MediaRequest, MetadataFetcher, RelayOutcome, StreamRelay, WriterSink, YtDlpLauncher};
use tubeweb::cli::{Cli, Commands};
use tubeweb::{start_server, AppState};

/// Main entry point for tubeway
///
/// # Errors
/// Returns an error if initialization fails (config, logging, cookies, yt-dlp
/// probe) or if the selected command fails.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present, before config reads them
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_logger(&config.log)?;

    match cli.command {
        None => run_server(config).await,
        Some(Commands::Serve { port }) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Some(Commands::Info { url, json }) => run_cli_info(&config, url, json).await,
        Some(Commands::Download { url, format, output }) => {
            run_cli_download(&config, url, format, output.as_deref()).await
        }
        Some(Commands::Version) => run_cli_version(&config).await,
    }
}

/// Builds the launcher used by every command.
async fn build_launcher(config: &Config) -> Result<(Arc<YtDlpLauncher>, Option<CookieFile>)> {
    let cookies = provision_cookies(&config.cookies)
        .await
        .context("Failed to provision cookies")?;
    let launcher = Arc::new(YtDlpLauncher::from_config(&config.ytdlp, cookies.clone()));
    Ok((launcher, cookies))
}

async fn run_server(config: Config) -> Result<()> {
    let (launcher, cookies) = build_launcher(&config).await?;

    // ToolUnavailable here means a broken deployment; refuse to start
    let ytdlp_version = probe_version(&config.ytdlp.bin)
        .await
        .context("yt-dlp is not usable")?;

    log_startup_configuration(&config, &ytdlp_version, cookies.as_ref());

    let state = Arc::new(AppState::from_config(&config, launcher, ytdlp_version));
    start_server(&config.server.host, config.server.port, state).await
}

async fn run_cli_info(config: &Config, url: String, json: bool) -> Result<()> {
    let (launcher, _) = build_launcher(config).await?;
    let fetcher = MetadataFetcher::from_config(launcher, config);

    let info = fetcher.fetch(&MediaRequest::new(url)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Title:     {}", info.title);
    println!("Uploader:  {}", info.uploader);
    if let Some(duration) = info.duration_seconds {
        println!("Duration:  {}s", duration.round() as u64);
    }
    println!("URL:       {}", info.canonical_url);
    if info.is_playlist {
        println!("Playlist:  yes (showing first entry)");
    }
    println!("Formats:");
    for format in &info.formats {
        let kind = match (format.has_video, format.has_audio) {
            (true, true) => "video+audio",
            (true, false) => "video only",
            (false, true) => "audio only",
            (false, false) => "unknown",
        };
        let size = format
            .approximate_size_bytes
            .map(|b| format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>8}  {:<5} {:<11} {:<12} {}",
            format.format_id,
            format.container_ext,
            format.resolution_label.as_deref().unwrap_or("-"),
            kind,
            size
        );
    }
    Ok(())
}

async fn run_cli_download(config: &Config, url: String, format: String, output: Option<&Path>) -> Result<()> {
    let (launcher, _) = build_launcher(config).await?;
    let relay = StreamRelay::from_config(launcher, config);

    let request = MediaRequest::new(url).with_format(format);
    let media = relay.open(&request).await?;

    let outcome = match output {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut sink = WriterSink::new(file);
            media.relay(&mut sink).await?
        }
        None => {
            let mut sink = WriterSink::new(tokio::io::stdout());
            media.relay(&mut sink).await?
        }
    };

    match outcome {
        RelayOutcome::Completed { bytes_sent } => {
            log::info!("Downloaded {} bytes", bytes_sent);
            Ok(())
        }
        RelayOutcome::ClientDisconnected { bytes_sent } => {
            Err(anyhow::anyhow!("Output closed after {} bytes", bytes_sent))
        }
    }
}

async fn run_cli_version(config: &Config) -> Result<()> {
    println!("tubeway {}", env!("CARGO_PKG_VERSION"));
    match probe_version(&config.ytdlp.bin).await {
        Ok(version) => println!("yt-dlp {}", version),
        Err(e) => println!("yt-dlp unavailable: {}", e),
    }
    Ok(())
}
