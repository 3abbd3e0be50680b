use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tubeway")]
#[command(author, version, about = "HTTP front-end that relays yt-dlp metadata and media streams", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./tubeway.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Port to listen on, overrides the configured one
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Fetch and print metadata for a URL
    Info {
        /// Media URL
        url: String,

        /// Print the normalized metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stream a URL into a file, or to stdout when no output is given
    Download {
        /// Media URL
        url: String,

        /// yt-dlp format selector
        #[arg(short, long, default_value = "best")]
        format: String,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the tubeway and yt-dlp versions
    Version,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_is_optional() {
        let cli = Cli::try_parse_from(["tubeway"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_download_arguments() {
        let cli = Cli::try_parse_from([
            "tubeway",
            "download",
            "https://youtu.be/dQw4w9WgXcQ",
            "-f",
            "140",
            "-o",
            "song.m4a",
            "--config",
            "prod.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("prod.toml")));
        match cli.command {
            Some(Commands::Download { url, format, output }) => {
                assert_eq!(url, "https://youtu.be/dQw4w9WgXcQ");
                assert_eq!(format, "140");
                assert_eq!(output, Some(PathBuf::from("song.m4a")));
            }
            _ => panic!("expected download command"),
        }
    }
}
