//! tubeway - HTTP and CLI surface over tubecore
//!
//! - `cli`: command-line definition
//! - `web_server`: axum routes for metadata, media download, health and metrics

pub mod cli;
pub mod web_server;

pub use web_server::{router, start_server, AppState};
