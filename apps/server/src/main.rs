//! Lectern Server - standalone headless transcription server.
//!
//! Exposes the streaming session core over HTTP/WebSocket without any GUI.
//! The speech backend is pluggable; this binary ships with the scripted
//! in-process backend for development and smoke testing, and embedders wire
//! a production client through `lectern_core::bootstrap_services`.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lectern_core::recognizer::fake::ScriptedRecognizer;
use lectern_core::{
    bootstrap_services, start_server, InMemorySlideIndex, RecognizerClient, SlideIndex,
};
use tokio::signal;

use crate::config::ServerConfig;

/// Lectern Server - headless real-time lecture transcription.
#[derive(Parser, Debug)]
#[command(name = "lectern-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LECTERN_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "LECTERN_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Lectern Server v{}", env!("CARGO_PKG_VERSION"));

    let mut server_config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        server_config.bind_port = port;
    }

    let core_config = server_config.to_core_config();

    // The development backend: deterministic, in-process, no credentials.
    // Production deployments embed the core and inject their own client.
    let recognizer: Arc<dyn RecognizerClient> = Arc::new(ScriptedRecognizer::default());
    log::warn!("Using the scripted development recognizer; no external speech backend configured");

    let services =
        bootstrap_services(&core_config, recognizer).context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    // Preload slide indexes before accepting sessions.
    for (presentation_id, path) in &server_config.slide_indexes {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading slide index {path}"))?;
        let index = InMemorySlideIndex::from_json(&json)
            .with_context(|| format!("parsing slide index {path}"))?;
        log::info!(
            "Loaded slide index for {} ({} slides)",
            presentation_id,
            index.slide_count()
        );
        services
            .index_registry
            .register(presentation_id, Arc::new(index));
    }

    services.start_background_tasks();
    log::info!("Background tasks started");

    let app_state = services.app_state();
    let server = tokio::spawn(start_server(app_state));

    signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    log::info!("Shutdown signal received");

    services.shutdown().await;
    server.abort();

    Ok(())
}
