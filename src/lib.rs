//! Stream Recorder - record browser-rendered live streams to disk.
//!
//! This is the main library crate for the stream recorder service.
//! It wires the registry, session manager, conversions and the recordings
//! library behind the HTTP API.

pub mod capture;
pub mod config;
pub mod convert;
pub mod library;
pub mod recorder;
pub mod registry;
pub mod server;
pub mod utils;

use anyhow::Context;
use capture::ProcessCapture;
use config::Cli;
use convert::{ConversionCoordinator, FfmpegTranscoder};
use library::RecordingsLibrary;
use recorder::{FileSinkOpener, ManagerOptions, SessionManager};
use registry::StreamRegistry;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run the service until Ctrl-C
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stream_recorder_lib=debug,stream_recorder=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stream Recorder v{}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(
        StreamRegistry::open(&cli.config)
            .await
            .with_context(|| format!("failed to open registry {:?}", cli.config))?,
    );
    let settings = registry.settings().await;
    let recordings_dir = registry.recordings_dir().await;
    tokio::fs::create_dir_all(&recordings_dir)
        .await
        .with_context(|| format!("failed to create recordings directory {:?}", recordings_dir))?;
    tracing::info!("Recording into {:?}", recordings_dir);

    let transcoder =
        FfmpegTranscoder::new(settings.conversion_quality).with_program(cli.ffmpeg.clone());
    let conversions = Arc::new(ConversionCoordinator::new(
        Arc::new(transcoder),
        settings.max_concurrent_conversions,
    ));

    let capture = ProcessCapture::new(cli.capture_program.clone(), cli.capture_args.clone());
    let sessions = Arc::new(
        SessionManager::new(
            registry.clone(),
            Arc::new(capture),
            Arc::new(FileSinkOpener),
            ManagerOptions::from_settings(&settings, recordings_dir.clone()),
        )
        .with_conversions(conversions.clone()),
    );

    let library = RecordingsLibrary::new(recordings_dir).with_ffprobe(cli.ffprobe.clone());

    if cli.api_token().is_none() {
        tracing::warn!("No API token configured, the API is open to anyone who can reach it");
    }
    let state = server::AppState {
        registry,
        sessions: sessions.clone(),
        conversions,
        library: Arc::new(library),
        api_token: cli.api_token().map(Arc::from),
    };

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    tracing::info!("HTTP API listening on {}", cli.bind);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    sessions.stop_all().await;
    tracing::info!("Stream Recorder stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
