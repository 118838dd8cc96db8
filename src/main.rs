//! MPEG-TS live view server CLI application

use anyhow::{Context, Result};
use clap::Parser;
use mpegts_streamer::capture;
use mpegts_streamer::codec;
use mpegts_streamer::config::Config;
use mpegts_streamer::frame::CameraFeed;
use mpegts_streamer::server::{self, AppState};
use mpegts_streamer::stream::{StreamControl, StreamRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "mpegts-streamer")]
#[command(about = "Pull-driven H.264/MPEG-TS live view server for surveillance cameras")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the HTTP port from the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("MPEG-TS streamer starting");
    info!(config_path = %cli.config, "Loading configuration");

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!(
        cameras = config.cameras.len(),
        max_clients = config.server.max_clients,
        max_rate = config.stream.max_rate,
        codec = %config.stream.codec,
        "Configuration loaded"
    );

    let feeds: Vec<Arc<CameraFeed>> = config
        .cameras
        .iter()
        .map(|camera| Arc::new(CameraFeed::new(camera)))
        .collect();

    let mut captures = Vec::with_capacity(feeds.len());
    for (camera, feed) in config.cameras.iter().zip(&feeds) {
        match capture::spawn(camera, Arc::clone(feed)) {
            Ok(handle) => captures.push(handle),
            Err(e) => {
                // Sessions on this camera end immediately
                error!(camera = camera.id, error = %e, "Failed to start capture");
                feed.stop();
            }
        }
    }

    let control = StreamControl::new();
    let config = Arc::new(config);
    let state = AppState::new(
        Arc::clone(&config),
        feeds,
        codec::default_factory(),
        Arc::clone(&control),
    );

    let stats_task = tokio::spawn(log_stats(Arc::clone(state.registry())));

    let shutdown = {
        let control = Arc::clone(&control);
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutting down");
            control.shutdown();
        }
    };

    info!("Streaming started, press Ctrl+C to stop");
    let result = server::run_server(state, shutdown).await;

    stats_task.abort();
    for mut handle in captures {
        handle.stop();
    }

    result
}

/// Logs session statistics periodically
async fn log_stats(registry: Arc<StreamRegistry>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await;

    loop {
        interval.tick().await;
        let streams = registry.snapshot();
        info!(active = streams.len(), max_clients = registry.max_clients(), "Stats");

        for stream in streams {
            info!(
                session_id = stream.id,
                camera = stream.camera,
                view = %stream.view,
                frames = %stream.stats.frames_encoded,
                bytes = %stream.stats.bytes_delivered,
                growths = %stream.stats.output_growths,
                uptime_secs = %format!("{:.0}", stream.uptime_secs),
                "Session stats"
            );
        }
    }
}
