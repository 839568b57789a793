use anyhow::{Context, Result};
use camvault::config::{Config, EngineKind};
use camvault::{
    create_router, AppState, LaunchEngine, MediaEngine, PlaybackService,
    RecordingManager, RetentionSweeper, SegmentResolver, SegmentScanner,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "camvault")]
#[command(about = "Continuous camera recording with timestamp playback")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/camvault")]
    config: String,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    /// Serve playback only, without recording
    #[arg(long)]
    no_record: bool,
}

fn build_engine(cfg: &Config) -> Result<Arc<dyn MediaEngine>> {
    match cfg.engine.kind {
        EngineKind::Launch => Ok(Arc::new(
            LaunchEngine::new(&cfg.engine.launch_binary).with_stop_grace(cfg.launch_stop_grace()),
        )),
        #[cfg(feature = "gstreamer")]
        EngineKind::Gstreamer => Ok(Arc::new(camvault::engine::GstEngine::new()?)),
        #[cfg(not(feature = "gstreamer"))]
        EngineKind::Gstreamer => {
            anyhow::bail!("engine.kind = \"gstreamer\" requires building with --features gstreamer")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let cfg = Config::load(&args.config)?;

    info!("Camvault v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!(
        "Recording to {:?} ({} cameras)",
        cfg.recording.base_path,
        cfg.cameras.len()
    );

    let engine = build_engine(&cfg)?;
    info!("Media engine: {}", engine.name());

    let naming = cfg.naming()?;
    let recordings = Arc::new(RecordingManager::new(
        Arc::clone(&engine),
        naming.clone(),
        cfg.recording_settings()?,
    ));
    for camera in &cfg.cameras {
        recordings
            .add_camera(camera)
            .await
            .with_context(|| format!("Failed to register camera {}", camera.name))?;
    }

    if args.no_record {
        info!("Recording disabled (--no-record)");
    } else {
        recordings.start_all().await;
    }

    let scanner = SegmentScanner::new(naming, cfg.playback.extensions.clone());
    let cancel = CancellationToken::new();

    let sweeper = if cfg.retention.enabled {
        let policy = cfg.retention_policy();
        if policy.is_noop() {
            warn!("Retention enabled without max_age_hours or max_total_gb; nothing will be removed");
            None
        } else {
            let sweeper = RetentionSweeper::new(
                scanner.clone(),
                cfg.cameras.iter().map(|c| c.name.clone()),
                policy,
            );
            let interval = Duration::from_secs(cfg.retention.interval_secs.max(1));
            Some(sweeper.spawn(interval, cancel.clone()))
        }
    } else {
        None
    };

    let playback = Arc::new(PlaybackService::new(
        SegmentResolver::new(scanner),
        engine,
        &cfg.cameras,
        cfg.playback_settings(),
    ));

    let state = AppState::new(
        cfg.cameras.clone(),
        Arc::clone(&recordings),
        Arc::clone(&playback),
    );
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");

    cancel.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    playback.shutdown().await;

    for stats in recordings.stop_all().await {
        info!(
            camera = %stats.camera_id,
            stream = %stats.stream_kind,
            "Recorded {} segments ({} rotations)",
            stats.segments_started,
            stats.rotations
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}
