mod export;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use cadenza_engine::{EngineConfig, GenerationEngine};
use cadenza_events::JobChanged;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use export::ExportTracker;
use settings::WorkerSettings;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadenza_worker=debug,cadenza_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid engine configuration");
            std::process::exit(1);
        }
    };
    let settings = match WorkerSettings::from_lookup(|key| std::env::var(key).ok()) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        "Loaded engine configuration",
    );

    // --- Engine ---
    let engine = match GenerationEngine::start(&config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start generation engine");
            std::process::exit(1);
        }
    };

    match engine.health().await {
        Ok(health) => tracing::info!(
            status = %health.status,
            generator_loaded = health.generator_loaded,
            "Generation service reachable",
        ),
        Err(e) => tracing::warn!(error = %e, "Generation service health check failed"),
    }

    let watcher = tokio::spawn(watch_changes(Arc::clone(&engine), settings.export_dir.clone()));

    if let Some(request) = &settings.submit {
        match engine.submit(request).await {
            Ok(id) => tracing::info!(job_id = %id, "Submitted generation on start"),
            Err(e) => tracing::error!(error = %e, "Submission on start failed"),
        }
    }

    shutdown_signal().await;

    engine.shutdown().await;
    watcher.abort();

    tracing::info!("Worker stopped");
}

/// Log every job change and export completed artifacts when an export
/// directory is configured. Exports run on their own tasks.
async fn watch_changes(engine: Arc<GenerationEngine>, export_dir: Option<PathBuf>) {
    let mut changes = engine.subscribe();
    let mut exports = ExportTracker::default();
    loop {
        match changes.recv().await {
            Ok(change) => {
                log_change(&change);
                if let Some(dir) = &export_dir {
                    if exports.claim(&change) {
                        tokio::spawn(export_completed(
                            Arc::clone(&engine),
                            change.id.clone(),
                            dir.clone(),
                        ));
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Change listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_change(change: &JobChanged) {
    tracing::info!(
        job_id = %change.id,
        status = %change.job.status,
        progress = change.job.progress,
        source = change.source.map(|s| s.as_str()).unwrap_or("delete"),
        message = %change.job.message,
        "Job changed",
    );
}

async fn export_completed(engine: Arc<GenerationEngine>, id: String, dir: PathBuf) {
    match engine.export_to_dir(&id, &dir).await {
        Ok(path) => tracing::info!(job_id = %id, path = %path.display(), "Artifact saved"),
        Err(e) => tracing::warn!(job_id = %id, error = %e, "Artifact export failed"),
    }
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
