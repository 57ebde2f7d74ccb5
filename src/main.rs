//! # Whisperrr Backend - Main Application Entry Point
//!
//! HTTP transcription service built around a single resident whisper model
//! and a bounded worker pool. Uploads are transcribed either inline or as
//! background jobs that clients poll for status and results.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (config.toml + environment variables)
//! - **model**: Model lifecycle, the engine seam, and the candle whisper engine
//! - **jobs**: In-memory job registry with age-based cleanup
//! - **pool**: Semaphore-bounded worker pool for transcription work
//! - **orchestrator**: Decode -> transcribe -> publish pipeline
//! - **handlers / health / middleware**: The HTTP surface

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod jobs;
mod middleware;
mod model;
mod orchestrator;
mod pool;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use jobs::JobManager;
use model::{ModelManager, ModelSize, WhisperLoader};
use orchestrator::TranscriptionOrchestrator;
use pool::WorkerPool;
use state::AppState;

/// Global shutdown flag set by the signal handler task and polled by the
/// main task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting whisperrr-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, model={}, workers={}",
        config.server.host,
        config.server.port,
        config.model.default_size,
        config.processing.max_concurrent_transcriptions
    );

    // Wire the components together. Everything behind Arc so handlers,
    // workers, and background tasks share the same instances.
    let models = Arc::new(ModelManager::new(Arc::new(WhisperLoader::new())));
    let job_manager = Arc::new(JobManager::new());
    let pool = Arc::new(WorkerPool::new(config.processing.max_concurrent_transcriptions));
    let orchestrator = Arc::new(TranscriptionOrchestrator::new(
        Arc::clone(&models),
        Arc::clone(&job_manager),
        Arc::clone(&pool),
        config.processing.clone(),
    ));

    if config.model.preload {
        preload_model(&models, &config.model.default_size).await;
    }

    // Reap expired jobs in the background for the life of the process.
    let reaper = {
        let jobs = Arc::clone(&job_manager);
        let max_age = Duration::from_secs(config.jobs.max_age_seconds);
        let interval = Duration::from_secs(config.jobs.cleanup_interval_seconds);
        tokio::spawn(async move { jobs.run_reaper(max_age, interval).await })
    };

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = web::Data::new(AppState::new(
        config,
        models,
        job_manager,
        Arc::clone(&pool),
        orchestrator,
    ));

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::RequestMetrics)
            .wrap(middleware::RequestCorrelation)
            .route("/transcribe", web::post().to(handlers::transcribe::transcribe))
            .route(
                "/transcribe/async",
                web::post().to(handlers::transcribe::transcribe_async),
            )
            .route("/jobs/{job_id}", web::get().to(handlers::transcribe::job_status))
            .route(
                "/jobs/{job_id}/result",
                web::get().to(handlers::transcribe::job_result),
            )
            .route("/jobs/{job_id}", web::delete().to(handlers::transcribe::delete_job))
            .route("/model/info", web::get().to(handlers::models::model_info))
            .route(
                "/model/load/{model_size}",
                web::post().to(handlers::models::load_model),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::metrics))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Let in-flight transcriptions finish before the process exits.
    pool.shutdown(Duration::from_secs(30)).await;
    reaper.abort();

    info!("Server stopped gracefully");
    Ok(())
}

/// Load the configured default model at startup. A failure leaves the
/// service running degraded; clients can retry via `POST /model/load`.
async fn preload_model(models: &Arc<ModelManager>, default_size: &str) {
    let size = match default_size.parse::<ModelSize>() {
        Ok(size) => size,
        Err(e) => {
            warn!("Skipping model preload: {}", e);
            return;
        }
    };

    info!(model_size = %size, "Preloading model");
    match models.load_model(size).await {
        Ok(outcome) => {
            info!(
                model_size = %outcome.model_size,
                load_duration_seconds = outcome.load_duration_seconds,
                "Model preloaded"
            );
        }
        Err(e) => {
            warn!("Model preload failed, starting degraded: {}", e);
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisperrr_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
