//! Shared application state, injected into every handler via
//! `web::Data<AppState>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::AppConfig;
use crate::jobs::JobManager;
use crate::model::ModelManager;
use crate::orchestrator::TranscriptionOrchestrator;
use crate::pool::WorkerPool;

pub struct AppState {
    pub config: AppConfig,
    pub models: Arc<ModelManager>,
    pub jobs: Arc<JobManager>,
    pub pool: Arc<WorkerPool>,
    pub orchestrator: Arc<TranscriptionOrchestrator>,
    pub metrics: Arc<AppMetrics>,
    start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        models: Arc<ModelManager>,
        jobs: Arc<JobManager>,
        pool: Arc<WorkerPool>,
        orchestrator: Arc<TranscriptionOrchestrator>,
    ) -> Self {
        Self {
            config,
            models,
            jobs,
            pool,
            orchestrator,
            metrics: Arc::new(AppMetrics::default()),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Process-lifetime counters, cheap enough to bump on every request.
#[derive(Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    transcriptions_total: AtomicU64,
}

impl AppMetrics {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transcription(&self) {
        self.transcriptions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            transcriptions_total: self.transcriptions_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub transcriptions_total: u64,
}
