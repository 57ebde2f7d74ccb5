//! Health and metrics endpoints.

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::state::AppState;

/// `GET /health` — liveness plus model readiness.
///
/// Reports `healthy` when a model is loaded and `degraded` otherwise; the
/// HTTP status is 200 either way so orchestrators keep routing traffic to
/// a service that can still load a model on demand.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let model_loaded = state.models.is_loaded();
    let status = if model_loaded { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "model_loaded": model_loaded,
        "model_size": state.models.current_size().map(|s| s.to_string()),
        "model_loading": state.models.is_loading(),
        "uptime": state.uptime_seconds(),
        "active_transcriptions": state.pool.active_count(),
        "queued_transcriptions": state.pool.in_flight_count().saturating_sub(state.pool.active_count()),
        "tracked_jobs": state.jobs.job_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /metrics` — request counters and process memory.
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.metrics.snapshot();

    HttpResponse::Ok().json(json!({
        "requests": {
            "total": snapshot.requests_total,
            "errors": snapshot.errors_total,
            "transcriptions": snapshot.transcriptions_total,
        },
        "pool": {
            "capacity": state.pool.capacity(),
            "active": state.pool.active_count(),
            "in_flight": state.pool.in_flight_count(),
        },
        "jobs": {
            "tracked": state.jobs.job_count(),
        },
        "memory": get_memory_info(),
        "uptime": state.uptime_seconds(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}
