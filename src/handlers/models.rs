//! Model management endpoints: inspect the current model and trigger a
//! load or swap.

use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

use crate::error::{ApiError, AppError};
use crate::middleware::CorrelationId;
use crate::model::ModelSize;
use crate::state::AppState;

/// `GET /model/info` — metadata about the currently loaded model plus the
/// catalog of loadable sizes.
pub async fn model_info(state: web::Data<AppState>) -> HttpResponse {
    let available: Vec<_> = ModelSize::ALL
        .iter()
        .map(|size| {
            json!({
                "size": size.to_string(),
                "description": size.description(),
                "memory_mb": size.size_mb(),
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "current": state.models.model_info(),
        "available_models": available,
    }))
}

/// `POST /model/load/{model_size}` — load (or swap to) the named model.
///
/// Returns 400 for an unknown size, 409 while another load is running.
/// Loading the already-current model is a fast no-op reported as `cached`.
pub async fn load_model(
    state: web::Data<AppState>,
    path: web::Path<String>,
    correlation: CorrelationId,
) -> Result<HttpResponse, ApiError> {
    let raw = path.into_inner();
    let size = raw
        .parse::<ModelSize>()
        .map_err(|e| AppError::Validation(e.to_string()).with_correlation(correlation.0.clone()))?;

    info!(model_size = %size, "Model load requested");
    let outcome = state
        .models
        .load_model(size)
        .await
        .map_err(|e| e.with_correlation(correlation.0.clone()))?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "model_size": outcome.model_size,
        "load_duration_seconds": outcome.load_duration_seconds,
        "cached": outcome.cached,
    })))
}
