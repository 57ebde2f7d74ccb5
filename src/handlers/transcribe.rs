//! # Transcription Endpoints
//!
//! - `POST /transcribe` — upload audio, wait for the transcript inline
//! - `POST /transcribe/async` — upload audio, get a job id back
//! - `GET /jobs/{job_id}` — poll job status and progress
//! - `GET /jobs/{job_id}/result` — fetch the finished transcript
//! - `DELETE /jobs/{job_id}` — remove a job from the registry
//!
//! Uploads are multipart form data with the audio in a field named `file`.
//! Tuning knobs (`model_size`, `language`, `temperature`, `task`) come from
//! the query string.

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::audio;
use crate::error::{ApiError, AppError, AppResult};
use crate::jobs::{Job, JobStatus};
use crate::middleware::CorrelationId;
use crate::model::{ModelSize, TaskKind};
use crate::orchestrator::TranscribeParams;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TranscribeQuery {
    pub model_size: Option<String>,
    pub language: Option<String>,
    pub temperature: Option<f32>,
    pub task: Option<String>,
}

impl TranscribeQuery {
    fn into_params(self) -> AppResult<TranscribeParams> {
        let model_size = match self.model_size {
            Some(raw) => Some(
                raw.parse::<ModelSize>()
                    .map_err(|e| AppError::Validation(e.to_string()))?,
            ),
            None => None,
        };

        let temperature = self.temperature.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(AppError::Validation(format!(
                "temperature must be between 0.0 and 1.0, got {}",
                temperature
            )));
        }

        let task = match self.task {
            Some(raw) => raw
                .parse::<TaskKind>()
                .map_err(|e| AppError::Validation(e.to_string()))?,
            None => TaskKind::Transcribe,
        };

        Ok(TranscribeParams {
            model_size,
            language: self.language,
            temperature,
            task,
        })
    }
}

/// Status poll view of a job; the transcript itself is only served by the
/// result endpoint.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.message,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Drain the multipart payload and return the `file` field's name and bytes.
async fn read_upload(
    mut payload: Multipart,
    max_bytes: usize,
) -> AppResult<(String, Vec<u8>)> {
    let mut audio_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?;

        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(|name| name == "file")
            .unwrap_or(false);

        if !is_file {
            // Every field must be consumed before the next one can be
            // polled, so skipped fields still get drained.
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?;
            }
            continue;
        }

        filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(|s| s.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::Validation(format!("Upload error: {}", e)))?;
            // Check as we stream so a huge upload is cut off early.
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::FileTooLarge {
                    size_bytes: bytes.len() + chunk.len(),
                    max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        audio_data = Some(bytes);
    }

    let bytes =
        audio_data.ok_or_else(|| AppError::Validation("No 'file' field in upload".to_string()))?;
    let filename = filename.unwrap_or_else(|| "upload".to_string());
    Ok((filename, bytes))
}

/// `POST /transcribe` — transcribe an upload and return the result inline.
pub async fn transcribe(
    state: web::Data<AppState>,
    query: web::Query<TranscribeQuery>,
    payload: Multipart,
    correlation: CorrelationId,
) -> Result<HttpResponse, ApiError> {
    let fail = |e: AppError| e.with_correlation(correlation.0.clone());

    let max_bytes = state.config.limits.max_file_size_bytes();
    let (filename, bytes) = read_upload(payload, max_bytes).await.map_err(fail)?;
    audio::validate_upload(&filename, bytes.len(), &state.config.limits).map_err(fail)?;
    let params = query.into_inner().into_params().map_err(fail)?;

    debug!(filename = %filename, size_bytes = bytes.len(), "Accepted synchronous upload");
    let result = state.orchestrator.transcribe(bytes, params).await.map_err(fail)?;
    state.metrics.record_transcription();

    Ok(HttpResponse::Ok().json(result))
}

/// `POST /transcribe/async` — queue an upload, reply with the job id.
pub async fn transcribe_async(
    state: web::Data<AppState>,
    query: web::Query<TranscribeQuery>,
    payload: Multipart,
    correlation: CorrelationId,
) -> Result<HttpResponse, ApiError> {
    let fail = |e: AppError| e.with_correlation(correlation.0.clone());

    let max_bytes = state.config.limits.max_file_size_bytes();
    let (filename, bytes) = read_upload(payload, max_bytes).await.map_err(fail)?;
    audio::validate_upload(&filename, bytes.len(), &state.config.limits).map_err(fail)?;
    let params = query.into_inner().into_params().map_err(fail)?;

    debug!(filename = %filename, size_bytes = bytes.len(), "Accepted asynchronous upload");
    let job_id = state.orchestrator.submit(bytes, params).await.map_err(fail)?;
    state.metrics.record_transcription();

    Ok(HttpResponse::Accepted().json(json!({
        "job_id": job_id,
        "status": JobStatus::Processing,
        "status_url": format!("/jobs/{}", job_id),
    })))
}

/// `GET /jobs/{job_id}` — status and progress for one job.
pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    correlation: CorrelationId,
) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    let job = state
        .jobs
        .get_job(job_id)
        .ok_or_else(|| AppError::JobNotFound(job_id).with_correlation(correlation.0.clone()))?;

    Ok(HttpResponse::Ok().json(JobStatusResponse::from(job)))
}

/// `GET /jobs/{job_id}/result` — the transcript of a completed job.
///
/// Replies 202 while the job is still in flight and surfaces the stored
/// failure for jobs that ended in error.
pub async fn job_result(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    correlation: CorrelationId,
) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    let fail = |e: AppError| e.with_correlation(correlation.0.clone());

    let job = state.jobs.get_job(job_id).ok_or_else(|| fail(AppError::JobNotFound(job_id)))?;

    match job.status {
        JobStatus::Completed => match job.result {
            Some(result) => Ok(HttpResponse::Ok().json(result)),
            // Completed always carries a result; guard anyway.
            None => Err(fail(AppError::Internal(format!(
                "job {} completed without a result",
                job_id
            )))),
        },
        JobStatus::Failed => Err(fail(AppError::TranscriptionFailed {
            message: "Transcription failed".to_string(),
            cause: job.error.unwrap_or_else(|| "unknown failure".to_string()),
        })),
        JobStatus::Pending | JobStatus::Processing => {
            Ok(HttpResponse::Accepted().json(JobStatusResponse::from(job)))
        }
    }
}

/// `DELETE /jobs/{job_id}` — drop a job; deleting an unknown id succeeds.
pub async fn delete_job(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    let deleted = state.jobs.delete_job(job_id);
    debug!(job_id = %job_id, deleted, "Delete job requested");
    Ok(HttpResponse::Ok().json(json!({
        "job_id": job_id,
        "deleted": deleted,
    })))
}
