//! # Error Handling
//!
//! Domain error taxonomy and its mapping onto HTTP responses. Every error
//! carries a stable machine-readable `error_type` code plus a human-readable
//! message; wrapped causes are kept in `details` (and logs) rather than being
//! surfaced as the top-level message.
//!
//! ## Status Code Mapping:
//! - `ModelNotLoaded` → 503
//! - `ModelLoadInProgress` → 409
//! - `ModelLoadFailed`, `TranscriptionFailed`, `Internal` → 500
//! - `AudioProcessingError`, `InvalidAudioFormat`, `Validation` → 400
//! - `FileTooLarge` → 413
//! - `JobNotFound` → 404

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

/// Errors produced by the transcription core.
#[derive(Debug, Clone)]
pub enum AppError {
    /// No model is currently loaded; the service cannot transcribe.
    ModelNotLoaded,

    /// A model load is already in flight; only one load runs at a time.
    ModelLoadInProgress { model_size: String },

    /// Loading a model failed. The previously loaded model (if any) is
    /// still current and serviceable.
    ModelLoadFailed { model_size: String, cause: String },

    /// The uploaded audio could not be read or decoded.
    AudioProcessingError(String),

    /// The file extension / container format is not supported.
    InvalidAudioFormat(String),

    /// Upload exceeds the configured size limit.
    FileTooLarge { size_bytes: usize, max_bytes: usize },

    /// Transcription failed; wraps the downstream cause for diagnostics.
    TranscriptionFailed { message: String, cause: String },

    /// Lookup of an unknown job id where absence is an error (result fetch).
    JobNotFound(Uuid),

    /// Request parameters failed validation.
    Validation(String),

    /// Catch-all for unclassified failures; internals are not leaked.
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for API clients.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::ModelNotLoaded => "MODEL_NOT_LOADED",
            AppError::ModelLoadInProgress { .. } => "MODEL_LOAD_IN_PROGRESS",
            AppError::ModelLoadFailed { .. } => "MODEL_LOAD_FAILED",
            AppError::AudioProcessingError(_) => "AUDIO_PROCESSING_ERROR",
            AppError::InvalidAudioFormat(_) => "INVALID_AUDIO_FORMAT",
            AppError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            AppError::TranscriptionFailed { .. } => "TRANSCRIPTION_FAILED",
            AppError::JobNotFound(_) => "JOB_NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ModelLoadInProgress { .. } => StatusCode::CONFLICT,
            AppError::ModelLoadFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::AudioProcessingError(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidAudioFormat(_) => StatusCode::BAD_REQUEST,
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TranscriptionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured diagnostic payload; the wrapped cause lives here, not in
    /// the top-level message.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::ModelLoadFailed { model_size, cause } => Some(json!({
                "model_size": model_size,
                "cause": cause,
            })),
            AppError::TranscriptionFailed { cause, .. } => Some(json!({
                "cause": cause,
            })),
            AppError::FileTooLarge { size_bytes, max_bytes } => Some(json!({
                "size_bytes": size_bytes,
                "max_bytes": max_bytes,
            })),
            AppError::ModelLoadInProgress { model_size } => Some(json!({
                "model_size": model_size,
            })),
            _ => None,
        }
    }

    /// Message with the wrapped cause appended. HTTP bodies keep causes in
    /// `details`, but the job registry stores a single error string, so the
    /// diagnostic has to ride along in it.
    pub fn detailed_message(&self) -> String {
        match self {
            AppError::TranscriptionFailed { message, cause } => {
                format!("{}: {}", message, cause)
            }
            AppError::ModelLoadFailed { model_size, cause } => {
                format!("Failed to load model {}: {}", model_size, cause)
            }
            other => other.to_string(),
        }
    }

    /// Attach a correlation id for the HTTP boundary.
    pub fn with_correlation(self, correlation_id: impl Into<String>) -> ApiError {
        ApiError {
            kind: self,
            correlation_id: Some(correlation_id.into()),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ModelNotLoaded => write!(f, "No model is currently loaded"),
            AppError::ModelLoadInProgress { model_size } => {
                write!(f, "A model load is already in progress (requested: {})", model_size)
            }
            AppError::ModelLoadFailed { model_size, .. } => {
                write!(f, "Failed to load model {}", model_size)
            }
            AppError::AudioProcessingError(msg) => write!(f, "Audio processing error: {}", msg),
            AppError::InvalidAudioFormat(msg) => write!(f, "Invalid audio format: {}", msg),
            AppError::FileTooLarge { size_bytes, max_bytes } => {
                write!(f, "File too large: {} bytes (max: {} bytes)", size_bytes, max_bytes)
            }
            AppError::TranscriptionFailed { message, .. } => write!(f, "{}", message),
            AppError::JobNotFound(id) => write!(f, "Job not found: {}", id),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Internal(_) => write!(f, "An internal server error occurred"),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        error_body(self, None)
    }
}

/// An [`AppError`] plus the correlation id of the request that failed, so the
/// error body echoes the id the caller can grep logs with.
#[derive(Debug)]
pub struct ApiError {
    kind: AppError,
    correlation_id: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl From<AppError> for ApiError {
    fn from(kind: AppError) -> Self {
        ApiError { kind, correlation_id: None }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.kind.status()
    }

    fn error_response(&self) -> HttpResponse {
        error_body(&self.kind, self.correlation_id.as_deref())
    }
}

fn error_body(err: &AppError, correlation_id: Option<&str>) -> HttpResponse {
    HttpResponse::build(err.status()).json(json!({
        "error_type": err.error_type(),
        "message": err.to_string(),
        "details": err.details(),
        "correlation_id": correlation_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(AppError::ModelNotLoaded.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            AppError::ModelLoadInProgress { model_size: "base".into() }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::FileTooLarge { size_bytes: 2, max_bytes: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::InvalidAudioFormat("xyz".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::TranscriptionFailed { message: "boom".into(), cause: "x".into() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_error_does_not_leak_cause() {
        let err = AppError::Internal("secret stack trace".into());
        assert_eq!(err.to_string(), "An internal server error occurred");
    }

    #[test]
    fn test_wrapped_cause_lives_in_details() {
        let err = AppError::TranscriptionFailed {
            message: "Transcription failed".into(),
            cause: "decoder blew up".into(),
        };
        assert_eq!(err.to_string(), "Transcription failed");
    }

    #[test]
    fn test_detailed_message_keeps_cause() {
        let err = AppError::TranscriptionFailed {
            message: "Transcription failed".into(),
            cause: "decoder blew up".into(),
        };
        assert_eq!(err.detailed_message(), "Transcription failed: decoder blew up");

        let err = AppError::ModelLoadFailed {
            model_size: "base".into(),
            cause: "weights unavailable".into(),
        };
        assert_eq!(
            err.detailed_message(),
            "Failed to load model base: weights unavailable"
        );

        // Variants without a wrapped cause fall back to their display form.
        assert_eq!(
            AppError::ModelNotLoaded.detailed_message(),
            AppError::ModelNotLoaded.to_string()
        );
        let details = err.details().unwrap();
        assert_eq!(details["cause"], "decoder blew up");
    }
}
