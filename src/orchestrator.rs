//! # Transcription Orchestrator
//!
//! Drives an upload through the full pipeline: validate and decode the
//! audio, run inference on the worker pool, and publish progress and the
//! final result (or failure) to the job registry. Both the synchronous
//! endpoint and the submit-then-poll flow go through the same path; the
//! sync variant just awaits the worker's join handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::audio;
use crate::config::ProcessingConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::{JobManager, JobStatus};
use crate::model::{ModelHandle, ModelManager, ModelSize, TaskKind, TranscribeOptions};
use crate::pool::WorkerPool;

/// Progress at which decoding is done and inference starts.
const SEGMENT_PROGRESS_BASE: f64 = 40.0;
/// Progress credited per decoded 30-second segment.
const SEGMENT_PROGRESS_MULTIPLIER: f64 = 5.0;
/// Inference progress ceiling; the jump to 100 happens on completion.
const SEGMENT_PROGRESS_MAX: f64 = 95.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

/// Final transcription payload returned to clients and stored on the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Audio duration in seconds.
    pub duration: f64,
    pub segments: Vec<TranscriptionSegment>,
    /// Mean decoder confidence in [0, 1], when the engine reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    pub model_used: String,
    /// Wall-clock processing time in seconds.
    pub processing_time: f64,
}

/// Per-request tuning knobs, parsed from the HTTP query string.
#[derive(Debug, Clone)]
pub struct TranscribeParams {
    /// When set and different from the current model, triggers a load
    /// before transcription.
    pub model_size: Option<ModelSize>,
    pub language: Option<String>,
    pub temperature: f32,
    pub task: TaskKind,
}

impl Default for TranscribeParams {
    fn default() -> Self {
        Self {
            model_size: None,
            language: None,
            temperature: 0.0,
            task: TaskKind::Transcribe,
        }
    }
}

pub struct TranscriptionOrchestrator {
    models: Arc<ModelManager>,
    jobs: Arc<JobManager>,
    pool: Arc<WorkerPool>,
    processing: ProcessingConfig,
}

impl TranscriptionOrchestrator {
    pub fn new(
        models: Arc<ModelManager>,
        jobs: Arc<JobManager>,
        pool: Arc<WorkerPool>,
        processing: ProcessingConfig,
    ) -> Self {
        Self {
            models,
            jobs,
            pool,
            processing,
        }
    }

    /// Transcribe inline and return the result once done. Still runs on the
    /// worker pool so the concurrency bound applies to both flows.
    pub async fn transcribe(
        &self,
        bytes: Vec<u8>,
        params: TranscribeParams,
    ) -> AppResult<TranscriptionResult> {
        let (_job_id, handle) = self.start_job(bytes, params).await?;
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Internal(format!("transcription task panicked: {}", e))),
        }
    }

    /// Queue a transcription and return its job id for status polling.
    pub async fn submit(&self, bytes: Vec<u8>, params: TranscribeParams) -> AppResult<Uuid> {
        let (job_id, _handle) = self.start_job(bytes, params).await?;
        Ok(job_id)
    }

    async fn start_job(
        &self,
        bytes: Vec<u8>,
        params: TranscribeParams,
    ) -> AppResult<(Uuid, tokio::task::JoinHandle<AppResult<TranscriptionResult>>)> {
        let handle = self.ensure_engine(params.model_size).await?;

        let job_id = self.jobs.create_job();
        self.jobs
            .set_status(job_id, JobStatus::Processing, "Preparing audio");

        let jobs = Arc::clone(&self.jobs);
        let processing = self.processing.clone();
        let work = run_job(jobs, handle, processing, job_id, bytes, params);

        match self.pool.submit(work) {
            Ok(join_handle) => {
                debug!(job_id = %job_id, queued = self.pool.in_flight_count(), "Queued transcription");
                Ok((job_id, join_handle))
            }
            Err(e) => {
                self.jobs.set_error(job_id, "Service is shutting down");
                Err(AppError::Internal(format!("failed to queue transcription: {}", e)))
            }
        }
    }

    /// Resolve the engine to use, loading a requested size first when it
    /// differs from what is installed.
    async fn ensure_engine(&self, requested: Option<ModelSize>) -> AppResult<Arc<ModelHandle>> {
        if let Some(size) = requested {
            if self.models.current_size() != Some(size) {
                info!(model_size = %size, "Request asked for a different model, loading");
                self.models.load_model(size).await?;
            }
        }
        self.models.current_handle().ok_or(AppError::ModelNotLoaded)
    }
}

/// Progress value reported after segment `index` (zero-based) finishes.
fn segment_progress(index: usize) -> f64 {
    (SEGMENT_PROGRESS_BASE + SEGMENT_PROGRESS_MULTIPLIER * (index + 1) as f64)
        .min(SEGMENT_PROGRESS_MAX)
}

async fn run_job(
    jobs: Arc<JobManager>,
    handle: Arc<ModelHandle>,
    processing: ProcessingConfig,
    job_id: Uuid,
    bytes: Vec<u8>,
    params: TranscribeParams,
) -> AppResult<TranscriptionResult> {
    match run_pipeline(&jobs, handle, &processing, job_id, bytes, params).await {
        Ok(result) => {
            info!(
                job_id = %job_id,
                duration = result.duration,
                processing_time = result.processing_time,
                "Transcription completed"
            );
            jobs.set_result(job_id, result.clone());
            Ok(result)
        }
        Err(e) => {
            let detail = e.detailed_message();
            error!(job_id = %job_id, error = %detail, "Transcription failed");
            jobs.set_error(job_id, detail);
            Err(e)
        }
    }
}

async fn run_pipeline(
    jobs: &Arc<JobManager>,
    handle: Arc<ModelHandle>,
    processing: &ProcessingConfig,
    job_id: Uuid,
    bytes: Vec<u8>,
    params: TranscribeParams,
) -> AppResult<TranscriptionResult> {
    let started = Instant::now();
    debug!(
        job_id = %job_id,
        task = params.task.as_str(),
        model_size = %handle.size(),
        "Starting transcription pipeline"
    );

    jobs.update_progress(job_id, 5.0, "Decoding audio");
    let pre_timeout = Duration::from_secs(processing.preprocessing_timeout_seconds);
    let decode_task = tokio::task::spawn_blocking(move || audio::decode_wav(&bytes));
    let audio_file = match tokio::time::timeout(pre_timeout, decode_task).await {
        Err(_) => {
            return Err(AppError::AudioProcessingError(format!(
                "audio preprocessing exceeded {} seconds",
                processing.preprocessing_timeout_seconds
            )))
        }
        Ok(Err(join_err)) => {
            return Err(AppError::Internal(format!("decode task failed: {}", join_err)))
        }
        Ok(Ok(decoded)) => decoded?,
    };

    jobs.update_progress(job_id, SEGMENT_PROGRESS_BASE, "Audio decoded, transcribing");

    let engine = handle.engine();
    let options = TranscribeOptions {
        language: params.language,
        temperature: params.temperature,
        task: params.task,
    };
    let samples = audio_file.samples.clone();
    let progress_jobs = Arc::clone(jobs);
    let infer_task = tokio::task::spawn_blocking(move || {
        let on_segment = move |index: usize| {
            progress_jobs.update_progress(
                job_id,
                segment_progress(index),
                format!("Transcribed segment {}", index + 1),
            );
        };
        engine.transcribe(&samples, &options, Some(&on_segment))
    });

    // On timeout the blocking thread keeps running until the engine call
    // returns; the pool slot is freed and the job is failed regardless.
    let trans_timeout = Duration::from_secs(processing.transcription_timeout_seconds);
    let raw = match tokio::time::timeout(trans_timeout, infer_task).await {
        Err(_) => {
            return Err(AppError::TranscriptionFailed {
                message: "Transcription failed".to_string(),
                cause: format!(
                    "inference exceeded {} seconds",
                    processing.transcription_timeout_seconds
                ),
            })
        }
        Ok(Err(join_err)) => {
            return Err(AppError::Internal(format!("inference task failed: {}", join_err)))
        }
        Ok(Ok(Err(e))) => {
            return Err(AppError::TranscriptionFailed {
                message: "Transcription failed".to_string(),
                cause: format!("{:#}", e),
            })
        }
        Ok(Ok(Ok(raw))) => raw,
    };

    let logprobs: Vec<f64> = raw
        .segments
        .iter()
        .filter_map(|segment| segment.avg_logprob)
        .collect();
    let confidence_score = if logprobs.is_empty() {
        None
    } else {
        let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
        Some((mean + 1.0).clamp(0.0, 1.0))
    };

    Ok(TranscriptionResult {
        text: raw.text,
        language: raw.language,
        duration: audio_file.duration_seconds,
        segments: raw
            .segments
            .into_iter()
            .map(|segment| TranscriptionSegment {
                start_time: segment.start,
                end_time: segment.end,
                text: segment.text,
            })
            .collect(),
        confidence_score,
        model_used: handle.size().to_string(),
        processing_time: started.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelLoader, RawSegment, RawTranscription, SegmentCallback, SpeechEngine};
    use anyhow::anyhow;
    use std::io::Cursor;

    struct MockEngine {
        segment_count: usize,
        fail: bool,
    }

    impl SpeechEngine for MockEngine {
        fn transcribe(
            &self,
            _samples: &[f32],
            options: &TranscribeOptions,
            on_segment: Option<SegmentCallback>,
        ) -> anyhow::Result<RawTranscription> {
            if self.fail {
                return Err(anyhow!("mock engine failure"));
            }
            let mut segments = Vec::new();
            for index in 0..self.segment_count {
                segments.push(RawSegment {
                    start: index as f64 * 30.0,
                    end: (index + 1) as f64 * 30.0,
                    text: format!("segment {}", index),
                    avg_logprob: Some(-0.2),
                });
                if let Some(callback) = on_segment {
                    callback(index);
                }
            }
            Ok(RawTranscription {
                text: "mock transcript".to_string(),
                language: options.language.clone(),
                segments,
            })
        }
    }

    struct MockLoader {
        fail_engine: bool,
    }

    impl ModelLoader for MockLoader {
        fn load(&self, _size: ModelSize) -> anyhow::Result<Arc<dyn SpeechEngine>> {
            Ok(Arc::new(MockEngine {
                segment_count: 2,
                fail: self.fail_engine,
            }))
        }
    }

    fn sample_wav() -> Vec<u8> {
        let samples: Vec<i16> = (0..16_000).map(|i| ((i % 100) as i16 - 50) * 100).collect();
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 16_000, 16);
        let mut buffer = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut buffer).unwrap();
        buffer.into_inner()
    }

    fn processing_config() -> ProcessingConfig {
        ProcessingConfig {
            max_concurrent_transcriptions: 2,
            preprocessing_timeout_seconds: 10,
            transcription_timeout_seconds: 10,
        }
    }

    async fn build_orchestrator(fail_engine: bool) -> (TranscriptionOrchestrator, Arc<JobManager>) {
        let models = Arc::new(ModelManager::new(Arc::new(MockLoader { fail_engine })));
        models.load_model(ModelSize::Tiny).await.unwrap();
        let jobs = Arc::new(JobManager::new());
        let pool = Arc::new(WorkerPool::new(2));
        let orchestrator = TranscriptionOrchestrator::new(
            models,
            Arc::clone(&jobs),
            pool,
            processing_config(),
        );
        (orchestrator, jobs)
    }

    async fn wait_for_terminal(jobs: &JobManager, id: Uuid) -> crate::jobs::Job {
        for _ in 0..100 {
            if let Some(job) = jobs.get_job(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_sync_transcribe_returns_result() {
        let (orchestrator, jobs) = build_orchestrator(false).await;
        let result = orchestrator
            .transcribe(sample_wav(), TranscribeParams::default())
            .await
            .unwrap();

        assert_eq!(result.text, "mock transcript");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.model_used, "tiny");
        let confidence = result.confidence_score.unwrap();
        assert!((confidence - 0.8).abs() < 1e-9);
        assert!((result.duration - 1.0).abs() < 0.01);

        // The backing job is completed, not stuck.
        assert_eq!(jobs.job_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_completes_job_with_progress() {
        let (orchestrator, jobs) = build_orchestrator(false).await;
        let id = orchestrator
            .submit(sample_wav(), TranscribeParams::default())
            .await
            .unwrap();

        let job = wait_for_terminal(&jobs, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert!(job.result.is_some());
    }

    #[tokio::test]
    async fn test_submit_without_model_leaves_no_job_behind() {
        let models = Arc::new(ModelManager::new(Arc::new(MockLoader { fail_engine: false })));
        let jobs = Arc::new(JobManager::new());
        let pool = Arc::new(WorkerPool::new(2));
        let orchestrator = TranscriptionOrchestrator::new(
            models,
            Arc::clone(&jobs),
            pool,
            processing_config(),
        );

        let err = orchestrator
            .submit(sample_wav(), TranscribeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ModelNotLoaded));
        assert_eq!(jobs.job_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_marks_job_failed() {
        let (orchestrator, jobs) = build_orchestrator(true).await;
        let id = orchestrator
            .submit(sample_wav(), TranscribeParams::default())
            .await
            .unwrap();

        let job = wait_for_terminal(&jobs, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        // The stored error carries the underlying cause so a polling client
        // gets an actionable diagnostic, not just the generic message.
        let error = job.error.as_deref().unwrap();
        assert!(error.contains("Transcription failed"));
        assert!(error.contains("mock engine failure"));
    }

    #[tokio::test]
    async fn test_invalid_audio_fails_the_job() {
        let (orchestrator, jobs) = build_orchestrator(false).await;
        let id = orchestrator
            .submit(b"not audio at all".to_vec(), TranscribeParams::default())
            .await
            .unwrap();

        let job = wait_for_terminal(&jobs, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("Invalid audio format"));
    }

    #[test]
    fn test_segment_progress_is_capped() {
        assert_eq!(segment_progress(0), 45.0);
        assert_eq!(segment_progress(5), 70.0);
        assert_eq!(segment_progress(10), SEGMENT_PROGRESS_MAX);
        assert_eq!(segment_progress(100), SEGMENT_PROGRESS_MAX);
    }
}
