//! # Job Registry
//!
//! In-memory registry for asynchronous transcription jobs. Jobs move
//! `Pending -> Processing -> {Completed | Failed}`; terminal states are
//! final and later mutations are ignored with a warning. A background
//! reaper removes jobs past a configured age so the map cannot grow
//! without bound.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::orchestrator::TranscriptionResult;

/// Lifecycle state of a transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the forward-only lifecycle. Terminal states share a rank
    /// since neither can follow the other.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

/// A single transcription job and everything a status poll can see.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    /// Percent complete, 0.0 to 100.0.
    pub progress: f64,
    /// Human-readable description of the current stage.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0.0,
            message: "Job queued".to_string(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Thread-safe job store shared between handlers and workers.
///
/// All mutations go through methods that take the write lock briefly and
/// never hold it across I/O. Mutating a job that was already reaped is a
/// no-op, which lets workers and the reaper race without coordination.
pub struct JobManager {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new job in `Pending` and return its id.
    pub fn create_job(&self) -> Uuid {
        let id = Uuid::new_v4();
        let job = Job::new(id);
        // A poisoned lock only means another writer panicked; the map itself
        // is still usable, so keep going rather than losing the insert.
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(id, job);
        drop(jobs);
        debug!(job_id = %id, "Created transcription job");
        id
    }

    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Move a job forward in its lifecycle. Backward transitions and
    /// transitions out of a terminal state are ignored.
    pub fn set_status(&self, id: Uuid, status: JobStatus, message: impl Into<String>) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                warn!(job_id = %id, current = ?job.status, requested = ?status,
                    "Ignoring status change on terminal job");
                return;
            }
            if status.rank() < job.status.rank() {
                warn!(job_id = %id, current = ?job.status, requested = ?status,
                    "Ignoring backward status transition");
                return;
            }
            job.status = status;
            job.message = message.into();
            job.updated_at = Utc::now();
        }
    }

    /// Update progress, clamped to 0..=100. No-op for terminal or absent jobs.
    pub fn update_progress(&self, id: Uuid, progress: f64, message: impl Into<String>) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                return;
            }
            job.progress = progress.clamp(0.0, 100.0);
            job.message = message.into();
            job.updated_at = Utc::now();
        }
    }

    /// Complete a job with its transcription. Forces progress to 100.
    pub fn set_result(&self, id: Uuid, result: TranscriptionResult) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                warn!(job_id = %id, "Ignoring result for terminal job");
                return;
            }
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.message = "Transcription completed".to_string();
            job.result = Some(result);
            job.updated_at = Utc::now();
        }
    }

    /// Fail a job. The error text doubles as the job message so a status
    /// poll shows the failure without fetching the result.
    pub fn set_error(&self, id: Uuid, error: impl Into<String>) {
        let error = error.into();
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                warn!(job_id = %id, "Ignoring error for terminal job");
                return;
            }
            job.status = JobStatus::Failed;
            job.message = error.clone();
            job.error = Some(error);
            job.updated_at = Utc::now();
        }
    }

    /// Remove a job. Deleting an unknown id is not an error.
    pub fn delete_job(&self, id: Uuid) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.remove(&id).is_some()
    }

    /// Drop jobs older than `max_age` regardless of state and return how
    /// many were removed.
    pub fn cleanup_old_jobs(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));
        let removed = {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            let before = jobs.len();
            jobs.retain(|_, job| job.created_at > cutoff);
            before - jobs.len()
        };
        if removed > 0 {
            info!(removed, "Cleaned up expired jobs");
        }
        removed
    }

    /// Periodically sweep expired jobs until the task is aborted.
    pub async fn run_reaper(&self, max_age: Duration, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.cleanup_old_jobs(max_age);
        }
    }

    #[cfg(test)]
    fn backdate_job(&self, id: Uuid, age: Duration) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(&id) {
            job.created_at = Utc::now()
                - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> TranscriptionResult {
        TranscriptionResult {
            text: "hello world".to_string(),
            language: Some("en".to_string()),
            duration: 1.5,
            segments: Vec::new(),
            confidence_score: Some(0.9),
            model_used: "base".to_string(),
            processing_time: 0.2,
        }
    }

    #[test]
    fn test_create_assigns_unique_ids() {
        let manager = JobManager::new();
        let a = manager.create_job();
        let b = manager.create_job();
        assert_ne!(a, b);
        assert_eq!(manager.job_count(), 2);
        let job = manager.get_job(a).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_concurrent_creation_yields_distinct_ids() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let manager = Arc::new(JobManager::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || (0..50).map(|_| manager.create_job()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                ids.insert(id);
            }
        }
        assert_eq!(ids.len(), 400);
        assert_eq!(manager.job_count(), 400);
        // Every returned id must be resolvable afterwards.
        for id in &ids {
            assert!(manager.get_job(*id).is_some());
        }
    }

    #[test]
    fn test_registry_survives_poisoned_lock() {
        use std::sync::Arc;

        let manager = Arc::new(JobManager::new());
        let before = manager.create_job();

        // Panic while holding the write lock to poison it.
        let poisoner = Arc::clone(&manager);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.jobs.write().unwrap();
            panic!("poison");
        })
        .join();

        let after = manager.create_job();
        assert!(manager.get_job(before).is_some());
        assert!(manager.get_job(after).is_some());
        assert_eq!(manager.job_count(), 2);
    }

    #[test]
    fn test_progress_is_clamped() {
        let manager = JobManager::new();
        let id = manager.create_job();

        manager.update_progress(id, 150.0, "way past done");
        assert_eq!(manager.get_job(id).unwrap().progress, 100.0);

        manager.update_progress(id, -20.0, "negative");
        assert_eq!(manager.get_job(id).unwrap().progress, 0.0);
    }

    #[test]
    fn test_result_completes_job() {
        let manager = JobManager::new();
        let id = manager.create_job();
        manager.set_status(id, JobStatus::Processing, "working");
        manager.set_result(id, sample_result());

        let job = manager.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert!(job.result.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_error_message_mirrors_failure() {
        let manager = JobManager::new();
        let id = manager.create_job();
        manager.set_error(id, "decode blew up");

        let job = manager.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("decode blew up"));
        assert_eq!(job.message, "decode blew up");
    }

    #[test]
    fn test_terminal_jobs_reject_mutations() {
        let manager = JobManager::new();
        let id = manager.create_job();
        manager.set_result(id, sample_result());

        manager.set_error(id, "too late");
        manager.update_progress(id, 10.0, "too late");
        manager.set_status(id, JobStatus::Processing, "too late");

        let job = manager.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_backward_transition_ignored() {
        let manager = JobManager::new();
        let id = manager.create_job();
        manager.set_status(id, JobStatus::Processing, "working");
        manager.set_status(id, JobStatus::Pending, "rewind");
        assert_eq!(manager.get_job(id).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_delete_absent_job_is_noop() {
        let manager = JobManager::new();
        assert!(!manager.delete_job(Uuid::new_v4()));

        let id = manager.create_job();
        assert!(manager.delete_job(id));
        assert!(manager.get_job(id).is_none());
    }

    #[test]
    fn test_cleanup_removes_only_old_jobs() {
        let manager = JobManager::new();
        let old = manager.create_job();
        let fresh = manager.create_job();
        manager.backdate_job(old, Duration::from_secs(3700));

        let removed = manager.cleanup_old_jobs(Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert!(manager.get_job(old).is_none());
        assert!(manager.get_job(fresh).is_some());
    }

    #[test]
    fn test_mutation_after_cleanup_is_noop() {
        let manager = JobManager::new();
        let id = manager.create_job();
        manager.backdate_job(id, Duration::from_secs(7200));
        manager.cleanup_old_jobs(Duration::from_secs(3600));

        manager.set_result(id, sample_result());
        manager.update_progress(id, 50.0, "ghost update");
        assert!(manager.get_job(id).is_none());
    }
}
