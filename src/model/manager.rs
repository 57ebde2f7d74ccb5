//! # Model Lifecycle Management
//!
//! Owns the single current [`ModelHandle`] and serializes load/swap
//! operations. Reads of the current handle never block behind a load: the
//! handle lives under a briefly-held `RwLock` while the loading state is an
//! `AtomicBool` taken with compare-and-swap. The actual load runs on a
//! blocking thread so the request path stays responsive.
//!
//! ## Failure Semantics:
//! A failed load clears the loading flag and leaves the previously current
//! handle untouched — a failed swap never destroys a working model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::model::engine::ModelLoader;
use crate::model::{ModelHandle, ModelSize, SUPPORTED_LANGUAGES};

/// Result of a [`ModelManager::load_model`] call.
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub model_size: String,
    pub load_duration_seconds: f64,
    /// True when the requested model was already current and no work ran.
    pub cached: bool,
}

/// Snapshot served by `GET /model/info`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_size: String,
    pub memory_usage_mb: f64,
    pub load_time_seconds: f64,
    pub supported_languages: Vec<&'static str>,
    pub is_loaded: bool,
    pub last_loaded: Option<DateTime<Utc>>,
}

pub struct ModelManager {
    current: RwLock<Option<Arc<ModelHandle>>>,
    loading: AtomicBool,
    loader: Arc<dyn ModelLoader>,
}

impl ModelManager {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            current: RwLock::new(None),
            loading: AtomicBool::new(false),
            loader,
        }
    }

    /// Load `size`, replacing the current model on success.
    ///
    /// Returns immediately with `cached: true` when the same size is already
    /// current and no load is running. Fails with `ModelLoadInProgress` when
    /// another load is in flight. The loading flag is released on every exit
    /// path, including load failure and loader panic.
    pub async fn load_model(&self, size: ModelSize) -> AppResult<LoadOutcome> {
        if !self.loading.load(Ordering::SeqCst) {
            if let Some(handle) = self.current_handle() {
                if handle.size() == size {
                    info!(model_size = %size, "Model already loaded, cache hit");
                    return Ok(LoadOutcome {
                        model_size: size.to_string(),
                        load_duration_seconds: 0.0,
                        cached: true,
                    });
                }
            }
        }

        // Only one load at a time; losers of the race are told to retry.
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(model_size = %size, "Rejecting load: another load is in progress");
            return Err(AppError::ModelLoadInProgress {
                model_size: size.to_string(),
            });
        }

        info!(model_size = %size, "Loading model");
        let start = Instant::now();
        let loader = Arc::clone(&self.loader);
        let joined = tokio::task::spawn_blocking(move || loader.load(size)).await;

        // Clear the flag before inspecting the result so a failure never
        // leaves the manager locked.
        self.loading.store(false, Ordering::SeqCst);

        let engine = match joined {
            Ok(Ok(engine)) => engine,
            Ok(Err(e)) => {
                error!(model_size = %size, error = %format!("{:#}", e), "Model load failed");
                return Err(AppError::ModelLoadFailed {
                    model_size: size.to_string(),
                    cause: format!("{:#}", e),
                });
            }
            Err(e) => {
                error!(model_size = %size, error = %e, "Model load task panicked");
                return Err(AppError::ModelLoadFailed {
                    model_size: size.to_string(),
                    cause: e.to_string(),
                });
            }
        };

        let load_duration = start.elapsed().as_secs_f64();
        let handle = Arc::new(ModelHandle::new(size, load_duration, engine));

        // Install atomically; the superseded handle stays alive for any
        // in-flight task still holding an Arc to it. Poisoning is survivable
        // since the slot only ever holds a whole handle.
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            model_size = %size,
            load_duration_seconds = load_duration,
            "Model loaded"
        );

        Ok(LoadOutcome {
            model_size: size.to_string(),
            load_duration_seconds: load_duration,
            cached: false,
        })
    }

    /// Non-blocking read of whatever is current; `None` before first load.
    pub fn current_handle(&self) -> Option<Arc<ModelHandle>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current_handle().is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn current_size(&self) -> Option<ModelSize> {
        self.current_handle().map(|h| h.size())
    }

    pub fn model_info(&self) -> ModelInfo {
        match self.current_handle() {
            Some(handle) => ModelInfo {
                model_size: handle.size().to_string(),
                memory_usage_mb: handle.estimated_memory_mb() as f64,
                load_time_seconds: handle.load_duration_seconds(),
                supported_languages: SUPPORTED_LANGUAGES.to_vec(),
                is_loaded: true,
                last_loaded: Some(handle.loaded_at()),
            },
            None => ModelInfo {
                model_size: "none".to_string(),
                memory_usage_mb: 0.0,
                load_time_seconds: 0.0,
                supported_languages: SUPPORTED_LANGUAGES.to_vec(),
                is_loaded: false,
                last_loaded: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::engine::{
        RawTranscription, SegmentCallback, SpeechEngine, TranscribeOptions,
    };
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct NoopEngine;

    impl SpeechEngine for NoopEngine {
        fn transcribe(
            &self,
            _samples: &[f32],
            _options: &TranscribeOptions,
            _on_segment: Option<SegmentCallback>,
        ) -> anyhow::Result<RawTranscription> {
            Ok(RawTranscription::default())
        }
    }

    /// Loader with a configurable delay and a switchable failure mode.
    struct StubLoader {
        delay: Duration,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl StubLoader {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn fail_next_loads(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }
    }

    impl ModelLoader for StubLoader {
        fn load(&self, size: ModelSize) -> anyhow::Result<Arc<dyn SpeechEngine>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("weights for {} unavailable", size);
            }
            Ok(Arc::new(NoopEngine))
        }
    }

    #[tokio::test]
    async fn test_load_then_cache_hit() {
        let loader = Arc::new(StubLoader::new(Duration::ZERO));
        let manager = ModelManager::new(loader.clone());

        let first = manager.load_model(ModelSize::Base).await.unwrap();
        assert!(!first.cached);
        assert!(manager.is_loaded());

        let second = manager.load_model(ModelSize::Base).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.load_duration_seconds, 0.0);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_handle() {
        let loader = Arc::new(StubLoader::new(Duration::ZERO));
        let manager = ModelManager::new(loader.clone());
        manager.load_model(ModelSize::Tiny).await.unwrap();

        loader.fail_next_loads();
        let err = manager.load_model(ModelSize::Large).await.unwrap_err();
        assert!(matches!(err, AppError::ModelLoadFailed { .. }));

        // The working model survives the failed swap.
        assert_eq!(manager.current_size(), Some(ModelSize::Tiny));
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_concurrent_load_rejected() {
        let loader = Arc::new(StubLoader::new(Duration::from_millis(200)));
        let manager = Arc::new(ModelManager::new(loader));

        let slow = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.load_model(ModelSize::Base).await })
        };

        // Give the first load time to take the flag.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.is_loading());

        let err = manager.load_model(ModelSize::Small).await.unwrap_err();
        assert!(matches!(err, AppError::ModelLoadInProgress { .. }));

        slow.await.unwrap().unwrap();
        assert_eq!(manager.current_size(), Some(ModelSize::Base));
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_model_info_before_and_after_load() {
        let manager = ModelManager::new(Arc::new(StubLoader::new(Duration::ZERO)));

        let info = manager.model_info();
        assert!(!info.is_loaded);
        assert_eq!(info.model_size, "none");
        assert!(info.last_loaded.is_none());

        manager.load_model(ModelSize::Small).await.unwrap();
        let info = manager.model_info();
        assert!(info.is_loaded);
        assert_eq!(info.model_size, "small");
        assert_eq!(info.memory_usage_mb, 244.0);
        assert!(info.last_loaded.is_some());
    }
}
