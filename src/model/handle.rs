//! Immutable record of one loaded model instance.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::model::engine::SpeechEngine;
use crate::model::ModelSize;

/// One loaded model plus its metadata. Never mutated after construction;
/// the manager replaces the whole handle on a swap. In-flight tasks that
/// captured an `Arc` to a superseded handle keep using it until they finish.
pub struct ModelHandle {
    size: ModelSize,
    loaded_at: DateTime<Utc>,
    load_duration_seconds: f64,
    engine: Arc<dyn SpeechEngine>,
}

impl ModelHandle {
    pub fn new(size: ModelSize, load_duration_seconds: f64, engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            size,
            loaded_at: Utc::now(),
            load_duration_seconds,
            engine,
        }
    }

    pub fn size(&self) -> ModelSize {
        self.size
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn load_duration_seconds(&self) -> f64 {
        self.load_duration_seconds
    }

    pub fn engine(&self) -> Arc<dyn SpeechEngine> {
        Arc::clone(&self.engine)
    }

    /// Rough memory estimate based on the model's weight size.
    pub fn estimated_memory_mb(&self) -> u32 {
        self.size.size_mb()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("size", &self.size)
            .field("loaded_at", &self.loaded_at)
            .field("load_duration_seconds", &self.load_duration_seconds)
            .finish()
    }
}
