//! Black-box seam to the speech recognition engine.
//!
//! The core (manager, orchestrator, job tracking) depends on the
//! [`SpeechEngine`] and [`ModelLoader`] traits instead of a concrete
//! inference implementation. Tests substitute mocks; production wires in the
//! candle-backed whisper engine.

use anyhow::Result;
use std::sync::Arc;

use crate::model::ModelSize;

/// Type of inference task requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Convert speech to text in the input language.
    Transcribe,
    /// Convert speech to English text regardless of input language.
    Translate,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Transcribe => "transcribe",
            TaskKind::Translate => "translate",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transcribe" => Ok(TaskKind::Transcribe),
            "translate" => Ok(TaskKind::Translate),
            other => Err(anyhow::anyhow!("Unknown task: {}", other)),
        }
    }
}

/// Decoding options forwarded to the engine.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Optional ISO 639-1 language hint ("en", "es", ...).
    pub language: Option<String>,
    /// Sampling temperature in [0.0, 1.0]; 0.0 is deterministic.
    pub temperature: f32,
    pub task: TaskKind,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: None,
            temperature: 0.0,
            task: TaskKind::Transcribe,
        }
    }
}

/// One timestamped chunk of the raw engine output.
#[derive(Debug, Clone)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Mean log-probability of the segment's tokens, when the engine
    /// provides one.
    pub avg_logprob: Option<f64>,
}

/// Full raw engine output for one audio input.
#[derive(Debug, Clone, Default)]
pub struct RawTranscription {
    pub text: String,
    pub language: Option<String>,
    pub segments: Vec<RawSegment>,
}

/// Called with the zero-based segment index as segments finish decoding, so
/// callers can surface incremental progress.
pub type SegmentCallback<'a> = &'a (dyn Fn(usize) + Send + Sync);

/// A loaded speech-to-text engine. Implementations must be safe to share
/// across worker tasks; internal synchronization is the engine's concern.
pub trait SpeechEngine: Send + Sync {
    /// Run inference over 16 kHz mono f32 PCM samples.
    ///
    /// Blocking and potentially minutes-long; callers run this off the
    /// request path.
    fn transcribe(
        &self,
        samples: &[f32],
        options: &TranscribeOptions,
        on_segment: Option<SegmentCallback>,
    ) -> Result<RawTranscription>;
}

/// Loads engine instances. Blocking and potentially slow (downloads weights
/// on first use); the model manager runs it on a blocking thread.
pub trait ModelLoader: Send + Sync {
    fn load(&self, size: ModelSize) -> Result<Arc<dyn SpeechEngine>>;
}
