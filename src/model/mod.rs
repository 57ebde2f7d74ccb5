//! Model lifecycle: size catalog, engine abstraction, the loaded-model
//! handle, and the manager that owns load/swap.

pub mod engine;
pub mod handle;
pub mod manager;
pub mod size;
pub mod whisper;

pub use engine::{
    ModelLoader, RawSegment, RawTranscription, SegmentCallback, SpeechEngine, TaskKind,
    TranscribeOptions,
};
pub use handle::ModelHandle;
pub use manager::{LoadOutcome, ModelInfo, ModelManager};
pub use size::ModelSize;
pub use whisper::WhisperLoader;

/// Languages the whisper family can transcribe, as ISO 639-1 codes.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su",
];
