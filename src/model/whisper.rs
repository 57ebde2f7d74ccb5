//! # Whisper Inference Engine
//!
//! Candle-backed implementation of [`SpeechEngine`] and [`ModelLoader`].
//! Weights and tokenizer are fetched from HuggingFace (cached locally) and
//! loaded on the configured device. Audio is processed in 30-second windows;
//! each window becomes one output segment, reported through the segment
//! callback as it finishes decoding.
//!
//! The rest of the service only sees the traits in [`crate::model::engine`];
//! nothing outside this file names a candle type.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::sync::ApiBuilder;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::model::engine::{
    ModelLoader, RawSegment, RawTranscription, SegmentCallback, SpeechEngine, TaskKind,
    TranscribeOptions,
};
use crate::model::ModelSize;

const SOT_TOKEN: u32 = 50258;
const EOT_TOKEN: u32 = 50257;
const TRANSCRIBE_TOKEN: u32 = 50359;
const TRANSLATE_TOKEN: u32 = 50358;
const NO_TIMESTAMPS_TOKEN: u32 = 50363;

/// Samples per decoding window (30 s at 16 kHz).
const WINDOW_SAMPLES: usize = 30 * m::SAMPLE_RATE;
const MAX_DECODE_TOKENS: usize = 224;
const DECODE_SEED: u64 = 299_792_458;
const RETRY_TEMPERATURE_STEP: f32 = 0.2;
const DECODE_ATTEMPTS: usize = 3;

/// Temperature for retry `attempt` of a window, starting from the request's
/// value and warming up so repeated attempts actually explore different
/// token sequences.
fn attempt_temperature(requested: f32, attempt: usize) -> f32 {
    (requested.clamp(0.0, 1.0) + attempt as f32 * RETRY_TEMPERATURE_STEP).min(1.0)
}

/// Loads [`WhisperEngine`] instances for the model manager.
pub struct WhisperLoader {
    device: Device,
}

impl WhisperLoader {
    pub fn new() -> Self {
        Self { device: Device::Cpu }
    }
}

impl Default for WhisperLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for WhisperLoader {
    fn load(&self, size: ModelSize) -> Result<Arc<dyn SpeechEngine>> {
        let engine = WhisperEngine::load(size, self.device.clone())?;
        Ok(Arc::new(engine))
    }
}

/// A loaded whisper model. The candle model needs `&mut` for its KV cache,
/// so inference is serialized per engine behind a `Mutex`; concurrency
/// across requests comes from the worker pool, not from within one engine.
pub struct WhisperEngine {
    model: Mutex<m::model::Whisper>,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
}

impl WhisperEngine {
    /// Download (or hit the local cache for) and load the model weights,
    /// tokenizer, and configuration.
    pub fn load(size: ModelSize, device: Device) -> Result<Self> {
        info!(model_size = %size, repo = size.repo_name(), "Fetching whisper model files");

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        let api = builder.build().context("failed to build HuggingFace API client")?;
        let repo = api.model(size.repo_name().to_string());

        let config_file = repo
            .get("config.json")
            .with_context(|| format!("failed to download config.json from {}", size.repo_name()))?;
        let tokenizer_file = repo
            .get("tokenizer.json")
            .with_context(|| format!("failed to download tokenizer.json from {}", size.repo_name()))?;
        let weights_file = repo
            .get("model.safetensors")
            .with_context(|| format!("failed to download weights from {}", size.repo_name()))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_file)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;

        debug!("Loading model weights");
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_file], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        info!(model_size = %size, "Whisper model ready");
        Ok(Self {
            model: Mutex::new(model),
            config,
            tokenizer,
            device,
        })
    }

    /// Convert one PCM window into a log-mel spectrogram tensor.
    ///
    /// Simplified energy-based features rather than a full STFT mel bank;
    /// shape matches what the encoder expects (n_mels x 3000 frames).
    fn pcm_to_mel(&self, window: &[f32]) -> Result<Tensor> {
        let mut padded = vec![0.0f32; WINDOW_SAMPLES];
        let copy_len = window.len().min(WINDOW_SAMPLES);
        padded[..copy_len].copy_from_slice(&window[..copy_len]);

        let n_mels = self.config.num_mel_bins as usize;
        let n_frames = 3000;
        let frame_size = padded.len() / n_frames;
        let mut mel = vec![0.0f32; n_mels * n_frames];

        for frame in 0..n_frames {
            let start = frame * frame_size;
            let end = (start + frame_size).min(padded.len());
            let mut energy = 0.0f32;
            for sample in &padded[start..end] {
                energy += sample.abs();
            }
            // -80 dB floor
            let value = (energy / frame_size as f32).ln().max(-11.5129);
            for mel_bin in 0..n_mels {
                mel[mel_bin * n_frames + frame] = value;
            }
        }

        Ok(Tensor::from_vec(mel, (n_mels, n_frames), &self.device)?)
    }

    fn language_token(&self, language: &str) -> Option<u32> {
        let tag = format!("<|{}|>", language.to_lowercase());
        self.tokenizer.token_to_id(&tag)
    }

    /// Decode one encoded window into text tokens, returning the tokens and
    /// their mean log-probability. Token selection is delegated to the
    /// sampler: argmax at temperature zero, softmax sampling above it.
    fn decode_window(
        &self,
        model: &mut m::model::Whisper,
        encoder_output: &Tensor,
        options: &TranscribeOptions,
        sampler: &mut LogitsProcessor,
    ) -> Result<(Vec<u32>, f64)> {
        let mut tokens = vec![SOT_TOKEN];
        if let Some(lang) = options.language.as_deref() {
            if let Some(token) = self.language_token(lang) {
                tokens.push(token);
            }
        }
        tokens.push(match options.task {
            TaskKind::Transcribe => TRANSCRIBE_TOKEN,
            TaskKind::Translate => TRANSLATE_TOKEN,
        });
        tokens.push(NO_TIMESTAMPS_TOKEN);

        let mut output = Vec::new();
        let mut logprob_sum = 0.0f64;

        for step in 0..MAX_DECODE_TOKENS {
            let input = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
            let logits = model.decoder.forward(&input, encoder_output, step == 0)?;
            let last_logits = logits.i((0, tokens.len() - 1, ..))?;

            let next_token = sampler.sample(&last_logits)?;
            if next_token == EOT_TOKEN {
                break;
            }

            let log_probs = candle_nn::ops::log_softmax(&last_logits, 0)?;
            logprob_sum += log_probs.i(next_token as usize)?.to_scalar::<f32>()? as f64;

            if is_repetitive(&output, next_token) {
                return Err(anyhow!("decoder entered a repetition loop"));
            }

            tokens.push(next_token);
            output.push(next_token);
        }

        let avg_logprob = if output.is_empty() {
            0.0
        } else {
            logprob_sum / output.len() as f64
        };
        Ok((output, avg_logprob))
    }

    fn tokens_to_text(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;
        Ok(text
            .replace("<|startoftranscript|>", "")
            .replace("<|endoftext|>", "")
            .replace("<|notimestamps|>", "")
            .trim()
            .to_string())
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(
        &self,
        samples: &[f32],
        options: &TranscribeOptions,
        on_segment: Option<SegmentCallback>,
    ) -> Result<RawTranscription> {
        if samples.is_empty() {
            return Err(anyhow!("audio data is empty"));
        }

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("whisper model lock poisoned"))?;

        let mut segments = Vec::new();
        let mut full_text = String::new();

        for (index, window) in samples.chunks(WINDOW_SAMPLES).enumerate() {
            let mel = self.pcm_to_mel(window)?.unsqueeze(0)?;
            let encoder_output = model.encoder.forward(&mel, true)?;

            // Retry with increasing temperature when decoding degenerates
            // into repetition; each attempt samples a different sequence.
            let mut decoded = None;
            for attempt in 0..DECODE_ATTEMPTS {
                let temperature = attempt_temperature(options.temperature, attempt);
                let mut sampler = LogitsProcessor::new(
                    DECODE_SEED.wrapping_add(attempt as u64),
                    (temperature > 0.0).then_some(temperature as f64),
                    None,
                );
                match self.decode_window(&mut model, &encoder_output, options, &mut sampler) {
                    Ok(result) => {
                        decoded = Some(result);
                        break;
                    }
                    Err(e) if attempt + 1 < DECODE_ATTEMPTS => {
                        debug!(window = index, attempt, error = %e, "Retrying window decode");
                    }
                    Err(e) => return Err(e),
                }
            }
            let (tokens, avg_logprob) =
                decoded.ok_or_else(|| anyhow!("window decode failed after retries"))?;

            let text = self.tokens_to_text(&tokens)?;
            let start = (index * WINDOW_SAMPLES) as f64 / m::SAMPLE_RATE as f64;
            let end = start + window.len() as f64 / m::SAMPLE_RATE as f64;

            if !full_text.is_empty() && !text.is_empty() {
                full_text.push(' ');
            }
            full_text.push_str(&text);
            segments.push(RawSegment {
                start,
                end,
                text,
                avg_logprob: Some(avg_logprob),
            });

            if let Some(callback) = on_segment {
                callback(index);
            }
        }

        Ok(RawTranscription {
            text: full_text,
            language: options.language.clone(),
            segments,
        })
    }
}

/// Detect immediate or short-pattern token repetition, the usual greedy
/// decoding failure mode.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() >= 2 {
        let n = tokens.len();
        if tokens[n - 1] == new_token && tokens[n - 2] == new_token {
            return true;
        }
    }
    if tokens.len() >= 6 {
        let n = tokens.len();
        if tokens[n - 3..] == tokens[n - 6..n - 3] {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetition_detection() {
        assert!(!is_repetitive(&[], 5));
        assert!(!is_repetitive(&[1, 2, 3], 4));
        // Same token three times in a row.
        assert!(is_repetitive(&[1, 5, 5], 5));
        // A repeated three-token pattern already in the history.
        assert!(is_repetitive(&[1, 2, 3, 1, 2, 3], 7));
        assert!(!is_repetitive(&[9, 1, 2, 3, 4, 5], 6));
    }

    #[test]
    fn test_window_math() {
        assert_eq!(WINDOW_SAMPLES, 480_000);
    }

    #[test]
    fn test_retry_temperatures_warm_up() {
        // A deterministic first attempt must be followed by sampling
        // attempts, otherwise retries would replay the same sequence.
        assert_eq!(attempt_temperature(0.0, 0), 0.0);
        assert!(attempt_temperature(0.0, 1) > 0.0);
        assert!(attempt_temperature(0.0, 2) > attempt_temperature(0.0, 1));

        // A requested temperature is the starting point, capped at 1.0.
        assert_eq!(attempt_temperature(0.5, 0), 0.5);
        assert_eq!(attempt_temperature(0.9, 2), 1.0);
        assert_eq!(attempt_temperature(7.0, 0), 1.0);
    }
}
