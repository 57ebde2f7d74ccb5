//! WAV decoding and preprocessing.
//!
//! Uploads arrive as complete byte buffers; we decode, downmix to mono,
//! resample to the engine's 16 kHz rate, then remove DC offset and
//! normalize peaks before inference.

use std::io::Cursor;

use tracing::debug;

use crate::error::{AppError, AppResult};

/// Sample rate the speech engine expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Peak level normalization aims for, just under full scale.
const NORMALIZE_TARGET: f32 = 0.95;

/// Quieter signals than this are left alone; boosting near-silence just
/// amplifies noise.
const MIN_NORMALIZE_PEAK: f32 = 0.1;

/// Decoded, engine-ready audio.
#[derive(Debug, Clone)]
pub struct AudioFile {
    /// Mono samples at [`TARGET_SAMPLE_RATE`], normalized to [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub duration_seconds: f64,
}

/// Decode a WAV byte buffer into engine-ready samples.
pub fn decode_wav(bytes: &[u8]) -> AppResult<AudioFile> {
    let mut reader = Cursor::new(bytes);
    let (header, data) = wav::read(&mut reader)
        .map_err(|e| AppError::InvalidAudioFormat(format!("not a valid WAV file: {}", e)))?;

    if header.channel_count == 0 {
        return Err(AppError::InvalidAudioFormat(
            "WAV header reports zero channels".to_string(),
        ));
    }
    if header.sampling_rate == 0 {
        return Err(AppError::InvalidAudioFormat(
            "WAV header reports zero sample rate".to_string(),
        ));
    }

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => {
            samples.into_iter().map(|s| s as f32 / 32768.0).collect()
        }
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    };

    if interleaved.is_empty() {
        return Err(AppError::AudioProcessingError(
            "audio file contains no samples".to_string(),
        ));
    }

    let mono = downmix(&interleaved, header.channel_count as usize);
    let mut samples = resample(&mono, header.sampling_rate, TARGET_SAMPLE_RATE);
    preprocess(&mut samples);

    let duration_seconds = samples.len() as f64 / TARGET_SAMPLE_RATE as f64;
    debug!(
        channels = header.channel_count,
        source_rate = header.sampling_rate,
        samples = samples.len(),
        duration_seconds,
        "Decoded WAV upload"
    );

    Ok(AudioFile {
        samples,
        duration_seconds,
    })
}

/// Average interleaved channels into mono.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler. Adequate for speech input; anything
/// fancier would be wasted ahead of a lossy model.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let position = i as f64 * ratio;
        let index = position as usize;
        let frac = (position - index as f64) as f32;
        let a = samples[index.min(samples.len() - 1)];
        let b = samples[(index + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// Remove DC offset and normalize peaks to just under full scale.
fn preprocess(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }

    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    for sample in samples.iter_mut() {
        *sample -= mean;
    }

    let peak = samples.iter().fold(0.0f32, |max, s| max.max(s.abs()));
    if peak > MIN_NORMALIZE_PEAK {
        let gain = NORMALIZE_TARGET / peak;
        for sample in samples.iter_mut() {
            *sample *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, channels, sample_rate, 16);
        let mut buffer = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut buffer).unwrap();
        buffer.into_inner()
    }

    fn sine(sample_rate: u32, seconds: f32, freq: f32) -> Vec<i16> {
        let count = (sample_rate as f32 * seconds) as usize;
        (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                ((t * freq * 2.0 * std::f32::consts::PI).sin() * 16000.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_decode_mono_16k_passthrough() {
        let samples = sine(16_000, 1.0, 440.0);
        let bytes = wav_bytes(&samples, 1, 16_000);

        let audio = decode_wav(&bytes).unwrap();
        assert_eq!(audio.samples.len(), samples.len());
        assert!((audio.duration_seconds - 1.0).abs() < 0.01);
        assert!(audio.samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_decode_stereo_downmixes() {
        let mono = sine(16_000, 0.5, 440.0);
        let stereo: Vec<i16> = mono.iter().flat_map(|&s| [s, s]).collect();
        let bytes = wav_bytes(&stereo, 2, 16_000);

        let audio = decode_wav(&bytes).unwrap();
        assert_eq!(audio.samples.len(), mono.len());
    }

    #[test]
    fn test_decode_resamples_to_16k() {
        let samples = sine(48_000, 1.0, 440.0);
        let bytes = wav_bytes(&samples, 1, 48_000);

        let audio = decode_wav(&bytes).unwrap();
        let expected = 16_000;
        assert!((audio.samples.len() as i64 - expected).abs() < 16);
        assert!((audio.duration_seconds - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_wav(b"definitely not a wav file").unwrap_err();
        assert!(matches!(err, AppError::InvalidAudioFormat(_)));
    }

    #[test]
    fn test_decode_rejects_empty_audio() {
        let bytes = wav_bytes(&[], 1, 16_000);
        let err = decode_wav(&bytes).unwrap_err();
        assert!(matches!(err, AppError::AudioProcessingError(_)));
    }

    #[test]
    fn test_preprocess_removes_dc_offset() {
        let mut samples = vec![0.6, 0.4, 0.6, 0.4];
        preprocess(&mut samples);
        let mean: f32 = samples.iter().sum::<f32>() / samples.len() as f32;
        assert!(mean.abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_normalizes_loud_audio() {
        let mut samples = vec![0.25, -0.5, 0.5, -0.25];
        preprocess(&mut samples);
        let peak = samples.iter().fold(0.0f32, |max, s| max.max(s.abs()));
        assert!((peak - NORMALIZE_TARGET).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_leaves_quiet_audio_alone() {
        let mut samples = vec![0.02, -0.02, 0.02, -0.02];
        let original = samples.clone();
        preprocess(&mut samples);
        // Below the normalization floor; no gain applied.
        assert_eq!(samples, original);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 100.0).sin()).collect();
        let out = resample(&samples, 32_000, 16_000);
        assert_eq!(out.len(), 500);
    }
}
