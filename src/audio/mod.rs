//! Audio intake: upload validation and decoding to the 16 kHz mono f32
//! stream the speech engine consumes.

pub mod decode;

pub use decode::{decode_wav, AudioFile};

use crate::config::LimitsConfig;
use crate::error::{AppError, AppResult};

/// Fail-fast checks on an upload before any bytes are decoded.
///
/// Format is judged by file extension; the decoder re-validates the actual
/// content afterwards.
pub fn validate_upload(filename: &str, size_bytes: usize, limits: &LimitsConfig) -> AppResult<()> {
    let extension = filename
        .rsplit('.')
        .next()
        .filter(|ext| *ext != filename)
        .map(str::to_lowercase)
        .ok_or_else(|| {
            AppError::InvalidAudioFormat(format!("file '{}' has no extension", filename))
        })?;

    if !limits
        .supported_formats
        .iter()
        .any(|fmt| fmt.eq_ignore_ascii_case(&extension))
    {
        return Err(AppError::InvalidAudioFormat(format!(
            "unsupported format '{}', supported: {}",
            extension,
            limits.supported_formats.join(", ")
        )));
    }

    let max_bytes = limits.max_file_size_bytes();
    if size_bytes > max_bytes {
        return Err(AppError::FileTooLarge {
            size_bytes,
            max_bytes,
        });
    }

    Ok(())
}
