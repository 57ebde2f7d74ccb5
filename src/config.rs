//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Built-in defaults
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` as section separator)
//!
//! Priority (highest to lowest): environment variables, config.toml, defaults.
//! `HOST` and `PORT` are honored as overrides for deployment platforms that
//! set them without the APP_ prefix.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub processing: ProcessingConfig,
    pub limits: LimitsConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Whisper model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model size loaded at startup and used when requests don't ask for a
    /// specific one (tiny, base, small, medium, large).
    pub default_size: String,

    /// Whether to load the default model during startup. When false the
    /// service starts degraded and a model must be loaded via the API.
    pub preload: bool,
}

/// Concurrency and timeout settings for transcription work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum number of transcriptions running in parallel. Additional
    /// submissions queue rather than being rejected.
    pub max_concurrent_transcriptions: usize,

    /// Upper bound on audio decode/normalization per request (seconds).
    pub preprocessing_timeout_seconds: u64,

    /// Upper bound on model inference per request (seconds).
    pub transcription_timeout_seconds: u64,
}

/// Upload validation limits, enforced before any resource is allocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_file_size_mb: usize,

    /// Accepted file extensions. Only WAV containers are decoded in-process;
    /// other formats must be converted before upload.
    pub supported_formats: Vec<String>,
}

/// Job registry retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Jobs older than this are reaped regardless of status.
    pub max_age_seconds: u64,

    /// How often the background reaper runs.
    pub cleanup_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            model: ModelConfig {
                default_size: "base".to_string(),
                preload: true,
            },
            processing: ProcessingConfig {
                max_concurrent_transcriptions: 3,
                preprocessing_timeout_seconds: 60,
                transcription_timeout_seconds: 300,
            },
            limits: LimitsConfig {
                max_file_size_mb: 25,
                supported_formats: vec!["wav".to_string()],
            },
            jobs: JobsConfig {
                max_age_seconds: 3600,
                cleanup_interval_seconds: 300,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and APP_* environment
    /// variables, in that order of increasing priority.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // APP_SERVER__PORT=9000 becomes server.port
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Deployment platforms commonly set bare HOST/PORT.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot work before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.model
            .default_size
            .parse::<crate::model::ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid default model size: {}", e))?;

        if self.processing.max_concurrent_transcriptions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent transcriptions must be greater than 0"
            ));
        }

        if self.processing.preprocessing_timeout_seconds == 0
            || self.processing.transcription_timeout_seconds == 0
        {
            return Err(anyhow::anyhow!("Timeouts must be greater than 0 seconds"));
        }

        if self.limits.max_file_size_mb == 0 || self.limits.max_file_size_mb > 1000 {
            return Err(anyhow::anyhow!(
                "Max file size must be between 1 and 1000 MB"
            ));
        }

        if self.limits.supported_formats.is_empty() {
            return Err(anyhow::anyhow!("At least one audio format must be supported"));
        }

        if self.jobs.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "Job cleanup interval must be greater than 0 seconds"
            ));
        }

        Ok(())
    }
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}
