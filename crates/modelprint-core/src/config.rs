//! Centralized configuration for modelprint.
//!
//! Fixed limits live in the unit structs below. Policy values that callers may
//! want to tune (hash threshold and window size, registry endpoints, retries)
//! live in [`PipelineConfig`], which deserializes from JSON with every field
//! defaulted.

use crate::error::{ModelprintError, Result};
use crate::network::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Fingerprinting defaults.
pub struct HashingConfig;

impl HashingConfig {
    /// Files strictly larger than this get a quick (windowed) hash.
    pub const FULL_HASH_THRESHOLD: u64 = 1024 * 1024 * 1024; // 1 GiB
    pub const QUICK_WINDOW_SIZE: usize = 256 * 1024; // 256 KiB
    /// Read size for streaming full hashes (8MB, optimal for SSDs).
    pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;
    /// Literal prefix rendered in front of quick digests.
    pub const QUICK_TAG: &'static str = "quick-sha256:";
}

/// Hard limits for the binary container parsers.
pub struct ContainerLimits;

impl ContainerLimits {
    pub const SAFETENSORS_PREFIX_LEN: usize = 8;
    pub const SAFETENSORS_MAX_HEADER: u64 = 100 * 1024 * 1024; // 100 MiB
    /// Longest metadata value carried forward before truncation.
    pub const MAX_FIELD_CHARS: usize = 2000;
    pub const TRUNCATION_MARKER: &'static str = "… [truncated]";
    /// Text chunks larger than this are skipped, compressed or not.
    pub const PNG_MAX_TEXT_CHUNK: usize = 32 * 1024 * 1024;
}

/// Network-related defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "modelprint/0.1";
    pub const CIVITAI_BASE_URL: &'static str = "https://civitai.com";
    pub const HUGGINGFACE_BASE_URL: &'static str = "https://huggingface.co";
    pub const SEARCH_LIMIT: u32 = 5;
    pub const MAX_CANDIDATE_QUERIES: usize = 6;
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fingerprint: FingerprintConfig,
    pub registry: RegistryConfig,
}

impl PipelineConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ModelprintError::Config {
                message: format!("Failed to read {}: {}", path.display(), e),
            })?;
        let config: PipelineConfig =
            serde_json::from_str(&content).map_err(|e| ModelprintError::Config {
                message: format!("Invalid config {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.fingerprint.quick_window_size == 0 {
            return Err(ModelprintError::Config {
                message: "fingerprint.quick_window_size must be positive".into(),
            });
        }
        if self.fingerprint.chunk_size == 0 {
            return Err(ModelprintError::Config {
                message: "fingerprint.chunk_size must be positive".into(),
            });
        }
        if self.registry.retry_attempts == 0 {
            return Err(ModelprintError::Config {
                message: "registry.retry_attempts must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Policy constants for the fingerprint engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub full_hash_threshold: u64,
    pub quick_window_size: usize,
    pub chunk_size: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            full_hash_threshold: HashingConfig::FULL_HASH_THRESHOLD,
            quick_window_size: HashingConfig::QUICK_WINDOW_SIZE,
            chunk_size: HashingConfig::CHUNK_SIZE,
        }
    }
}

/// Endpoints and request policy for registry clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub civitai_base_url: String,
    pub huggingface_base_url: String,
    #[serde(skip_serializing)]
    pub civitai_token: Option<String>,
    #[serde(skip_serializing)]
    pub huggingface_token: Option<String>,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Results requested per name-search candidate.
    pub search_limit: u32,
    pub max_candidate_queries: usize,
    /// Fetch preview image bytes after a confirmed match.
    pub fetch_previews: bool,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            civitai_base_url: NetworkConfig::CIVITAI_BASE_URL.to_string(),
            huggingface_base_url: NetworkConfig::HUGGINGFACE_BASE_URL.to_string(),
            civitai_token: None,
            huggingface_token: None,
            request_timeout_secs: NetworkConfig::REQUEST_TIMEOUT.as_secs(),
            user_agent: NetworkConfig::USER_AGENT.to_string(),
            search_limit: NetworkConfig::SEARCH_LIMIT,
            max_candidate_queries: NetworkConfig::MAX_CANDIDATE_QUERIES,
            fetch_previews: true,
            retry_attempts: NetworkConfig::MAX_RETRIES,
            retry_base_delay_ms: NetworkConfig::RETRY_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl RegistryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy for transient transport failures.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.retry_attempts.max(1))
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
    }
}
