//! Error types for modelprint.
//!
//! Format-level failures (`UnreadableFile`, `MalformedContainer`) are recovered inside
//! the parsing components and never reach callers of the public extraction
//! functions. Registry failures are surfaced so the caller can tell
//! "nothing found" apart from "could not check".

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::Platform;

/// Main error type for the modelprint library.
#[derive(Debug, Error)]
pub enum ModelprintError {
    // File and format errors
    #[error("Unreadable file {path:?}: {message}")]
    UnreadableFile {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Malformed {format} container: {message}")]
    MalformedContainer {
        format: &'static str,
        message: String,
    },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    // Registry errors
    #[error("No match on {platform}")]
    NotFound { platform: Platform },

    #[error("{platform} returned {status}: {message}")]
    Provider {
        platform: Platform,
        status: u16,
        message: String,
    },

    #[error("Request to {platform} failed: {message}")]
    Transport { platform: Platform, message: String },

    #[error("Match on {platform} has no preview image: {canonical_url}")]
    NoPreviewAvailable {
        platform: Platform,
        canonical_url: String,
    },

    #[error("{platform} needs a full SHA-256 fingerprint, none is available")]
    FingerprintUnavailable { platform: Platform },

    #[error("Registry resolution cancelled")]
    Cancelled,

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for modelprint operations.
pub type Result<T> = std::result::Result<T, ModelprintError>;

impl From<std::io::Error> for ModelprintError {
    fn from(err: std::io::Error) -> Self {
        ModelprintError::UnreadableFile {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ModelprintError {
    fn from(err: serde_json::Error) -> Self {
        ModelprintError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ModelprintError {
    /// Create an unreadable-file error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ModelprintError::UnreadableFile {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub(crate) fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        ModelprintError::MalformedContainer {
            format,
            message: message.into(),
        }
    }

    /// Map a reqwest failure to a transport error for `platform`.
    pub(crate) fn transport(platform: Platform, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timed out: {}", err)
        } else {
            err.to_string()
        };
        ModelprintError::Transport { platform, message }
    }

    /// Stable machine-readable kind, used by callers to render per-asset state.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelprintError::UnreadableFile { .. } => "unreadable_file",
            ModelprintError::MalformedContainer { .. } => "malformed_container",
            ModelprintError::HashMismatch { .. } => "hash_mismatch",
            ModelprintError::NotFound { .. } => "not_found",
            ModelprintError::Provider { .. } => "provider_error",
            ModelprintError::Transport { .. } => "transport_error",
            ModelprintError::NoPreviewAvailable { .. } => "no_preview_available",
            ModelprintError::FingerprintUnavailable { .. } => "fingerprint_unavailable",
            ModelprintError::Cancelled => "cancelled",
            ModelprintError::Json { .. } => "json",
            ModelprintError::Config { .. } => "config",
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Only transport failures and server-side (5xx) or rate-limit (429)
    /// responses are considered transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelprintError::Transport { .. } => true,
            ModelprintError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// `NotFound` is an expected outcome and is not logged as an error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelprintError::NotFound { .. })
    }
}
