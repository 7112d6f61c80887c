//! Remote model registries.
//!
//! Each provider implements [`RegistryClient`] with its own response types and
//! a normalization step that turns a provider answer into a [`RegistryMatch`].
//! The provider set is closed: see [`Platform`].
//!
//! # Module Organization
//!
//! - [`civitai`] - Exact lookup by full SHA-256
//! - [`huggingface`] - Name search confirmed by LFS hash or filename
//! - [`candidates`] - Ranked search queries derived from a file name and local metadata
//! - [`preview`] - Preview image selection and the single preview fetch

pub mod candidates;
pub mod civitai;
pub mod huggingface;
pub mod preview;

mod http;

pub use civitai::CivitaiClient;
pub use huggingface::HuggingFaceClient;
pub use preview::{PreviewAsset, PreviewFetch};

use crate::config::RegistryConfig;
use crate::error::{ModelprintError, Result};
use crate::fingerprint::Fingerprint;
use crate::FieldMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Supported registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Civitai,
    HuggingFace,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Civitai, Platform::HuggingFace];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Civitai => "civitai",
            Platform::HuggingFace => "huggingface",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ModelprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "civitai" => Ok(Platform::Civitai),
            "huggingface" | "hf" => Ok(Platform::HuggingFace),
            other => Err(ModelprintError::Config {
                message: format!("Unknown registry: {}", other),
            }),
        }
    }
}

/// How a registry can be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Exact lookup by full-file SHA-256.
    pub fingerprint_lookup: bool,
    /// Fuzzy lookup by name.
    pub name_search: bool,
}

/// Everything a registry client may use to find an asset.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub file_name: String,
    pub fingerprint: Fingerprint,
    /// Relevant locally extracted fields, used to derive search anchors.
    pub local_fields: FieldMap,
}

impl ResolveRequest {
    pub fn new(file_name: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            file_name: file_name.into(),
            fingerprint,
            local_fields: FieldMap::new(),
        }
    }

    pub fn with_local_fields(mut self, fields: FieldMap) -> Self {
        self.local_fields = fields;
        self
    }
}

/// A confirmed registry match. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryMatch {
    pub platform: Platform,
    pub canonical_url: String,
    pub preview: PreviewAsset,
    /// Normalized fields (base model, trigger words, platform ids, ...).
    pub fields: FieldMap,
}

/// A registry that can map a file to descriptive metadata.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn platform(&self) -> Platform;

    fn capabilities(&self) -> Capabilities;

    /// Resolve a file to a match.
    ///
    /// Returns `NotFound` when the registry has no match, and a typed failure
    /// when the registry could not be checked.
    async fn resolve(&self, request: &ResolveRequest) -> Result<RegistryMatch>;
}

/// Build a client for `platform` from configuration.
pub fn build_client(platform: Platform, config: &RegistryConfig) -> Result<Arc<dyn RegistryClient>> {
    Ok(match platform {
        Platform::Civitai => Arc::new(CivitaiClient::new(config)?),
        Platform::HuggingFace => Arc::new(HuggingFaceClient::new(config)?),
    })
}

/// Build one client per supported platform, in [`Platform::ALL`] order.
pub fn build_clients(config: &RegistryConfig) -> Result<Vec<Arc<dyn RegistryClient>>> {
    Platform::ALL
        .iter()
        .map(|&platform| build_client(platform, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_names_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert_eq!("HF".parse::<Platform>().unwrap(), Platform::HuggingFace);
        assert!("bogus".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_serializes_lowercase() {
        let json = serde_json::to_string(&Platform::HuggingFace).unwrap();
        assert_eq!(json, "\"huggingface\"");
    }

    #[tokio::test]
    async fn test_build_clients_matches_platform_order() {
        let clients = build_clients(&RegistryConfig::default()).unwrap();
        let platforms: Vec<Platform> = clients.iter().map(|c| c.platform()).collect();
        assert_eq!(platforms, Platform::ALL.to_vec());
        assert!(clients[0].capabilities().fingerprint_lookup);
        assert!(clients[1].capabilities().name_search);
    }
}
