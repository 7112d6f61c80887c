//! Civitai client: exact lookup by full-file SHA-256.
//!
//! Uses `GET /api/v1/model-versions/by-hash/{sha256}`, which returns the model
//! version whose files include that hash, or 404.

use super::http::RegistryHttp;
use super::preview::{resolve_preview, PreviewCandidate};
use super::{Capabilities, Platform, RegistryClient, RegistryMatch, ResolveRequest};
use crate::config::RegistryConfig;
use crate::error::{ModelprintError, Result};
use crate::FieldMap;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

/// Civitai nsfwLevel values at or below this are general-audience.
const SAFE_NSFW_LEVEL: u32 = 1;

/// Client for the Civitai REST API.
#[derive(Debug, Clone)]
pub struct CivitaiClient {
    http: RegistryHttp,
    fetch_previews: bool,
}

impl CivitaiClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        Ok(Self {
            http: RegistryHttp::new(
                Platform::Civitai,
                &config.civitai_base_url,
                config.civitai_token.clone(),
                config,
            )?,
            fetch_previews: config.fetch_previews,
        })
    }

    /// Fetch the model version whose files hash to `sha256`.
    pub async fn model_version_by_hash(&self, sha256: &str) -> Result<CivitaiModelVersion> {
        let path = format!(
            "/api/v1/model-versions/by-hash/{}",
            urlencoding::encode(sha256)
        );
        self.http.get_json(&path).await
    }

    fn canonical_url(&self, version: &CivitaiModelVersion) -> String {
        match version.model_id {
            Some(model_id) => format!(
                "{}/models/{}?modelVersionId={}",
                self.http.base_url(),
                model_id,
                version.id
            ),
            None => format!("{}/model-versions/{}", self.http.base_url(), version.id),
        }
    }
}

#[async_trait]
impl RegistryClient for CivitaiClient {
    fn platform(&self) -> Platform {
        Platform::Civitai
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            fingerprint_lookup: true,
            name_search: false,
        }
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<RegistryMatch> {
        let sha256 = request
            .fingerprint
            .full_sha256()
            .ok_or(ModelprintError::FingerprintUnavailable {
                platform: Platform::Civitai,
            })?;

        let version = self.model_version_by_hash(sha256).await?;
        let canonical_url = self.canonical_url(&version);
        info!("Civitai match for {}: {}", request.file_name, canonical_url);

        let images: Vec<PreviewCandidate> = version.images.iter().map(preview_candidate).collect();
        let preview = resolve_preview(
            &self.http,
            Platform::Civitai,
            &canonical_url,
            &images,
            self.fetch_previews,
        )
        .await?;

        Ok(RegistryMatch {
            platform: Platform::Civitai,
            canonical_url,
            preview,
            fields: normalize(&version),
        })
    }
}

/// Model version as returned by the by-hash endpoint. Only the fields fusion
/// consumes are modelled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivitaiModelVersion {
    pub id: u64,
    #[serde(default)]
    pub model_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub trained_words: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model: Option<CivitaiModelSummary>,
    #[serde(default)]
    pub images: Vec<CivitaiImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CivitaiModelSummary {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
    #[serde(default)]
    pub nsfw: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CivitaiImage {
    pub url: String,
    /// Numeric rating (1 = PG). Newer responses.
    #[serde(default)]
    pub nsfw_level: Option<u32>,
    /// `"None"`, `"Soft"`, `"Mature"`, `"X"` or a boolean, depending on API age.
    #[serde(default)]
    pub nsfw: Option<Value>,
}

impl CivitaiImage {
    fn is_safe(&self) -> bool {
        if let Some(level) = self.nsfw_level {
            return level <= SAFE_NSFW_LEVEL;
        }
        match &self.nsfw {
            Some(Value::Bool(flag)) => !flag,
            Some(Value::String(rating)) => rating.eq_ignore_ascii_case("none"),
            _ => false,
        }
    }
}

fn preview_candidate(image: &CivitaiImage) -> PreviewCandidate {
    PreviewCandidate {
        url: image.url.clone(),
        safe: image.is_safe(),
    }
}

/// Map a model version onto normalized field names.
pub fn normalize(version: &CivitaiModelVersion) -> FieldMap {
    let mut fields = FieldMap::new();
    let mut put = |key: &str, value: Value| {
        fields.insert(key.to_string(), value);
    };

    if let Some(base_model) = &version.base_model {
        put("baseModel", Value::String(base_model.clone()));
    }
    if !version.trained_words.is_empty() {
        put(
            "triggerWords",
            Value::Array(
                version
                    .trained_words
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
    }
    if let Some(model) = &version.model {
        if let Some(name) = &model.name {
            put("modelName", Value::String(name.clone()));
        }
        if let Some(model_type) = &model.model_type {
            put("modelType", Value::String(model_type.clone()));
        }
        if let Some(nsfw) = model.nsfw {
            put("nsfw", Value::Bool(nsfw));
        }
    }
    if let Some(name) = &version.name {
        put("versionName", Value::String(name.clone()));
    }
    if let Some(description) = &version.description {
        put("description", Value::String(description.clone()));
    }
    if let Some(model_id) = version.model_id {
        put("civitaiModelId", Value::from(model_id));
    }
    put("civitaiVersionId", Value::from(version.id));

    fields
}
