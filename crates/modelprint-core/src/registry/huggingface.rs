//! HuggingFace Hub client: name search confirmed against repository files.
//!
//! Lookup flow:
//! 1. Search `GET /api/models?search=..&limit=..` for each ranked candidate query
//! 2. Fetch each hit's detail with `GET /api/models/{repo_id}?blobs=true`
//! 3. Confirm by LFS SHA-256 equal to the local full fingerprint, or failing
//!    that by a sibling whose path ends with the local file name
//!
//! The first confirmed repository wins.

use super::candidates::candidate_queries;
use super::http::RegistryHttp;
use super::preview::{resolve_preview, PreviewCandidate};
use super::{Capabilities, Platform, RegistryClient, RegistryMatch, ResolveRequest};
use crate::config::RegistryConfig;
use crate::error::{ModelprintError, Result};
use crate::FieldMap;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// Hub tag for repositories gated as adult content.
const NOT_FOR_ALL_AUDIENCES: &str = "not-for-all-audiences";

/// Client for the HuggingFace Hub API.
#[derive(Debug, Clone)]
pub struct HuggingFaceClient {
    http: RegistryHttp,
    search_limit: u32,
    max_candidate_queries: usize,
    fetch_previews: bool,
}

/// How a repository was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    LfsSha256,
    FileName,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::LfsSha256 => "lfs_sha256",
            MatchMethod::FileName => "filename",
        }
    }
}

/// A confirmed sibling within a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub file: String,
    pub method: MatchMethod,
}

impl HuggingFaceClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        Ok(Self {
            http: RegistryHttp::new(
                Platform::HuggingFace,
                &config.huggingface_base_url,
                config.huggingface_token.clone(),
                config,
            )?,
            search_limit: config.search_limit.max(1),
            max_candidate_queries: config.max_candidate_queries.max(1),
            fetch_previews: config.fetch_previews,
        })
    }

    /// Search models by free text.
    pub async fn search(&self, query: &str) -> Result<Vec<HfSearchHit>> {
        let path = format!(
            "/api/models?search={}&limit={}",
            urlencoding::encode(query),
            self.search_limit
        );
        self.http.get_json(&path).await
    }

    /// Fetch a repository's detail, including LFS hashes of its files.
    pub async fn model_detail(&self, repo_id: &str) -> Result<HfModelDetail> {
        // Encode each path segment; the slash between owner and name must stay.
        let encoded: Vec<String> = repo_id
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let path = format!("/api/models/{}?blobs=true", encoded.join("/"));
        self.http.get_json(&path).await
    }

    fn canonical_url(&self, repo_id: &str) -> String {
        format!("{}/{}", self.http.base_url(), repo_id)
    }

    fn file_url(&self, repo_id: &str, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.http.base_url(), repo_id, file)
    }

    async fn build_match(
        &self,
        detail: &HfModelDetail,
        confirmation: &Confirmation,
    ) -> Result<RegistryMatch> {
        let canonical_url = self.canonical_url(&detail.id);
        info!(
            "HuggingFace match {} via {} ({})",
            detail.id,
            confirmation.method.as_str(),
            confirmation.file
        );

        let safe = !detail.tags.iter().any(|t| t == NOT_FOR_ALL_AUDIENCES);
        let images: Vec<PreviewCandidate> = detail
            .image_files()
            .map(|file| PreviewCandidate {
                url: self.file_url(&detail.id, file),
                safe,
            })
            .collect();

        let preview = resolve_preview(
            &self.http,
            Platform::HuggingFace,
            &canonical_url,
            &images,
            self.fetch_previews,
        )
        .await?;

        Ok(RegistryMatch {
            platform: Platform::HuggingFace,
            canonical_url,
            preview,
            fields: normalize(detail, confirmation),
        })
    }
}

#[async_trait]
impl RegistryClient for HuggingFaceClient {
    fn platform(&self) -> Platform {
        Platform::HuggingFace
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            fingerprint_lookup: false,
            name_search: true,
        }
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<RegistryMatch> {
        let queries = candidate_queries(
            &request.file_name,
            &request.local_fields,
            self.max_candidate_queries,
        );
        let sha256 = request.fingerprint.full_sha256();
        let mut checked = HashSet::new();

        for query in &queries {
            debug!("HuggingFace candidate query '{}'", query);
            let hits = match self.search(query).await {
                Ok(hits) => hits,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            for hit in hits {
                if !checked.insert(hit.id.clone()) {
                    continue;
                }
                let detail = match self.model_detail(&hit.id).await {
                    Ok(detail) => detail,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                };
                if let Some(confirmation) = confirm(&detail, &request.file_name, sha256) {
                    return self.build_match(&detail, &confirmation).await;
                }
            }
        }

        debug!(
            "No HuggingFace repository confirmed for {} after {} queries",
            request.file_name,
            queries.len()
        );
        Err(ModelprintError::NotFound {
            platform: Platform::HuggingFace,
        })
    }
}

/// Decide whether `detail` contains the local file.
///
/// An LFS hash equal to the full fingerprint confirms regardless of path. A
/// path match only confirms when no hash contradicts it.
pub fn confirm(
    detail: &HfModelDetail,
    file_name: &str,
    sha256: Option<&str>,
) -> Option<Confirmation> {
    if let Some(sha256) = sha256 {
        if let Some(sibling) = detail
            .siblings
            .iter()
            .find(|s| s.lfs_sha256().is_some_and(|h| h.eq_ignore_ascii_case(sha256)))
        {
            return Some(Confirmation {
                file: sibling.rfilename.clone(),
                method: MatchMethod::LfsSha256,
            });
        }
    }

    let sibling = detail
        .siblings
        .iter()
        .find(|s| path_ends_with_file(&s.rfilename, file_name))?;

    match (sha256, sibling.lfs_sha256()) {
        (Some(local), Some(remote)) if !remote.eq_ignore_ascii_case(local) => {
            debug!(
                "{}:{} has a different LFS hash, rejecting filename match",
                detail.id, sibling.rfilename
            );
            None
        }
        _ => Some(Confirmation {
            file: sibling.rfilename.clone(),
            method: MatchMethod::FileName,
        }),
    }
}

fn path_ends_with_file(path: &str, file_name: &str) -> bool {
    !file_name.is_empty()
        && (path == file_name
            || path
                .strip_suffix(file_name)
                .is_some_and(|prefix| prefix.ends_with('/')))
}

/// Search result entry. The API repeats `id` as `modelId`; only `id` is read.
#[derive(Debug, Clone, Deserialize)]
pub struct HfSearchHit {
    pub id: String,
}

/// Repository detail from `/api/models/{repo_id}?blobs=true`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HfModelDetail {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// The API returns this one in snake_case.
    #[serde(default, rename = "pipeline_tag")]
    pub pipeline_tag: Option<String>,
    #[serde(default)]
    pub downloads: Option<u64>,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub card_data: Option<Value>,
    #[serde(default)]
    pub siblings: Vec<HfSibling>,
}

impl HfModelDetail {
    fn image_files(&self) -> impl Iterator<Item = &str> {
        self.siblings
            .iter()
            .map(|s| s.rfilename.as_str())
            .filter(|name| {
                name.rsplit_once('.').is_some_and(|(_, ext)| {
                    IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
                })
            })
    }

    fn card_field(&self, key: &str) -> Option<&Value> {
        self.card_data.as_ref()?.get(key).filter(|v| !v.is_null())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HfSibling {
    pub rfilename: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub lfs: Option<HfLfsInfo>,
}

impl HfSibling {
    fn lfs_sha256(&self) -> Option<&str> {
        self.lfs.as_ref().map(|l| l.sha256.as_str())
    }
}

/// LFS pointer information. The tree API calls the hash `oid`.
#[derive(Debug, Clone, Deserialize)]
pub struct HfLfsInfo {
    #[serde(alias = "oid")]
    pub sha256: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Map a confirmed repository onto normalized field names.
pub fn normalize(detail: &HfModelDetail, confirmation: &Confirmation) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("huggingfaceRepoId".into(), Value::String(detail.id.clone()));

    if let Some(base_model) = detail.card_field("base_model") {
        fields.insert("baseModel".into(), base_model.clone());
    }
    if let Some(author) = &detail.author {
        fields.insert("author".into(), Value::String(author.clone()));
    }
    if let Some(pipeline_tag) = &detail.pipeline_tag {
        fields.insert("pipelineTag".into(), Value::String(pipeline_tag.clone()));
    }
    if let Some(license) = detail.card_field("license") {
        fields.insert("license".into(), license.clone());
    }
    if let Some(instance_prompt) = detail.card_field("instance_prompt") {
        fields.insert("triggerWords".into(), instance_prompt.clone());
    }
    if !detail.tags.is_empty() {
        fields.insert(
            "tags".into(),
            Value::Array(detail.tags.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(downloads) = detail.downloads {
        fields.insert("downloads".into(), Value::from(downloads));
    }
    if let Some(likes) = detail.likes {
        fields.insert("likes".into(), Value::from(likes));
    }
    fields.insert(
        "matchedFile".into(),
        Value::String(confirmation.file.clone()),
    );
    fields.insert(
        "matchMethod".into(),
        Value::String(confirmation.method.as_str().to_string()),
    );

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHA: &str = "aa11bb22cc33dd44ee55ff6600112233445566778899aabbccddeeff00112233";

    fn detail() -> HfModelDetail {
        serde_json::from_value(json!({
            "id": "acme/portrait-lora",
            "author": "acme",
            "tags": ["lora", "text-to-image"],
            "pipeline_tag": "text-to-image",
            "downloads": 120,
            "cardData": {"base_model": "stabilityai/stable-diffusion-xl-base-1.0", "license": "mit", "instance_prompt": null},
            "siblings": [
                {"rfilename": "README.md"},
                {"rfilename": "images/sample.PNG"},
                {"rfilename": "weights/portrait.safetensors", "lfs": {"sha256": SHA, "size": 10}},
                {"rfilename": "other.safetensors", "lfs": {"oid": "ffff", "size": 10}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_confirm_by_lfs_hash_ignores_name() {
        let conf = confirm(&detail(), "renamed.safetensors", Some(&SHA.to_uppercase())).unwrap();
        assert_eq!(conf.method, MatchMethod::LfsSha256);
        assert_eq!(conf.file, "weights/portrait.safetensors");
    }

    #[test]
    fn test_confirm_by_filename_suffix() {
        let conf = confirm(&detail(), "portrait.safetensors", None).unwrap();
        assert_eq!(conf.method, MatchMethod::FileName);

        // Only a whole path component matches.
        assert!(confirm(&detail(), "trait.safetensors", None).is_none());
    }

    #[test]
    fn test_filename_match_rejected_by_different_hash() {
        assert!(confirm(&detail(), "other.safetensors", Some("1234abcd")).is_none());
        assert!(confirm(&detail(), "other.safetensors", None).is_some());
    }

    #[test]
    fn test_search_hit_tolerates_repeated_model_id() {
        let hits: Vec<HfSearchHit> = serde_json::from_value(json!([
            {"_id": "65f0", "id": "acme/a", "modelId": "acme/a", "likes": 3},
            {"id": "acme/b"}
        ]))
        .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["acme/a", "acme/b"]);
    }

    #[test]
    fn test_normalize_and_images() {
        let detail = detail();
        let conf = Confirmation {
            file: "weights/portrait.safetensors".into(),
            method: MatchMethod::LfsSha256,
        };
        let fields = normalize(&detail, &conf);
        assert_eq!(fields["huggingfaceRepoId"], json!("acme/portrait-lora"));
        assert_eq!(
            fields["baseModel"],
            json!("stabilityai/stable-diffusion-xl-base-1.0")
        );
        assert_eq!(fields["license"], json!("mit"));
        assert!(!fields.contains_key("triggerWords"));
        assert_eq!(fields["matchMethod"], json!("lfs_sha256"));

        let images: Vec<&str> = detail.image_files().collect();
        assert_eq!(images, vec!["images/sample.PNG"]);
    }
}
