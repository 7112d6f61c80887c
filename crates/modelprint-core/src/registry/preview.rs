//! Preview image selection, shared by all providers.
//!
//! Selection prefers an image the provider marks safe for general audiences,
//! otherwise the first image. A match with no images at all is an error.
//! After selection exactly one fetch of the image bytes is made; a failing
//! fetch is recorded on the match and never invalidates it.

use super::http::RegistryHttp;
use super::Platform;
use crate::error::{ModelprintError, Result};
use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

/// An image offered by a provider for a matched asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewCandidate {
    pub url: String,
    /// Provider marks this image as safe for general audiences.
    pub safe: bool,
}

/// Result of the single preview fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PreviewFetch {
    Fetched {
        content_type: Option<String>,
        byte_length: usize,
        #[serde(skip)]
        data: Bytes,
    },
    /// The match stands; only the image could not be retrieved.
    Failed { message: String },
    /// Fetching was disabled by configuration.
    Skipped,
}

impl PreviewFetch {
    pub fn is_fetched(&self) -> bool {
        matches!(self, PreviewFetch::Fetched { .. })
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            PreviewFetch::Fetched { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// The preview attached to a match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewAsset {
    pub url: String,
    pub safe: bool,
    pub fetch: PreviewFetch,
}

/// Pick the preview image for a match.
pub fn select_preview(
    platform: Platform,
    canonical_url: &str,
    images: &[PreviewCandidate],
) -> Result<PreviewCandidate> {
    images
        .iter()
        .find(|img| img.safe)
        .or_else(|| images.first())
        .cloned()
        .ok_or_else(|| ModelprintError::NoPreviewAvailable {
            platform,
            canonical_url: canonical_url.to_string(),
        })
}

/// Select a preview and, if enabled, fetch it once.
pub(crate) async fn resolve_preview(
    http: &RegistryHttp,
    platform: Platform,
    canonical_url: &str,
    images: &[PreviewCandidate],
    fetch: bool,
) -> Result<PreviewAsset> {
    let selected = select_preview(platform, canonical_url, images)?;

    let fetch = if fetch {
        match http.get_bytes(&selected.url).await {
            Ok(fetched) => PreviewFetch::Fetched {
                content_type: fetched.content_type,
                byte_length: fetched.data.len(),
                data: fetched.data,
            },
            Err(e) => {
                warn!("Preview fetch for {} failed: {}", canonical_url, e);
                PreviewFetch::Failed {
                    message: e.to_string(),
                }
            }
        }
    } else {
        PreviewFetch::Skipped
    };

    Ok(PreviewAsset {
        url: selected.url,
        safe: selected.safe,
        fetch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str, safe: bool) -> PreviewCandidate {
        PreviewCandidate {
            url: url.to_string(),
            safe,
        }
    }

    #[test]
    fn test_prefers_safe_image() {
        let images = [image("a", false), image("b", true), image("c", true)];
        let picked = select_preview(Platform::Civitai, "u", &images).unwrap();
        assert_eq!(picked.url, "b");
    }

    #[test]
    fn test_falls_back_to_first_image() {
        let images = [image("a", false), image("b", false)];
        let picked = select_preview(Platform::Civitai, "u", &images).unwrap();
        assert_eq!(picked.url, "a");
        assert!(!picked.safe);
    }

    #[test]
    fn test_no_images_is_no_preview_available() {
        let err = select_preview(Platform::HuggingFace, "https://hf.co/x", &[]).unwrap_err();
        assert_eq!(err.kind(), "no_preview_available");
        assert!(err.to_string().contains("https://hf.co/x"));
    }

    #[test]
    fn test_fetch_state_serialization_omits_bytes() {
        let fetch = PreviewFetch::Fetched {
            content_type: Some("image/png".into()),
            byte_length: 3,
            data: Bytes::from_static(b"abc"),
        };
        let json = serde_json::to_value(&fetch).unwrap();
        assert_eq!(json["status"], "fetched");
        assert_eq!(json["byte_length"], 3);
        assert!(json.get("data").is_none());
        assert_eq!(fetch.data().map(|d| d.len()), Some(3));
    }
}
