//! Per-asset orchestration.
//!
//! For one file: fingerprint and local extraction run concurrently, then the
//! requested registries are queried concurrently, then everything is fused.
//! Registry outcomes are kept in request order regardless of which response
//! arrives first. Cancellation only affects the registry stage; a cancelled
//! resolution contributes no match and is reported as not checked.

use crate::asset::{AssetFile, LocalFile};
use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::container::read_header;
use crate::error::{ModelprintError, Result};
use crate::fingerprint::{Fingerprint, FingerprintEngine};
use crate::fusion::{fuse, FusedMetadataRecord, LocalMetadata};
use crate::image_meta::extract_image_metadata;
use crate::registry::{
    build_clients, Platform, RegistryClient, RegistryMatch, ResolveRequest,
};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which registries to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Local analysis only.
    Skip,
    Single(Platform),
    /// Every configured registry.
    #[default]
    All,
}

/// Per-registry state for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Not requested, or cancelled before an answer arrived.
    NotChecked,
    /// Checked; the registry has no match.
    NoMatch,
    Matched { canonical_url: String },
    /// Could not be checked.
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryOutcome {
    pub platform: Platform,
    #[serde(flatten)]
    pub status: ResolutionStatus,
}

/// Everything learned about one asset.
#[derive(Debug, Clone, Serialize)]
pub struct AssetReport {
    pub file_name: String,
    pub size: u64,
    pub fingerprint: Fingerprint,
    pub local: LocalMetadata,
    /// One entry per configured registry, in configuration order.
    pub registries: Vec<RegistryOutcome>,
    pub matches: Vec<RegistryMatch>,
    pub fused: FusedMetadataRecord,
}

impl AssetReport {
    pub fn outcome(&self, platform: Platform) -> Option<&ResolutionStatus> {
        self.registries
            .iter()
            .find(|o| o.platform == platform)
            .map(|o| &o.status)
    }
}

/// Runs the full identification pipeline.
pub struct AssetPipeline {
    engine: FingerprintEngine,
    clients: Vec<Arc<dyn RegistryClient>>,
}

impl std::fmt::Debug for AssetPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let platforms: Vec<Platform> = self.clients.iter().map(|c| c.platform()).collect();
        f.debug_struct("AssetPipeline")
            .field("engine", &self.engine)
            .field("platforms", &platforms)
            .finish()
    }
}

impl AssetPipeline {
    /// Build a pipeline with one client per supported registry.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: FingerprintEngine::new(config.fingerprint.clone()),
            clients: build_clients(&config.registry)?,
        })
    }

    /// Build a pipeline over explicit clients. Their order is the request order.
    pub fn with_clients(engine: FingerprintEngine, clients: Vec<Arc<dyn RegistryClient>>) -> Self {
        Self { engine, clients }
    }

    pub fn engine(&self) -> &FingerprintEngine {
        &self.engine
    }

    fn selected(&self, mode: ResolveMode, platform: Platform) -> bool {
        match mode {
            ResolveMode::Skip => false,
            ResolveMode::Single(wanted) => wanted == platform,
            ResolveMode::All => true,
        }
    }

    /// Open `path` and process it.
    pub async fn process_path(
        &self,
        path: impl AsRef<Path>,
        mode: ResolveMode,
        cancel: &CancellationToken,
    ) -> Result<AssetReport> {
        let file = LocalFile::open(path).await?;
        Ok(self.process(&file, mode, cancel).await)
    }

    /// Process one asset. Never fails: every failure is recorded in the report.
    pub async fn process(
        &self,
        file: &dyn AssetFile,
        mode: ResolveMode,
        cancel: &CancellationToken,
    ) -> AssetReport {
        debug!("Processing {} ({} bytes)", file.name(), file.size());

        let (fingerprint, local) = tokio::join!(self.engine.fingerprint(file), extract_local(file));

        let request = ResolveRequest::new(file.name(), fingerprint.clone())
            .with_local_fields(local.fields());

        let resolutions = self.clients.iter().map(|client| {
            let request = &request;
            let platform = client.platform();
            let wanted = self.selected(mode, platform);
            async move {
                if !wanted {
                    return (platform, None);
                }
                if cancel.is_cancelled() {
                    return (platform, Some(Err(ModelprintError::Cancelled)));
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ModelprintError::Cancelled),
                    result = client.resolve(request) => result,
                };
                (platform, Some(result))
            }
        });

        let mut registries = Vec::with_capacity(self.clients.len());
        let mut matches = Vec::new();
        for (platform, result) in join_all(resolutions).await {
            let status = match result {
                None => ResolutionStatus::NotChecked,
                Some(Ok(found)) => {
                    let status = ResolutionStatus::Matched {
                        canonical_url: found.canonical_url.clone(),
                    };
                    matches.push(found);
                    status
                }
                Some(Err(ModelprintError::Cancelled)) => {
                    debug!("{} resolution of {} cancelled", platform, file.name());
                    ResolutionStatus::NotChecked
                }
                Some(Err(e)) if e.is_not_found() => {
                    debug!("{} has no match for {}", platform, file.name());
                    ResolutionStatus::NoMatch
                }
                Some(Err(e)) => {
                    warn!("{} lookup for {} failed: {}", platform, file.name(), e);
                    ResolutionStatus::Failed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    }
                }
            };
            registries.push(RegistryOutcome { platform, status });
        }

        let fused = fuse(Some(&local), &matches);
        info!(
            "{}: {} merged fields from {} source(s)",
            file.name(),
            fused.merged.len(),
            fused.sources.len()
        );

        AssetReport {
            file_name: file.name().to_string(),
            size: file.size(),
            fingerprint,
            local,
            registries,
            matches,
            fused,
        }
    }

    /// Process independent assets concurrently. Reports are returned in
    /// completion order.
    pub async fn process_batch(
        &self,
        files: Vec<Arc<dyn AssetFile>>,
        mode: ResolveMode,
        cancel: &CancellationToken,
        concurrency: usize,
    ) -> Vec<AssetReport> {
        stream::iter(files)
            .map(|file| async move { self.process(file.as_ref(), mode, cancel).await })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}

/// Local metadata chosen by file extension. Never fails.
pub async fn extract_local(file: &dyn AssetFile) -> LocalMetadata {
    match file.extension().as_deref() {
        Some("safetensors") => match read_header(file).await {
            Some(header) => LocalMetadata::Container(header),
            None => LocalMetadata::None,
        },
        Some("png") => LocalMetadata::Image(extract_image_metadata(file).await),
        _ => LocalMetadata::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MemoryFile;
    use crate::config::FingerprintConfig;
    use crate::fingerprint::FingerprintAlgorithm;
    use crate::registry::{Capabilities, PreviewAsset, PreviewFetch};
    use crate::FieldMap;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    enum Behavior {
        Match(serde_json::Value),
        NotFound,
        Provider(u16),
        Hang,
        /// Answer after a delay, to invert completion order.
        Slow(Duration, serde_json::Value),
    }

    struct FakeClient {
        platform: Platform,
        behavior: Behavior,
    }

    fn found(platform: Platform, value: &serde_json::Value) -> RegistryMatch {
        let fields: FieldMap = value.as_object().cloned().unwrap_or_default();
        RegistryMatch {
            platform,
            canonical_url: format!("https://{}/model", platform),
            preview: PreviewAsset {
                url: format!("https://{}/preview.png", platform),
                safe: true,
                fetch: PreviewFetch::Skipped,
            },
            fields,
        }
    }

    #[async_trait]
    impl RegistryClient for FakeClient {
        fn platform(&self) -> Platform {
            self.platform
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                fingerprint_lookup: true,
                name_search: false,
            }
        }

        async fn resolve(&self, _request: &ResolveRequest) -> Result<RegistryMatch> {
            match &self.behavior {
                Behavior::Match(value) => Ok(found(self.platform, value)),
                Behavior::NotFound => Err(ModelprintError::NotFound {
                    platform: self.platform,
                }),
                Behavior::Provider(status) => Err(ModelprintError::Provider {
                    platform: self.platform,
                    status: *status,
                    message: "boom".into(),
                }),
                Behavior::Hang => std::future::pending().await,
                Behavior::Slow(delay, value) => {
                    tokio::time::sleep(*delay).await;
                    Ok(found(self.platform, value))
                }
            }
        }
    }

    fn pipeline(civitai: Behavior, huggingface: Behavior) -> AssetPipeline {
        AssetPipeline::with_clients(
            FingerprintEngine::new(FingerprintConfig::default()),
            vec![
                Arc::new(FakeClient {
                    platform: Platform::Civitai,
                    behavior: civitai,
                }),
                Arc::new(FakeClient {
                    platform: Platform::HuggingFace,
                    behavior: huggingface,
                }),
            ],
        )
    }

    fn lora() -> MemoryFile {
        let json = r#"{"__metadata__":{"ss_base_model":"SD1.5"}}"#;
        let mut data = (json.len() as u64).to_le_bytes().to_vec();
        data.extend_from_slice(json.as_bytes());
        data.extend_from_slice(&[0u8; 64]);
        MemoryFile::new("style.safetensors", data)
    }

    #[tokio::test]
    async fn test_three_way_registry_states() {
        let pipeline = pipeline(Behavior::NotFound, Behavior::Provider(503));
        let report = pipeline
            .process(&lora(), ResolveMode::All, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome(Platform::Civitai), Some(&ResolutionStatus::NoMatch));
        match report.outcome(Platform::HuggingFace) {
            Some(ResolutionStatus::Failed { kind, .. }) => assert_eq!(kind, "provider_error"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(report.matches.is_empty());
        assert_eq!(report.fused.merged["ss_base_model"], json!("SD1.5"));
    }

    #[tokio::test]
    async fn test_single_mode_leaves_others_unchecked() {
        let pipeline = pipeline(
            Behavior::Match(json!({"baseModel": "SD 1.5"})),
            Behavior::Match(json!({"baseModel": "SDXL"})),
        );
        let report = pipeline
            .process(
                &lora(),
                ResolveMode::Single(Platform::Civitai),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            report.outcome(Platform::Civitai),
            Some(ResolutionStatus::Matched { .. })
        ));
        assert_eq!(
            report.outcome(Platform::HuggingFace),
            Some(&ResolutionStatus::NotChecked)
        );
        assert_eq!(report.fused.merged["baseModel"], json!("SD 1.5"));
        assert_eq!(report.fingerprint.computed().unwrap().algorithm, FingerprintAlgorithm::FullSha256);
    }

    #[tokio::test]
    async fn test_merge_follows_request_order_not_arrival() {
        let pipeline = pipeline(
            Behavior::Slow(Duration::from_millis(50), json!({"baseModel": "first"})),
            Behavior::Match(json!({"baseModel": "second"})),
        );
        let report = pipeline
            .process(&lora(), ResolveMode::All, &CancellationToken::new())
            .await;

        assert_eq!(report.fused.merged["baseModel"], json!("first | second"));
        assert_eq!(
            report.fused.sources,
            vec!["safetensors", "civitai", "huggingface"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_contributes_no_match() {
        let pipeline = pipeline(Behavior::Hang, Behavior::Match(json!({"baseModel": "SDXL"})));
        let cancel = CancellationToken::new();
        let file = lora();

        let (report, _) = tokio::join!(
            pipeline.process(&file, ResolveMode::All, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        );

        assert_eq!(report.outcome(Platform::Civitai), Some(&ResolutionStatus::NotChecked));
        assert!(matches!(
            report.outcome(Platform::HuggingFace),
            Some(ResolutionStatus::Matched { .. })
        ));
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.fused.merged["baseModel"], json!("SDXL"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pipeline = pipeline(Behavior::Match(json!({"a": 1})), Behavior::NotFound);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline.process(&lora(), ResolveMode::All, &cancel).await;
        assert!(report
            .registries
            .iter()
            .all(|o| o.status == ResolutionStatus::NotChecked));
        // Local work still completes.
        assert!(report.fingerprint.is_available());
        assert!(matches!(report.local, LocalMetadata::Container(_)));
    }

    #[tokio::test]
    async fn test_unknown_extension_has_no_local_metadata() {
        let pipeline = pipeline(Behavior::NotFound, Behavior::NotFound);
        let file = MemoryFile::new("notes.txt", b"hello".to_vec());
        let report = pipeline.process(&file, ResolveMode::Skip, &CancellationToken::new()).await;

        assert!(report.local.is_none());
        assert!(report.fused.merged.is_empty());
        assert!(report
            .registries
            .iter()
            .all(|o| o.status == ResolutionStatus::NotChecked));
    }

    #[tokio::test]
    async fn test_process_batch_returns_every_report() {
        let pipeline = pipeline(Behavior::NotFound, Behavior::NotFound);
        let files: Vec<Arc<dyn AssetFile>> = (0..5)
            .map(|i| {
                Arc::new(MemoryFile::new(format!("f{}.bin", i), vec![i as u8; 10]))
                    as Arc<dyn AssetFile>
            })
            .collect();

        let reports = pipeline
            .process_batch(files, ResolveMode::Skip, &CancellationToken::new(), 2)
            .await;

        let mut names: Vec<String> = reports.into_iter().map(|r| r.file_name).collect();
        names.sort();
        assert_eq!(names, vec!["f0.bin", "f1.bin", "f2.bin", "f3.bin", "f4.bin"]);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RegistryOutcome {
            platform: Platform::Civitai,
            status: ResolutionStatus::Failed {
                kind: "transport_error".into(),
                message: "dns".into(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            json!({"platform": "civitai", "status": "failed", "kind": "transport_error", "message": "dns"})
        );
    }
}
