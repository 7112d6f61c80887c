//! Modelprint Core - identification and metadata fusion for AI model assets.
//!
//! Given a model file (LoRA weights, a checkpoint) or a generated image, this
//! crate:
//!
//! - computes a content fingerprint under a bounded memory budget
//! - recovers embedded metadata from safetensors headers and PNG text chunks
//! - queries remote registries by fingerprint or by name
//! - fuses the partial records into one record per asset
//!
//! # Example
//!
//! ```rust,ignore
//! use modelprint_core::{AssetPipeline, CancellationToken, PipelineConfig, ResolveMode};
//!
//! #[tokio::main]
//! async fn main() -> modelprint_core::Result<()> {
//!     let pipeline = AssetPipeline::new(&PipelineConfig::default())?;
//!     let report = pipeline
//!         .process_path("lora.safetensors", ResolveMode::All, &CancellationToken::new())
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&report.fused)?);
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod cancel;
pub mod config;
pub mod container;
pub mod error;
pub mod fingerprint;
pub mod fusion;
pub mod image_meta;
pub mod network;
pub mod pipeline;
pub mod registry;

/// Insertion-ordered field mapping used for all normalized metadata.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

// Re-export commonly used types
pub use asset::{AssetFile, LocalFile, MemoryFile};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{FingerprintConfig, PipelineConfig, RegistryConfig};
pub use container::{extract_relevant_fields, read_header, ContainerHeader};
pub use error::{ModelprintError, Result};
pub use fingerprint::{FileFingerprint, Fingerprint, FingerprintAlgorithm, FingerprintEngine};
pub use fusion::{fuse, FusedMetadataRecord, LocalMetadata, MetadataFusion};
pub use image_meta::{extract_image_metadata, parse_png_metadata, ImageMetadataRecord, ImageMetadataSource};
pub use pipeline::{AssetPipeline, AssetReport, RegistryOutcome, ResolutionStatus, ResolveMode};
pub use registry::{Platform, RegistryClient, RegistryMatch, ResolveRequest};
