//! Safetensors header reader.
//!
//! Layout: `[u64 LE header length N][N bytes UTF-8 JSON][tensor data]`. The JSON
//! object maps tensor names to `{dtype, shape, data_offsets}`; the reserved
//! `__metadata__` key holds string annotations written by training tools.
//!
//! Arbitrary user files go through here, so a bad header is an expected input:
//! [`read_header`] returns `None` and never raises.

use crate::asset::AssetFile;
use crate::config::ContainerLimits;
use crate::error::{ModelprintError, Result};
use crate::FieldMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const FORMAT: &str = "safetensors";
const METADATA_KEY: &str = "__metadata__";

/// Key prefix used by the kohya-ss training scripts.
const TRAINING_PREFIX: &str = "ss_";

/// Identification keys kept regardless of prefix.
const IDENTIFICATION_KEYS: &[&str] = &[
    "modelspec.title",
    "modelspec.architecture",
    "modelspec.author",
    "modelspec.description",
    "modelspec.trigger_phrase",
    "modelspec.hash_sha256",
    "modelspec.implementation",
    "modelspec.resolution",
    "sshs_model_hash",
    "sshs_legacy_hash",
    "format",
];

/// Substrings that mark keys written by model hosting platforms.
const PLATFORM_MARKERS: &[&str] = &["civitai", "huggingface", "tensorart"];

/// Bulky tables that carry no identity information.
const EXCLUDED_KEYS: &[&str] = &[
    "ss_tag_frequency",
    "ss_bucket_info",
    "ss_dataset_dirs",
    "ss_datasets",
];

/// Per-tensor layout entry. Parsed for validation only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub dtype: String,
    pub shape: Vec<u64>,
    pub data_offsets: [u64; 2],
}

/// A parsed safetensors header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerHeader {
    /// Declared JSON length from the 8-byte prefix.
    pub byte_length: u64,
    pub tensors: BTreeMap<String, TensorInfo>,
    pub metadata: BTreeMap<String, String>,
}

impl ContainerHeader {
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Size of the tensor data section implied by the offsets.
    pub fn total_tensor_bytes(&self) -> u64 {
        self.tensors
            .values()
            .map(|t| t.data_offsets[1])
            .max()
            .unwrap_or(0)
    }
}

/// Read and parse the header of `file`, or `None` if it is not a valid container.
pub async fn read_header(file: &dyn AssetFile) -> Option<ContainerHeader> {
    match try_read_header(file).await {
        Ok(header) => Some(header),
        Err(e) => {
            debug!("No safetensors header in {}: {}", file.name(), e);
            None
        }
    }
}

async fn try_read_header(file: &dyn AssetFile) -> Result<ContainerHeader> {
    let prefix_len = ContainerLimits::SAFETENSORS_PREFIX_LEN as u64;
    let size = file.size();
    if size < prefix_len {
        return Err(ModelprintError::malformed(
            FORMAT,
            format!("file is {} bytes, shorter than the length prefix", size),
        ));
    }

    let prefix = file
        .read_range(0, ContainerLimits::SAFETENSORS_PREFIX_LEN)
        .await?;
    let byte_length = decode_length_prefix(&prefix)?;
    check_declared_length(byte_length, size - prefix_len)?;

    let json = file.read_range(prefix_len, byte_length as usize).await?;
    parse_header_json(byte_length, &json)
}

fn decode_length_prefix(prefix: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = prefix
        .get(..8)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| ModelprintError::malformed(FORMAT, "truncated length prefix"))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Bounds check run before the second, length-driven read.
fn check_declared_length(byte_length: u64, remaining: u64) -> Result<()> {
    if byte_length == 0 {
        return Err(ModelprintError::malformed(FORMAT, "declared header length is zero"));
    }
    if byte_length > ContainerLimits::SAFETENSORS_MAX_HEADER {
        return Err(ModelprintError::malformed(
            FORMAT,
            format!("declared header length {} exceeds limit", byte_length),
        ));
    }
    if byte_length > remaining {
        return Err(ModelprintError::malformed(
            FORMAT,
            format!(
                "declared header length {} exceeds the {} bytes after the prefix",
                byte_length, remaining
            ),
        ));
    }
    Ok(())
}

/// Parse a header from a complete in-memory buffer (prefix included).
pub fn parse_header_bytes(buffer: &[u8]) -> Option<ContainerHeader> {
    let prefix_len = ContainerLimits::SAFETENSORS_PREFIX_LEN;
    let parsed = decode_length_prefix(buffer).and_then(|byte_length| {
        check_declared_length(byte_length, (buffer.len() - prefix_len) as u64)?;
        let end = prefix_len + byte_length as usize;
        parse_header_json(byte_length, &buffer[prefix_len..end])
    });
    match parsed {
        Ok(header) => Some(header),
        Err(e) => {
            debug!("Rejected safetensors buffer: {}", e);
            None
        }
    }
}

fn parse_header_json(byte_length: u64, json: &[u8]) -> Result<ContainerHeader> {
    let text = std::str::from_utf8(json)
        .map_err(|e| ModelprintError::malformed(FORMAT, format!("header is not UTF-8: {}", e)))?;

    let root: serde_json::Map<String, Value> = serde_json::from_str(text)
        .map_err(|e| ModelprintError::malformed(FORMAT, format!("header is not a JSON object: {}", e)))?;

    let mut tensors = BTreeMap::new();
    let mut metadata = BTreeMap::new();

    for (key, value) in root {
        if key == METADATA_KEY {
            let Value::Object(entries) = value else {
                return Err(ModelprintError::malformed(FORMAT, "__metadata__ is not an object"));
            };
            for (k, v) in entries {
                // Annotations should be strings; anything else is kept as compact JSON.
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                metadata.insert(k, v);
            }
        } else {
            let info: TensorInfo = serde_json::from_value(value).map_err(|e| {
                ModelprintError::malformed(FORMAT, format!("tensor {}: {}", key, e))
            })?;
            tensors.insert(key, info);
        }
    }

    Ok(ContainerHeader {
        byte_length,
        tensors,
        metadata,
    })
}

/// Select the metadata keys useful for cross-platform identification.
pub fn extract_relevant_fields(header: &ContainerHeader) -> FieldMap {
    let mut fields = FieldMap::new();

    for (key, value) in &header.metadata {
        if !is_relevant_key(key) {
            continue;
        }
        fields.insert(key.clone(), Value::String(truncate_value(value)));
    }

    fields
}

fn is_relevant_key(key: &str) -> bool {
    if EXCLUDED_KEYS.contains(&key) {
        return false;
    }
    if key.starts_with(TRAINING_PREFIX) || IDENTIFICATION_KEYS.contains(&key) {
        return true;
    }
    let lower = key.to_lowercase();
    PLATFORM_MARKERS.iter().any(|m| lower.contains(m))
}

/// Cap a value at `MAX_FIELD_CHARS` characters, marking the cut.
pub(crate) fn truncate_value(value: &str) -> String {
    let limit = ContainerLimits::MAX_FIELD_CHARS;
    match value.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &value[..cut], ContainerLimits::TRUNCATION_MARKER),
        None => value.to_string(),
    }
}
