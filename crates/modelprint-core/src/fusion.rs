//! Deterministic merge of local and registry metadata into one record.
//!
//! Local fields seed the record. Registry matches are absorbed in the order
//! the requests were issued. For a key already present:
//!
//! - `null` incoming adds nothing; an existing `null` is replaced
//! - two objects merge shallowly, incoming keys winning inside that merge
//!   (a string holding a JSON object counts as an object)
//! - two arrays merge by appending elements not already present
//! - unequal scalars are joined with [`SEPARATOR`]; a value whose segments are
//!   all already present is not appended again
//!
//! Nothing is ever silently overwritten at the top level. Fusion performs no
//! I/O and cannot fail.

use crate::container::{extract_relevant_fields, ContainerHeader};
use crate::image_meta::ImageMetadataRecord;
use crate::registry::{Platform, RegistryMatch};
use crate::FieldMap;
use serde::Serialize;
use serde_json::Value;

/// Joins conflicting scalar values.
pub const SEPARATOR: &str = " | ";

/// Metadata recovered from the file itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LocalMetadata {
    Container(ContainerHeader),
    Image(ImageMetadataRecord),
    /// Unsupported extension or nothing recoverable.
    None,
}

impl LocalMetadata {
    /// The normalized fields fusion is seeded with.
    pub fn fields(&self) -> FieldMap {
        match self {
            LocalMetadata::Container(header) => extract_relevant_fields(header),
            LocalMetadata::Image(record) => record.fields(),
            LocalMetadata::None => FieldMap::new(),
        }
    }

    /// Provenance label, `None` when the local source contributes no fields.
    pub fn source_label(&self) -> Option<&'static str> {
        match self {
            LocalMetadata::Container(_) => Some("safetensors"),
            LocalMetadata::Image(record) if record.structured.is_some() => Some("png"),
            LocalMetadata::Image(_) => None,
            LocalMetadata::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, LocalMetadata::None)
    }
}

/// Where a registry match lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryLink {
    pub platform: Platform,
    pub canonical_url: String,
    pub preview_url: String,
}

/// The fused per-asset record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusedMetadataRecord {
    /// Insertion ordered.
    pub merged: FieldMap,
    /// Provenance labels in merge order.
    pub sources: Vec<String>,
    pub links: Vec<RegistryLink>,
}

/// Incremental fusion.
///
/// ```
/// use modelprint_core::fusion::MetadataFusion;
/// use modelprint_core::FieldMap;
/// use serde_json::json;
///
/// let mut local = FieldMap::new();
/// local.insert("ss_base_model".into(), json!("SD1.5"));
/// let mut remote = FieldMap::new();
/// remote.insert("ss_base_model".into(), json!("SDXL"));
///
/// let record = MetadataFusion::new()
///     .seed("safetensors", local)
///     .absorb_fields("civitai", remote)
///     .finish();
/// assert_eq!(record.merged["ss_base_model"], json!("SD1.5 | SDXL"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetadataFusion {
    record: FusedMetadataRecord,
}

impl MetadataFusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with local fields.
    pub fn seed(self, label: &str, fields: FieldMap) -> Self {
        self.absorb_fields(label, fields)
    }

    /// Absorb a registry match and record its link.
    pub fn absorb(mut self, registry_match: &RegistryMatch) -> Self {
        self.record.links.push(RegistryLink {
            platform: registry_match.platform,
            canonical_url: registry_match.canonical_url.clone(),
            preview_url: registry_match.preview.url.clone(),
        });
        self.absorb_fields(registry_match.platform.as_str(), registry_match.fields.clone())
    }

    /// Absorb a labelled field map.
    pub fn absorb_fields(mut self, label: &str, fields: FieldMap) -> Self {
        for (key, incoming) in fields {
            match self.record.merged.get_mut(&key) {
                Some(existing) => merge_value(existing, incoming),
                None if incoming.is_null() => {}
                None => {
                    self.record.merged.insert(key, incoming);
                }
            }
        }
        self.record.sources.push(label.to_string());
        self
    }

    pub fn finish(self) -> FusedMetadataRecord {
        self.record
    }
}

/// Fuse local metadata and registry matches, matches in the given order.
pub fn fuse(local: Option<&LocalMetadata>, matches: &[RegistryMatch]) -> FusedMetadataRecord {
    let mut fusion = MetadataFusion::new();
    if let Some(local) = local {
        if let Some(label) = local.source_label() {
            fusion = fusion.seed(label, local.fields());
        }
    }
    matches
        .iter()
        .fold(fusion, |fusion, m| fusion.absorb(m))
        .finish()
}

fn merge_value(existing: &mut Value, incoming: Value) {
    if incoming.is_null() {
        return;
    }
    if existing.is_null() {
        *existing = incoming;
        return;
    }

    if let (Some(mut base), Some(overlay)) = (as_object(existing), as_object(&incoming)) {
        for (key, value) in overlay {
            base.insert(key, value);
        }
        *existing = Value::Object(base);
        return;
    }

    match (existing, incoming) {
        (Value::Array(items), Value::Array(more)) => {
            for item in more {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        (Value::Array(items), scalar) => {
            if !items.contains(&scalar) {
                items.push(scalar);
            }
        }
        (existing, incoming) => {
            if *existing == incoming {
                return;
            }
            let current = scalar_text(existing);
            let addition = scalar_text(&incoming);
            let present: Vec<&str> = current.split(SEPARATOR).collect();
            if current == addition || addition.split(SEPARATOR).all(|seg| present.contains(&seg)) {
                return;
            }
            *existing = Value::String(format!("{}{}{}", current, SEPARATOR, addition));
        }
    }
}

/// Objects, and strings that parse as JSON objects.
fn as_object(value: &Value) -> Option<FieldMap> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) if text.trim_start().starts_with('{') => {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        }
        _ => None,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
