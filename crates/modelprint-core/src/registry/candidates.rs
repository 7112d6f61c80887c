//! Ranked name-search queries for registries without fingerprint lookup.
//!
//! Order: the cleaned file name, then individual name tokens (longest first),
//! then identification anchors found in local metadata. Queries are
//! deduplicated case-insensitively and capped.

use crate::FieldMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Tokens too generic to identify a model on their own.
const NOISE_TOKENS: &[&str] = &[
    "lora", "lycoris", "locon", "loha", "model", "checkpoint", "safetensors", "ckpt", "fp16",
    "fp32", "bf16", "pruned", "ema", "noema", "final", "xl", "sdxl", "sd15", "v1", "v2",
];

const MIN_TOKEN_LEN: usize = 3;

static PRECISION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-_.](?i:fp16|fp32|bf16|f16|f32|pruned|emaonly|ema)$").unwrap()
});

static VERSION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.](?i:v\d+(?:[._]\d+)*)$").unwrap());

static REPO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][\w.-]*/[A-Za-z0-9][\w.-]*$").unwrap());

static CIVITAI_MODEL_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"civitai\.com/models/(\d+)").unwrap());

/// Strip extension and trailing precision/version markers.
///
/// `"cyberpunk_style_v2.fp16.safetensors"` → `"cyberpunk_style"`.
pub fn clean_file_name(file_name: &str) -> String {
    let mut name = match file_name.rfind('.') {
        Some(dot) if dot > 0 => file_name[..dot].to_string(),
        _ => file_name.to_string(),
    };

    loop {
        let stripped = PRECISION_SUFFIX.replace(&name, "").to_string();
        let stripped = VERSION_SUFFIX.replace(&stripped, "").to_string();
        if stripped == name || stripped.is_empty() {
            break;
        }
        name = stripped;
    }

    name.trim_matches(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .to_string()
}

/// Distinctive name tokens, longest first.
pub fn name_tokens(cleaned: &str) -> Vec<String> {
    let mut tokens: Vec<String> = cleaned
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_lowercase)
        .filter(|t| !NOISE_TOKENS.contains(&t.as_str()))
        .collect();

    // Stable sort keeps the original order among equal lengths.
    tokens.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));
    tokens
}

/// Identification anchors in local metadata: `owner/repo` ids and numeric
/// civitai model ids.
pub fn metadata_anchors(fields: &FieldMap) -> Vec<String> {
    let mut anchors = Vec::new();

    for (key, value) in fields {
        let Some(text) = value_text(value) else {
            continue;
        };
        let text = text.trim();

        if REPO_ID.is_match(text) {
            anchors.push(text.to_string());
        }
        if let Some(caps) = CIVITAI_MODEL_URL.captures(text) {
            anchors.push(caps[1].to_string());
        } else if key.to_lowercase().contains("civitai")
            && !text.is_empty()
            && text.chars().all(|c| c.is_ascii_digit())
        {
            anchors.push(text.to_string());
        }
    }

    anchors
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build the ranked, deduplicated, capped query list.
pub fn candidate_queries(file_name: &str, local_fields: &FieldMap, max: usize) -> Vec<String> {
    let cleaned = clean_file_name(file_name);

    let ranked = std::iter::once(cleaned.clone())
        .chain(name_tokens(&cleaned))
        .chain(metadata_anchors(local_fields));

    let mut seen = HashSet::new();
    ranked
        .filter(|q| !q.trim().is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max)
        .collect()
}
