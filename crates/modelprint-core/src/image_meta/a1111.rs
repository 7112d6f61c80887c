//! Parser for the `parameters` text written by A1111-style web UIs.
//!
//! ```text
//! a cat sitting on a chair
//! Negative prompt: blurry, lowres
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 42, Size: 512x512
//! ```
//!
//! The last line is always taken as the settings line. A prompt that continues
//! after the settings line is misparsed; that layout is not produced by the
//! writers this targets.

use crate::FieldMap;
use serde_json::Value;

const NEGATIVE_MARKER: &str = "Negative prompt:";

/// Parse generation parameters into camelCased fields.
pub fn parse_parameters(text: &str) -> FieldMap {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let mut fields = FieldMap::new();
    let Some(last_idx) = lines.len().checked_sub(1) else {
        return fields;
    };

    let negative_idx = lines.iter().position(|l| l.starts_with(NEGATIVE_MARKER));

    // The last line is always the settings line, even when it holds no pairs.
    let (prompt, negative, settings_line) = match negative_idx {
        Some(idx) => {
            let mut negative = vec![lines[idx][NEGATIVE_MARKER.len()..].trim()];
            // Lines between the negative prompt and the settings line continue it.
            let settings = if idx < last_idx {
                negative.extend(&lines[idx + 1..last_idx]);
                Some(lines[last_idx])
            } else {
                None
            };
            (lines[..idx].join("\n"), Some(negative.join("\n")), settings)
        }
        None => (lines[..last_idx].join("\n"), None, Some(lines[last_idx])),
    };

    let settings = settings_line.map(parse_settings_line).unwrap_or_default();

    fields.insert("prompt".into(), Value::String(prompt.trim().to_string()));
    if let Some(negative) = negative {
        fields.insert(
            "negativePrompt".into(),
            Value::String(negative.trim().to_string()),
        );
    }
    for (key, value) in settings {
        fields.entry(key).or_insert(Value::String(value));
    }

    fields
}

/// Split `Key: value, Key: value` into normalized pairs.
///
/// Commas inside double quotes do not split (`Lora hashes: "a: 1, b: 2"`).
pub fn parse_settings_line(line: &str) -> Vec<(String, String)> {
    split_outside_quotes(line)
        .into_iter()
        .filter_map(|part| {
            let (key, value) = part.split_once(':')?;
            let key = camel_case(key);
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key, value.to_string()))
        })
        .collect()
}

fn split_outside_quotes(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(line[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(line[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// `"CFG scale"` → `"cfgScale"`, `"Model hash"` → `"modelHash"`.
pub fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, word) in key
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}
