//! Summaries of node-graph (ComfyUI) generation records.
//!
//! Two JSON documents may be embedded: `prompt`, the executable graph keyed by
//! node id (`{"3": {"class_type": "KSampler", "inputs": {...}}}`), and
//! `workflow`, the editor graph (`{"nodes": [{"type": ..., "widgets_values": [...]}]}`).
//! Input values that are links to other nodes are arrays and are skipped.

use crate::FieldMap;
use serde_json::{Map, Value};

const SAMPLER_INPUTS: &[(&str, &str)] = &[
    ("seed", "seed"),
    ("noise_seed", "seed"),
    ("steps", "steps"),
    ("cfg", "cfg"),
    ("sampler_name", "sampler"),
    ("scheduler", "scheduler"),
    ("denoise", "denoise"),
];

/// Build structured fields from the embedded documents.
pub fn summarize(prompt: Option<&Value>, workflow: Option<&Value>) -> FieldMap {
    let mut fields = FieldMap::new();

    let mut summary = GraphSummary::default();
    if let Some(Value::Object(graph)) = prompt {
        summary = summarize_prompt_graph(graph);
    } else if let Some(workflow) = workflow {
        summary = summarize_workflow(workflow);
    }
    summary.write_into(&mut fields);

    if let Some(prompt) = prompt {
        fields.insert("prompt".into(), prompt.clone());
    }
    if let Some(workflow) = workflow {
        fields.insert("workflow".into(), workflow.clone());
    }

    fields
}

#[derive(Debug, Default)]
struct GraphSummary {
    checkpoint: Option<String>,
    loras: Vec<String>,
    sampler: FieldMap,
    text_prompts: Vec<String>,
}

impl GraphSummary {
    fn write_into(self, fields: &mut FieldMap) {
        if let Some(checkpoint) = self.checkpoint {
            fields.insert("checkpoint".into(), Value::String(checkpoint));
        }
        if !self.loras.is_empty() {
            fields.insert(
                "loras".into(),
                Value::Array(self.loras.into_iter().map(Value::String).collect()),
            );
        }
        for (key, value) in self.sampler {
            fields.insert(key, value);
        }
        if !self.text_prompts.is_empty() {
            fields.insert(
                "textPrompts".into(),
                Value::Array(self.text_prompts.into_iter().map(Value::String).collect()),
            );
        }
    }

    fn observe(&mut self, class_type: &str, input: impl Fn(&str) -> Option<Value>) {
        let as_string = |v: Option<Value>| match v {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };

        if class_type.contains("CheckpointLoader") {
            if self.checkpoint.is_none() {
                self.checkpoint = as_string(input("ckpt_name"));
            }
        } else if class_type.starts_with("LoraLoader") {
            if let Some(name) = as_string(input("lora_name")) {
                self.loras.push(name);
            }
        } else if class_type.starts_with("KSampler") {
            if self.sampler.is_empty() {
                for &(input_key, field) in SAMPLER_INPUTS {
                    if let Some(value) = input(input_key).filter(is_scalar) {
                        self.sampler.entry(field.to_string()).or_insert(value);
                    }
                }
            }
        } else if class_type.starts_with("CLIPTextEncode") {
            if let Some(text) = as_string(input("text")) {
                self.text_prompts.push(text);
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Nodes are visited in numeric id order so output does not depend on key order.
fn summarize_prompt_graph(graph: &Map<String, Value>) -> GraphSummary {
    let mut nodes: Vec<(&String, &Value)> = graph.iter().collect();
    nodes.sort_by_key(|(id, _)| (id.parse::<u64>().unwrap_or(u64::MAX), (*id).clone()));

    let mut summary = GraphSummary::default();
    for (_, node) in nodes {
        let Some(class_type) = node.get("class_type").and_then(Value::as_str) else {
            continue;
        };
        let inputs = node.get("inputs");
        summary.observe(class_type, |key| {
            inputs.and_then(|i| i.get(key)).cloned()
        });
    }
    summary
}

/// Editor graphs only carry positional widget values; the first one is the
/// model name for loaders and the text for encoders.
fn summarize_workflow(workflow: &Value) -> GraphSummary {
    let mut summary = GraphSummary::default();
    let Some(nodes) = workflow.get("nodes").and_then(Value::as_array) else {
        return summary;
    };

    for node in nodes {
        let Some(node_type) = node.get("type").and_then(Value::as_str) else {
            continue;
        };
        let first_widget = node
            .get("widgets_values")
            .and_then(Value::as_array)
            .and_then(|w| w.first())
            .cloned();

        if node_type.starts_with("KSampler") {
            // Positional sampler widgets vary by node version; not summarized.
            continue;
        }
        let key = if node_type.contains("CheckpointLoader") {
            "ckpt_name"
        } else if node_type.starts_with("LoraLoader") {
            "lora_name"
        } else {
            "text"
        };
        summary.observe(node_type, |wanted| {
            if wanted == key {
                first_widget.clone()
            } else {
                None
            }
        });
    }
    summary
}
