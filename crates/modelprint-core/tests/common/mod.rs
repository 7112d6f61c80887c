//! Shared fixtures: an in-process mock registry and asset builders.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use modelprint_core::PipelineConfig;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Minimal PNG bytes served as a preview image.
pub const PREVIEW_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-preview";

/// What the mock answers. Fields are filled in before the server starts.
#[derive(Default)]
pub struct MockState {
    pub base_url: String,
    /// sha256 → Civitai model version body.
    pub civitai_versions: HashMap<String, Value>,
    /// Status returned for every by-hash lookup, overriding `civitai_versions`.
    pub civitai_status: Option<u16>,
    /// search text → list of repo ids.
    pub hf_search: HashMap<String, Vec<String>>,
    /// repo id → detail body.
    pub hf_details: HashMap<String, Value>,
    /// Paths that fail with 500 when fetched as files.
    pub broken_files: Vec<String>,
    pub requests: AtomicUsize,
    pub log: Mutex<Vec<String>>,
}

impl MockState {
    fn record(&self, entry: String) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }

    pub fn logged(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

/// A running mock registry serving both the Civitai and HuggingFace routes.
pub struct MockRegistry {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockRegistry {
    /// Bind to `127.0.0.1:0`, let `configure` fill in responses, and serve.
    pub async fn start(configure: impl FnOnce(&mut MockState)) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let mut state = MockState {
            base_url: base_url.clone(),
            ..Default::default()
        };
        configure(&mut state);
        let state = Arc::new(state);

        let app = Router::new()
            .route("/api/v1/model-versions/by-hash/:hash", get(civitai_by_hash))
            .route("/api/models", get(hf_search))
            .route("/api/models/:owner/:name", get(hf_detail))
            .fallback(serve_file)
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    /// Pipeline configuration pointing both registries at this mock.
    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.registry.civitai_base_url = self.base_url.clone();
        config.registry.huggingface_base_url = self.base_url.clone();
        config.registry.retry_attempts = 2;
        config.registry.retry_base_delay_ms = 1;
        config.registry.request_timeout_secs = 5;
        config
    }
}

async fn civitai_by_hash(
    State(state): State<Arc<MockState>>,
    Path(hash): Path<String>,
) -> Response {
    state.record(format!("civitai:{}", hash));
    if let Some(status) = state.civitai_status {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "mock failure").into_response();
    }
    match state.civitai_versions.get(&hash) {
        Some(body) => Json(body.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "Model not found"}))).into_response(),
    }
}

async fn hf_search(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = params.get("search").cloned().unwrap_or_default();
    state.record(format!("hf_search:{}", query));
    let hits: Vec<Value> = state
        .hf_search
        .get(&query)
        .map(|ids| ids.iter().map(|id| json!({"id": id, "modelId": id})).collect())
        .unwrap_or_default();
    Json(Value::Array(hits)).into_response()
}

async fn hf_detail(
    State(state): State<Arc<MockState>>,
    Path((owner, name)): Path<(String, String)>,
) -> Response {
    let repo_id = format!("{}/{}", owner, name);
    state.record(format!("hf_detail:{}", repo_id));
    match state.hf_details.get(&repo_id) {
        Some(body) => Json(body.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve_file(State(state): State<Arc<MockState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    state.record(format!("file:{}", path));
    if state.broken_files.contains(&path) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "broken").into_response();
    }
    if path.ends_with(".png") {
        return ([("content-type", "image/png")], PREVIEW_BYTES).into_response();
    }
    StatusCode::NOT_FOUND.into_response()
}

/// Civitai model-version body with one general-audience preview image.
pub fn civitai_version(base_url: &str, base_model: &str, trained_words: &[&str]) -> Value {
    json!({
        "id": 101,
        "modelId": 42,
        "name": "v1.0",
        "baseModel": base_model,
        "trainedWords": trained_words,
        "model": {"name": "Foo Style", "type": "LORA", "nsfw": false},
        "images": [
            {"url": format!("{}/images/mature.png", base_url), "nsfwLevel": 8},
            {"url": format!("{}/images/safe.png", base_url), "nsfwLevel": 1}
        ]
    })
}

/// Safetensors bytes: header with `metadata`, one tensor, padded to `total_len`.
pub fn safetensors_bytes(metadata: &[(&str, &str)], total_len: usize) -> Vec<u8> {
    let meta: serde_json::Map<String, Value> = metadata
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    let header = json!({
        "__metadata__": meta,
        "lora_up.weight": {"dtype": "F16", "shape": [4, 8], "data_offsets": [0, 64]}
    })
    .to_string();

    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(header.as_bytes());
    if bytes.len() < total_len {
        // Non-zero, position-dependent filler so distinct sizes hash differently.
        let start = bytes.len();
        bytes.extend((start..total_len).map(|i| (i % 251) as u8));
    }
    bytes
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
