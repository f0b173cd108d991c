//! Shared test harness: in-process mock embedding server and vector index.
//!
//! The embedding mock produces deterministic token-bag vectors, so texts
//! sharing tokens get genuinely similar embeddings and the hybrid pipeline
//! can be exercised end to end without external services.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use recall::config::EngineConfig;
use recall::engine::MemoryEngine;
use recall::Storage;

pub const EMBED_DIMS: usize = 768;

/// Deterministic token-bag embedding: each lowercase alphanumeric token
/// contributes a pseudo-random unit direction derived from its hash.
pub fn embed_text(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims];
    let lowered = text.to_lowercase();
    for token in lowered.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        let mut state = fnv1a(token);
        for slot in vector.iter_mut() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let unit = ((state >> 33) as f64 / (1u64 << 31) as f64) - 1.0;
            *slot += unit as f32;
        }
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for slot in vector.iter_mut() {
            *slot /= norm;
        }
    }
    vector
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

// ---------------------------------------------------------------------
// Mock embedding server
// ---------------------------------------------------------------------

#[derive(Clone)]
struct EmbedServerState {
    calls: Arc<AtomicUsize>,
    /// Requests failed with 503 before succeeding
    fail_remaining: Arc<AtomicUsize>,
}

async fn handle_embeddings(
    State(state): State<EmbedServerState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.calls.fetch_add(1, Ordering::SeqCst);

    if state
        .fail_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let inputs: Vec<String> = match &body["input"] {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    if inputs.iter().any(|t| t.contains("FAIL_EMBED")) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let data: Vec<Value> = inputs
        .iter()
        .map(|text| json!({ "embedding": embed_text(text, EMBED_DIMS) }))
        .collect();
    Ok(Json(json!({ "data": data })))
}

async fn handle_models() -> Json<Value> {
    Json(json!({ "data": [{ "id": "test-embed" }] }))
}

// ---------------------------------------------------------------------
// Mock vector index (Chroma-shaped)
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct StoredRecord {
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: Map<String, Value>,
}

#[derive(Default)]
pub struct VectorState {
    /// collection name -> records by id (collection id == name)
    pub collections: HashMap<String, HashMap<String, StoredRecord>>,
}

type SharedVectorState = Arc<Mutex<VectorState>>;

async fn create_collection(
    State(state): State<SharedVectorState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let name = body["name"].as_str().ok_or(StatusCode::BAD_REQUEST)?.to_string();
    let get_or_create = body["get_or_create"].as_bool().unwrap_or(false);

    let mut guard = state.lock();
    if guard.collections.contains_key(&name) && !get_or_create {
        return Err(StatusCode::CONFLICT);
    }
    guard.collections.entry(name.clone()).or_default();
    Ok(Json(json!({ "id": name, "name": name, "metadata": body["metadata"] })))
}

async fn get_collection(
    State(state): State<SharedVectorState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if state.lock().collections.contains_key(&name) {
        Ok(Json(json!({ "id": name, "name": name })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn delete_collection(
    State(state): State<SharedVectorState>,
    Path(name): Path<String>,
) -> StatusCode {
    if state.lock().collections.remove(&name).is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn add_records(
    State(state): State<SharedVectorState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let ids: Vec<String> = serde_json::from_value(body["ids"].clone())
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let embeddings: Vec<Vec<f32>> = serde_json::from_value(body["embeddings"].clone())
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let documents: Vec<String> = serde_json::from_value(body["documents"].clone())
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let metadatas: Vec<Map<String, Value>> = serde_json::from_value(body["metadatas"].clone())
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut guard = state.lock();
    let records = guard
        .collections
        .get_mut(&collection)
        .ok_or(StatusCode::NOT_FOUND)?;
    for (((id, embedding), document), metadata) in ids
        .into_iter()
        .zip(embeddings)
        .zip(documents)
        .zip(metadatas)
    {
        records.insert(
            id,
            StoredRecord {
                embedding,
                document,
                metadata,
            },
        );
    }
    Ok(Json(json!(true)))
}

fn metadata_matches(metadata: &Map<String, Value>, filter: &Value) -> bool {
    if let Some(clauses) = filter.get("$and").and_then(|v| v.as_array()) {
        return clauses.iter().all(|clause| metadata_matches(metadata, clause));
    }
    filter
        .as_object()
        .map(|obj| {
            obj.iter()
                .all(|(field, expected)| metadata.get(field) == Some(expected))
        })
        .unwrap_or(false)
}

async fn delete_records(
    State(state): State<SharedVectorState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut guard = state.lock();
    let records = guard
        .collections
        .get_mut(&collection)
        .ok_or(StatusCode::NOT_FOUND)?;

    if let Some(ids) = body.get("ids").and_then(|v| v.as_array()) {
        for id in ids.iter().filter_map(|v| v.as_str()) {
            records.remove(id);
        }
    } else if let Some(filter) = body.get("where") {
        records.retain(|_, record| !metadata_matches(&record.metadata, filter));
    }
    Ok(Json(json!(true)))
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

async fn query_records(
    State(state): State<SharedVectorState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let query: Vec<Vec<f32>> = serde_json::from_value(body["query_embeddings"].clone())
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let query = query.into_iter().next().ok_or(StatusCode::BAD_REQUEST)?;
    let n_results = body["n_results"].as_u64().unwrap_or(10) as usize;
    let filter = body.get("where").filter(|v| !v.is_null());

    let guard = state.lock();
    let records = guard
        .collections
        .get(&collection)
        .ok_or(StatusCode::NOT_FOUND)?;

    let mut scored: Vec<(String, f32, String, Map<String, Value>)> = records
        .iter()
        .filter(|(_, record)| {
            filter
                .map(|f| metadata_matches(&record.metadata, f))
                .unwrap_or(true)
        })
        .map(|(id, record)| {
            let distance = 1.0 - cosine(&query, &record.embedding);
            (
                id.clone(),
                distance,
                record.document.clone(),
                record.metadata.clone(),
            )
        })
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(n_results);

    let ids: Vec<&String> = scored.iter().map(|(id, ..)| id).collect();
    let distances: Vec<f32> = scored.iter().map(|(_, d, ..)| *d).collect();
    let documents: Vec<&String> = scored.iter().map(|(_, _, doc, _)| doc).collect();
    let metadatas: Vec<&Map<String, Value>> = scored.iter().map(|(.., meta)| meta).collect();

    Ok(Json(json!({
        "ids": [ids],
        "distances": [distances],
        "documents": [documents],
        "metadatas": [metadatas],
    })))
}

async fn count_records(
    State(state): State<SharedVectorState>,
    Path(collection): Path<String>,
) -> Result<Json<usize>, StatusCode> {
    let guard = state.lock();
    let records = guard
        .collections
        .get(&collection)
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(records.len()))
}

async fn get_records(
    State(state): State<SharedVectorState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let ids: Vec<String> =
        serde_json::from_value(body["ids"].clone()).map_err(|_| StatusCode::BAD_REQUEST)?;
    let guard = state.lock();
    let records = guard
        .collections
        .get(&collection)
        .ok_or(StatusCode::NOT_FOUND)?;

    let mut found_ids = Vec::new();
    let mut documents = Vec::new();
    let mut metadatas = Vec::new();
    for id in ids {
        if let Some(record) = records.get(&id) {
            found_ids.push(id);
            documents.push(Some(record.document.clone()));
            metadatas.push(Some(record.metadata.clone()));
        }
    }
    Ok(Json(json!({
        "ids": found_ids,
        "documents": documents,
        "metadatas": metadatas,
    })))
}

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

pub struct TestBackends {
    pub embedding_url: String,
    pub vector_host: String,
    pub vector_port: u16,
    pub embed_calls: Arc<AtomicUsize>,
    pub embed_fail_remaining: Arc<AtomicUsize>,
    pub vector_state: SharedVectorState,
}

impl TestBackends {
    /// Records currently stored in a collection, by id
    pub fn records(&self, collection: &str) -> HashMap<String, StoredRecord> {
        self.vector_state
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

pub async fn spawn_backends() -> TestBackends {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let embed_fail_remaining = Arc::new(AtomicUsize::new(0));
    let embed_state = EmbedServerState {
        calls: embed_calls.clone(),
        fail_remaining: embed_fail_remaining.clone(),
    };
    let embed_app = Router::new()
        .route("/v1/embeddings", post(handle_embeddings))
        .route("/v1/models", get(handle_models))
        .with_state(embed_state);
    let embed_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let embed_addr = embed_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(embed_listener, embed_app).await.unwrap();
    });

    let vector_state: SharedVectorState = Arc::new(Mutex::new(VectorState::default()));
    let vector_app = Router::new()
        .route("/api/v1/collections", post(create_collection))
        .route(
            "/api/v1/collections/:name",
            get(get_collection).delete(delete_collection),
        )
        .route("/api/v1/collections/:id/add", post(add_records))
        .route("/api/v1/collections/:id/delete", post(delete_records))
        .route("/api/v1/collections/:id/query", post(query_records))
        .route("/api/v1/collections/:id/count", get(count_records))
        .route("/api/v1/collections/:id/get", post(get_records))
        .with_state(vector_state.clone());
    let vector_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let vector_addr = vector_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(vector_listener, vector_app).await.unwrap();
    });

    TestBackends {
        embedding_url: format!("http://{}/v1/embeddings", embed_addr),
        vector_host: vector_addr.ip().to_string(),
        vector_port: vector_addr.port(),
        embed_calls,
        embed_fail_remaining,
        vector_state,
    }
}

pub fn test_config(backends: &TestBackends) -> EngineConfig {
    EngineConfig {
        db_path: ":memory:".into(),
        vector_host: backends.vector_host.clone(),
        vector_port: backends.vector_port,
        collection_name: "recall_test".into(),
        embedding_url: backends.embedding_url.clone(),
        embedding_model: "test-embed".into(),
        embed_timeout_ms: 5_000,
        embed_retries: 2,
        ..Default::default()
    }
}

/// Engine over in-memory storage plus a cloned storage handle for direct
/// inspection (the clone shares the same connection).
pub fn test_engine(config: EngineConfig) -> (MemoryEngine, Storage) {
    let storage = Storage::open_in_memory().unwrap();
    let engine = MemoryEngine::with_storage(config, storage.clone()).unwrap();
    (engine, storage)
}
