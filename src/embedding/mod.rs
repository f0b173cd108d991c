//! Embedding generation.
//!
//! Talks to an OpenAI-compatible embedding endpoint (`POST {model, input}`)
//! with a per-request timeout and exponential-backoff retries, L2
//! normalizes every returned vector, and caches results in a process-wide
//! LRU keyed by content hash. The embedding dimension is discovered once
//! per process by embedding a fixed probe string.

mod cache;

pub use cache::{CacheStats, EmbeddingCache};

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{RecallError, Result};
use crate::ops::{OpsCategory, OpsCounters};
use crate::types::content_hash;

const PROBE_TEXT: &str = "recall dimension probe";
const BACKOFF_BASE_MS: u64 = 200;

/// Response statuses worth retrying
const RETRYABLE_STATUSES: &[u16] = &[408, 409, 425, 429, 500, 502, 503, 504];

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: EmbedInput<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EmbedInput<'a> {
    Single(&'a str),
    Batch(&'a [&'a str]),
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

enum AttemptError {
    Retryable(RecallError),
    Fatal(RecallError),
}

/// HTTP embedding client with cache and retry policy
pub struct EmbeddingClient {
    http: reqwest::Client,
    url: String,
    models_url: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
    cache: EmbeddingCache,
    dimension: OnceCell<usize>,
    ops: Arc<OpsCounters>,
}

impl EmbeddingClient {
    pub fn new(config: &EngineConfig, ops: Arc<OpsCounters>) -> Self {
        let models_url = format!(
            "{}/models",
            config.embedding_url.trim_end_matches('/').trim_end_matches("/embeddings")
        );
        Self {
            http: reqwest::Client::new(),
            url: config.embedding_url.clone(),
            models_url,
            model: config.embedding_model.clone(),
            timeout: Duration::from_millis(config.embed_timeout_ms),
            max_retries: config.embed_retries,
            cache: EmbeddingCache::new(config.embed_cache_size),
            dimension: OnceCell::new(),
            ops,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Embed one text, served from the cache when possible.
    pub async fn embed(&self, text: &str) -> Result<Arc<[f32]>> {
        let key = content_hash(text);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let mut vectors = self.request(&[text]).await?;
        let vector = normalize(vectors.remove(0));
        self.cache.put(key, vector.clone());
        Ok(vector)
    }

    /// Embed many texts, preserving input order. Only cache misses hit the
    /// server, in a single batch request.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Arc<[f32]>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let keys: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let mut results: Vec<Option<Arc<[f32]>>> =
            keys.iter().map(|key| self.cache.get(key)).collect();

        let miss_indices: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_none())
            .map(|(i, _)| i)
            .collect();

        if !miss_indices.is_empty() {
            let miss_texts: Vec<&str> = miss_indices.iter().map(|&i| texts[i]).collect();
            let fetched = self.request(&miss_texts).await?;
            for (&index, vector) in miss_indices.iter().zip(fetched.into_iter()) {
                let vector = normalize(vector);
                self.cache.put(keys[index].clone(), vector.clone());
                results[index] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("filled above")).collect())
    }

    /// Embedding dimension, discovered by probing once per process.
    pub async fn dimension(&self) -> Result<usize> {
        if let Some(&dimension) = self.dimension.get() {
            return Ok(dimension);
        }
        let probe = self.embed(PROBE_TEXT).await?;
        Ok(*self.dimension.get_or_init(|| probe.len()))
    }

    /// Probe the optional `/models` endpoint.
    pub async fn is_available(&self) -> bool {
        let response = self
            .http
            .get(&self.models_url)
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                if let Ok(models) = response.json::<ModelsResponse>().await {
                    if !models.data.iter().any(|m| m.id == self.model) {
                        tracing::warn!(model = %self.model, "embedding model not in /models list");
                    }
                }
                true
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "embedding server availability check failed");
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "embedding server unreachable");
                false
            }
        }
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_request(inputs).await {
                Ok(vectors) => {
                    self.ops.record_success(OpsCategory::Embedding);
                    return Ok(vectors);
                }
                Err(AttemptError::Retryable(err)) if attempt < self.max_retries => {
                    let delay = Duration::from_millis(BACKOFF_BASE_MS << attempt);
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Retryable(err)) | Err(AttemptError::Fatal(err)) => {
                    self.ops
                        .record_failure(OpsCategory::Embedding, "embedding.request", err.to_string());
                    return Err(err);
                }
            }
        }
    }

    async fn try_request(&self, inputs: &[&str]) -> std::result::Result<Vec<Vec<f32>>, AttemptError> {
        let body = EmbedRequest {
            model: &self.model,
            input: if inputs.len() == 1 {
                EmbedInput::Single(inputs[0])
            } else {
                EmbedInput::Batch(inputs)
            },
        };

        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                // Transport errors, timeouts and cancellations are retryable
                AttemptError::Retryable(RecallError::EmbeddingUnavailable(err.to_string()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!(
                "{}: {}",
                status,
                response.text().await.unwrap_or_default()
            );
            let err = RecallError::EmbeddingUnavailable(message);
            return if is_retryable_status(status) {
                Err(AttemptError::Retryable(err))
            } else {
                Err(AttemptError::Fatal(err))
            };
        }

        let parsed: EmbedResponse = response.json().await.map_err(|err| {
            AttemptError::Fatal(RecallError::EmbeddingUnavailable(format!(
                "malformed response: {}",
                err
            )))
        })?;

        if parsed.data.len() != inputs.len() {
            return Err(AttemptError::Fatal(RecallError::EmbeddingUnavailable(
                format!(
                    "expected {} embeddings, got {}",
                    inputs.len(),
                    parsed.data.len()
                ),
            )));
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// L2 normalize. An all-zero vector is passed through unchanged, with a
/// warning instead of a division by zero.
fn normalize(vector: Vec<f32>) -> Arc<[f32]> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        tracing::warn!(dims = vector.len(), "embedding server returned a zero vector");
        return vector.into();
    }
    vector.into_iter().map(|x| x / norm).collect::<Vec<f32>>().into()
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let vector = normalize(vec![3.0, 4.0]);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_passes_through() {
        let vector = normalize(vec![0.0, 0.0, 0.0]);
        assert_eq!(&*vector, &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [408u16, 409, 425, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 403, 404, 422] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_models_url_derivation() {
        let config = EngineConfig {
            embedding_url: "http://localhost:1234/v1/embeddings".into(),
            ..Default::default()
        };
        let client = EmbeddingClient::new(&config, Arc::new(OpsCounters::new()));
        assert_eq!(client.models_url, "http://localhost:1234/v1/models");
    }
}
