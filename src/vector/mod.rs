//! Vector index client.
//!
//! Talks to a Chroma-compatible collection API over HTTP: cosine
//! collections, batch add (as explicit delete-then-add replacement),
//! filtered top-k queries, deletes, and counts. Distances come back as
//! cosine distance; similarity is reported to higher layers as
//! `max(0, 1 - distance)` and hits under the configured threshold are
//! dropped here.

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::error::{RecallError, Result};
use crate::types::VectorMetadata;

/// Equality filter over vector metadata. Multiple conditions are combined
/// under an explicit `$and`; a single condition is passed directly, which
/// keeps back-ends that reject multiple top-level operators happy.
#[derive(Debug, Clone)]
pub enum WhereFilter {
    Eq(String, Value),
    And(Vec<(String, Value)>),
}

impl WhereFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        WhereFilter::Eq(field.into(), value.into())
    }

    pub fn and(conditions: Vec<(String, Value)>) -> Self {
        if conditions.len() == 1 {
            let (field, value) = conditions.into_iter().next().expect("len checked");
            WhereFilter::Eq(field, value)
        } else {
            WhereFilter::And(conditions)
        }
    }

    fn to_value(&self) -> Value {
        fn clause(field: &str, value: &Value) -> Value {
            let mut map = Map::new();
            map.insert(field.to_string(), value.clone());
            Value::Object(map)
        }

        match self {
            WhereFilter::Eq(field, value) => clause(field, value),
            WhereFilter::And(conditions) => {
                let clauses: Vec<Value> = conditions
                    .iter()
                    .map(|(field, value)| clause(field, value))
                    .collect();
                json!({ "$and": clauses })
            }
        }
    }
}

/// One dense hit, already threshold-filtered
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: VectorMetadata,
    pub distance: f32,
    pub similarity: f32,
}

/// A record fetched by id
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Option<VectorMetadata>,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
    #[allow(dead_code)]
    name: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    distances: Option<Vec<Vec<f32>>>,
    documents: Option<Vec<Vec<Option<String>>>>,
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    documents: Option<Vec<Option<String>>>,
    metadatas: Option<Vec<Option<Map<String, Value>>>>,
}

/// Shared handle on one cosine collection of the vector index
pub struct VectorIndex {
    http: reqwest::Client,
    base_url: String,
    collection_name: String,
    collection_id: RwLock<Option<String>>,
    similarity_threshold: f32,
}

impl VectorIndex {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.vector_url(),
            collection_name: config.collection_name.clone(),
            collection_id: RwLock::new(None),
            similarity_threshold: config.similarity_threshold,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn unavailable(err: reqwest::Error) -> RecallError {
        RecallError::IndexUnavailable(err.to_string())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RecallError::IndexUnavailable(format!("{}: {}", status, body)))
        }
    }

    /// Idempotently create (or reuse) the cosine collection and cache its
    /// id for subsequent calls.
    pub async fn ensure_collection(&self) -> Result<String> {
        if let Some(id) = self.collection_id.read().clone() {
            return Ok(id);
        }

        let response = self
            .http
            .post(format!("{}/api/v1/collections", self.base_url))
            .json(&json!({
                "name": self.collection_name,
                "metadata": { "hnsw:space": "cosine" },
                "get_or_create": true,
            }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        let collection: CollectionResponse =
            Self::check(response).await?.json().await.map_err(Self::unavailable)?;
        *self.collection_id.write() = Some(collection.id.clone());
        Ok(collection.id)
    }

    /// Whether the collection currently exists on the server
    pub async fn collection_exists(&self) -> Result<bool> {
        let response = self
            .http
            .get(format!(
                "{}/api/v1/collections/{}",
                self.base_url, self.collection_name
            ))
            .send()
            .await
            .map_err(Self::unavailable)?;
        Ok(response.status().is_success())
    }

    /// Drop the collection. Destructive; used only by the rebuild trigger.
    pub async fn delete_collection(&self) -> Result<()> {
        let response = self
            .http
            .delete(format!(
                "{}/api/v1/collections/{}",
                self.base_url, self.collection_name
            ))
            .send()
            .await
            .map_err(Self::unavailable)?;

        // Deleting a missing collection is fine
        if !response.status().is_success() && response.status().as_u16() != 404 {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecallError::IndexUnavailable(format!("{}: {}", status, body)));
        }
        *self.collection_id.write() = None;
        Ok(())
    }

    /// Batch upsert. Existing ids are replaced via explicit
    /// delete-then-add.
    pub async fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[String],
        metadatas: &[VectorMetadata],
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection_id = self.ensure_collection().await?;

        self.delete_ids(ids).await?;

        let metadata_maps: Vec<Map<String, Value>> =
            metadatas.iter().map(|m| m.to_map()).collect();
        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{}/add",
                self.base_url, collection_id
            ))
            .json(&json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadata_maps,
            }))
            .send()
            .await
            .map_err(Self::unavailable)?;
        Self::check(response).await?;
        Ok(())
    }

    /// Top-k cosine query. Hits below the similarity threshold are dropped.
    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        where_filter: Option<&WhereFilter>,
    ) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(vec![]);
        }
        let collection_id = self.ensure_collection().await?;

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "distances", "metadatas"],
        });
        if let Some(filter) = where_filter {
            body["where"] = filter.to_value();
        }

        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{}/query",
                self.base_url, collection_id
            ))
            .json(&body)
            .send()
            .await
            .map_err(Self::unavailable)?;

        let parsed: QueryResponse =
            Self::check(response).await?.json().await.map_err(Self::unavailable)?;

        let ids = parsed.ids.into_iter().next().unwrap_or_default();
        let distances = parsed
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let documents = parsed
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metadatas = parsed
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();

        let mut hits = Vec::with_capacity(ids.len());
        for (index, id) in ids.into_iter().enumerate() {
            let distance = distances.get(index).copied().unwrap_or(1.0);
            let similarity = (1.0 - distance).max(0.0);
            if similarity < self.similarity_threshold {
                continue;
            }
            let metadata = metadatas
                .get(index)
                .and_then(|m| m.as_ref())
                .map(VectorMetadata::from_map)
                .unwrap_or_else(|| VectorMetadata::from_map(&Map::new()));
            hits.push(VectorHit {
                id,
                document: documents
                    .get(index)
                    .and_then(|d| d.clone())
                    .unwrap_or_default(),
                metadata,
                distance,
                similarity,
            });
        }

        Ok(hits)
    }

    pub async fn delete_ids(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection_id = self.ensure_collection().await?;
        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{}/delete",
                self.base_url, collection_id
            ))
            .json(&json!({ "ids": ids }))
            .send()
            .await
            .map_err(Self::unavailable)?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete_by_where(&self, where_filter: &WhereFilter) -> Result<()> {
        let collection_id = self.ensure_collection().await?;
        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{}/delete",
                self.base_url, collection_id
            ))
            .json(&json!({ "where": where_filter.to_value() }))
            .send()
            .await
            .map_err(Self::unavailable)?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let collection_id = self.ensure_collection().await?;
        let response = self
            .http
            .get(format!(
                "{}/api/v1/collections/{}/count",
                self.base_url, collection_id
            ))
            .send()
            .await
            .map_err(Self::unavailable)?;
        let count: i64 = Self::check(response).await?.json().await.map_err(Self::unavailable)?;
        Ok(count)
    }

    /// Fetch records by id
    pub async fn get(&self, ids: &[String]) -> Result<Vec<VectorRecord>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let collection_id = self.ensure_collection().await?;
        let response = self
            .http
            .post(format!(
                "{}/api/v1/collections/{}/get",
                self.base_url, collection_id
            ))
            .json(&json!({
                "ids": ids,
                "include": ["documents", "metadatas"],
            }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        let parsed: GetResponse =
            Self::check(response).await?.json().await.map_err(Self::unavailable)?;
        let documents = parsed.documents.unwrap_or_default();
        let metadatas = parsed.metadatas.unwrap_or_default();

        Ok(parsed
            .ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| VectorRecord {
                id,
                document: documents.get(index).and_then(|d| d.clone()),
                metadata: metadatas
                    .get(index)
                    .and_then(|m| m.as_ref())
                    .map(VectorMetadata::from_map),
            })
            .collect())
    }
}
