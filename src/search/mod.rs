//! Hybrid retrieval.
//!
//! Orchestrates the read path: dense vector search and lexical BM25 run
//! concurrently, results are deduplicated and reranked by weighted score
//! (dense + normalized BM25 + code-identifier match), then merged with the
//! conversation summary and, under consent, the user profile. The path is
//! non-throwing: any failure logs, records a failure metric, and returns
//! an empty list.

mod assembler;
mod identifiers;

pub use assembler::assemble_context;
pub use identifiers::{extract_code_identifiers, is_code_heavy};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::{RerankWeights, RuntimeFlags};
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::ops::{OpsCategory, OpsCounters};
use crate::storage::fts::{fts_search, FtsHit};
use crate::storage::preferences::get_bool_preference;
use crate::storage::{metrics, summaries, Storage};
use crate::types::{
    ContentType, EmbeddingStatus, FlagSnapshot, MessageRef, PhaseLatencies, RetrievalMetric,
    RetrievedItem, Role, SourceCounts, VectorMetadata,
};
use crate::vector::{VectorHit, VectorIndex, WhereFilter};

/// Preference key for the profile-consent bit
pub const PROFILE_CONSENT_KEY: &str = "memory.profile_consent";

/// Hybrid retriever over the dense and lexical indices
pub struct Retriever {
    storage: Storage,
    embeddings: Arc<EmbeddingClient>,
    vector: Arc<VectorIndex>,
    ops: Arc<OpsCounters>,
    flags: Arc<RwLock<RuntimeFlags>>,
    weights: RerankWeights,
    query_log_enabled: bool,
    query_log_sample_rate: f64,
}

impl Retriever {
    pub fn new(
        storage: Storage,
        embeddings: Arc<EmbeddingClient>,
        vector: Arc<VectorIndex>,
        ops: Arc<OpsCounters>,
        flags: Arc<RwLock<RuntimeFlags>>,
        weights: RerankWeights,
        query_log_enabled: bool,
        query_log_sample_rate: f64,
    ) -> Self {
        Self {
            storage,
            embeddings,
            vector,
            ops,
            flags,
            weights: weights.validated(),
            query_log_enabled,
            query_log_sample_rate,
        }
    }

    /// Run the full read path. Never fails: errors surface as an empty
    /// result list plus a failure metric.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        conversation_id: Option<&str>,
        include_profile: bool,
    ) -> Vec<RetrievedItem> {
        if query.trim().is_empty() || top_k == 0 {
            return vec![];
        }

        self.maybe_log_query(query);
        let flags = *self.flags.read();
        let started = Instant::now();

        match self
            .retrieve_inner(query, top_k, conversation_id, include_profile, flags, started)
            .await
        {
            Ok((items, metric)) => {
                self.ops.record_success(OpsCategory::Retrieval);
                self.record_metric(metric);
                items
            }
            Err(err) => {
                tracing::error!(error = %err, "retrieval failed, returning empty result");
                self.ops
                    .record_failure(OpsCategory::Retrieval, "retriever.retrieve", err.to_string());
                self.record_metric(self.empty_metric(query, conversation_id, flags, started));
                vec![]
            }
        }
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        top_k: usize,
        conversation_id: Option<&str>,
        include_profile: bool,
        flags: RuntimeFlags,
        started: Instant,
    ) -> Result<(Vec<RetrievedItem>, RetrievalMetric)> {
        // Conversation pre-check: fall back to global scope when the
        // conversation has nothing indexed yet.
        let scope = match conversation_id {
            Some(id) => {
                let indexed = self
                    .storage
                    .with_connection(|conn| summaries::has_indexed_messages(conn, id))?;
                if indexed {
                    Some(id.to_string())
                } else {
                    None
                }
            }
            None => None,
        };

        let query_vector = self.embeddings.embed(query).await?;
        // Over-fetch to leave the reranker room
        let over_fetch = top_k * 2;
        let query_identifiers = extract_code_identifiers(query);

        let mut sources = SourceCounts::default();
        let mut latencies = PhaseLatencies::default();

        let mut message_items: Vec<RetrievedItem> = if flags.hybrid {
            let dense_started = Instant::now();
            let scope_filter = scope
                .as_deref()
                .map(|id| WhereFilter::eq("conversation_id", id));

            let fts_storage = self.storage.clone();
            let fts_query = query.to_string();
            let fts_scope = scope.clone();
            let fts_chunks = flags.chunking;
            let fts_task = tokio::task::spawn_blocking(move || {
                let fts_started = Instant::now();
                let result = fts_storage.with_connection(|conn| {
                    fts_search(
                        conn,
                        &fts_query,
                        fts_scope.as_deref(),
                        over_fetch as i64,
                        fts_chunks,
                    )
                });
                (result, elapsed_ms(fts_started))
            });

            let (dense_result, fts_joined) = tokio::join!(
                self.vector.query(&query_vector, over_fetch, scope_filter.as_ref()),
                fts_task
            );
            latencies.dense_ms = elapsed_ms(dense_started);

            let dense_hits = dense_result?;
            let fts_hits = match fts_joined {
                Ok((Ok(hits), fts_ms)) => {
                    latencies.fts_ms = fts_ms;
                    hits
                }
                Ok((Err(err), fts_ms)) => {
                    // Lexical trouble degrades the query to dense-only
                    tracing::warn!(error = %err, "FTS unavailable, degrading to dense-only");
                    latencies.fts_ms = fts_ms;
                    vec![]
                }
                Err(err) => {
                    tracing::warn!(error = %err, "FTS task failed, degrading to dense-only");
                    vec![]
                }
            };

            if scope.is_some() {
                sources.conversation_dense = dense_hits.len() as i64;
            } else {
                sources.global_dense = dense_hits.len() as i64;
            }
            sources.fts_lexical = fts_hits.len() as i64;

            let rerank_started = Instant::now();
            let fused = fuse_candidates(
                dense_hits.into_iter().map(item_from_vector_hit).collect(),
                fts_hits,
                self.weights,
                &query_identifiers,
            );
            latencies.rerank_ms = elapsed_ms(rerank_started);
            fused
        } else {
            // Dense-only: conversation scope first, then global fallback
            let dense_started = Instant::now();
            let mut hits = match scope.as_deref() {
                Some(id) => {
                    let scoped = self
                        .vector
                        .query(
                            &query_vector,
                            over_fetch,
                            Some(&WhereFilter::eq("conversation_id", id)),
                        )
                        .await?;
                    sources.conversation_dense = scoped.len() as i64;
                    scoped
                }
                None => vec![],
            };
            if hits.is_empty() {
                hits = self.vector.query(&query_vector, over_fetch, None).await?;
                sources.conversation_dense = 0;
                sources.global_dense = hits.len() as i64;
            }
            latencies.dense_ms = elapsed_ms(dense_started);

            let mut items: Vec<RetrievedItem> =
                hits.into_iter().map(item_from_vector_hit).collect();
            items.sort_by(|a, b| {
                b.similarity_score
                    .partial_cmp(&a.similarity_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.message.id.cmp(&b.message.id))
            });
            items
        };

        message_items.truncate(top_k);

        // Auxiliary sources: summary, then profile under consent
        let mut merged = message_items;
        if let Some(id) = conversation_id {
            if let Some(item) = self.summary_source(id, &query_vector).await? {
                sources.summaries = 1;
                merged.push(item);
            }
        }
        if include_profile {
            if let Some(item) = self.profile_source(&query_vector).await? {
                sources.profile = 1;
                merged.push(item);
            }
        }

        let merged = dedup_keep_max(merged);
        latencies.total_ms = elapsed_ms(started);

        let metric = RetrievalMetric {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            created_at: Utc::now(),
            conversation_id: conversation_id.map(String::from),
            sources,
            latencies,
            top_similarities: merged.iter().take(3).map(|i| i.similarity_score).collect(),
            flags: flag_snapshot(flags),
        };

        Ok((merged, metric))
    }

    /// k=1 filtered dense query for the conversation summary, gated on a
    /// successfully embedded summary row.
    async fn summary_source(
        &self,
        conversation_id: &str,
        query_vector: &[f32],
    ) -> Result<Option<RetrievedItem>> {
        let ready = self.storage.with_connection(|conn| {
            Ok(summaries::get_summary(conn, conversation_id)?
                .map(|s| s.embedding_status == EmbeddingStatus::Success)
                .unwrap_or(false))
        })?;
        if !ready {
            return Ok(None);
        }

        let filter = WhereFilter::and(vec![
            ("conversation_id".into(), conversation_id.into()),
            (
                "content_type".into(),
                ContentType::ConversationSummary.as_str().into(),
            ),
        ]);
        let hits = self.vector.query(query_vector, 1, Some(&filter)).await?;
        Ok(hits.into_iter().next().map(item_from_vector_hit))
    }

    /// k=1 filtered dense query for the user profile. Consent missing or
    /// revoked silently drops the source.
    async fn profile_source(&self, query_vector: &[f32]) -> Result<Option<RetrievedItem>> {
        let ready = self.storage.with_connection(|conn| {
            let consent = get_bool_preference(conn, PROFILE_CONSENT_KEY)?.unwrap_or(false);
            if !consent {
                return Ok(false);
            }
            Ok(summaries::get_profile(conn)?
                .map(|p| p.embedding_status == EmbeddingStatus::Success)
                .unwrap_or(false))
        })?;
        if !ready {
            return Ok(None);
        }

        let filter = WhereFilter::eq("content_type", ContentType::UserProfile.as_str());
        let hits = self.vector.query(query_vector, 1, Some(&filter)).await?;
        Ok(hits.into_iter().next().map(item_from_vector_hit))
    }

    /// Metrics writes are fire-and-forget; they never fail retrieval.
    fn record_metric(&self, metric: RetrievalMetric) {
        let storage = self.storage.clone();
        let ops = self.ops.clone();
        tokio::task::spawn_blocking(move || {
            match storage.with_connection(|conn| metrics::insert_metric(conn, &metric)) {
                Ok(()) => ops.record_success(OpsCategory::Metrics),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to record retrieval metric");
                    ops.record_failure(OpsCategory::Metrics, "retriever.record_metric", err.to_string());
                }
            }
        });
    }

    fn empty_metric(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        flags: RuntimeFlags,
        started: Instant,
    ) -> RetrievalMetric {
        RetrievalMetric {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            created_at: Utc::now(),
            conversation_id: conversation_id.map(String::from),
            sources: SourceCounts::default(),
            latencies: PhaseLatencies {
                total_ms: elapsed_ms(started),
                ..Default::default()
            },
            top_similarities: vec![],
            flags: flag_snapshot(flags),
        }
    }

    /// Sampled query logging; sampling is deterministic per query text.
    fn maybe_log_query(&self, query: &str) {
        if !self.query_log_enabled {
            return;
        }
        if sample_fraction(query) <= self.query_log_sample_rate {
            tracing::debug!(query, "retrieval query");
        }
    }
}

fn flag_snapshot(flags: RuntimeFlags) -> FlagSnapshot {
    FlagSnapshot {
        hybrid: flags.hybrid,
        chunking: flags.chunking,
        token_budget: flags.token_budget as i64,
        summary_frequency: flags.summary_frequency as i64,
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Map a query string onto [0, 1) via its content hash
fn sample_fraction(query: &str) -> f64 {
    let digest = crate::types::content_hash(query);
    let hex = digest.trim_start_matches("sha256:");
    let bucket = u64::from_str_radix(&hex[..8], 16).unwrap_or(0);
    bucket as f64 / (u32::MAX as u64 + 1) as f64
}

/// Convert a dense hit into the common result shape
fn item_from_vector_hit(hit: VectorHit) -> RetrievedItem {
    let (message, content_type, parent, index, kind, language, tokens) = match hit.metadata {
        VectorMetadata::Message {
            conversation_id,
            role,
            created_at,
        } => (
            MessageRef {
                id: hit.id,
                conversation_id,
                role,
                content: hit.document,
                created_at,
            },
            ContentType::Message,
            None,
            None,
            None,
            None,
            None,
        ),
        VectorMetadata::Chunk {
            conversation_id,
            role,
            created_at,
            parent_message_id,
            chunk_index,
            chunk_kind,
            chunk_language,
            token_estimate,
        } => (
            MessageRef {
                id: hit.id,
                conversation_id,
                role,
                content: hit.document,
                created_at,
            },
            ContentType::MessageChunk,
            Some(parent_message_id),
            Some(chunk_index),
            Some(chunk_kind),
            chunk_language,
            Some(token_estimate),
        ),
        VectorMetadata::Summary {
            conversation_id,
            created_at,
        } => (
            MessageRef {
                id: hit.id,
                conversation_id,
                role: Role::System,
                content: hit.document,
                created_at,
            },
            ContentType::ConversationSummary,
            None,
            None,
            None,
            None,
            None,
        ),
        VectorMetadata::Profile { created_at } => (
            MessageRef {
                id: hit.id,
                conversation_id: String::new(),
                role: Role::System,
                content: hit.document,
                created_at,
            },
            ContentType::UserProfile,
            None,
            None,
            None,
            None,
            None,
        ),
    };

    RetrievedItem {
        message,
        similarity_score: hit.similarity,
        content_type,
        parent_message_id: parent,
        chunk_index: index,
        chunk_kind: kind,
        chunk_language: language,
        token_estimate: tokens,
        fts_score: None,
    }
}

fn item_from_fts_hit(hit: FtsHit) -> RetrievedItem {
    RetrievedItem {
        message: MessageRef {
            id: hit.id,
            conversation_id: hit.conversation_id,
            role: hit.role,
            content: hit.content,
            created_at: hit.created_at,
        },
        similarity_score: hit.similarity,
        content_type: hit.content_type,
        parent_message_id: hit.parent_message_id,
        chunk_index: hit.chunk_index,
        chunk_kind: hit.chunk_kind,
        chunk_language: hit.chunk_language,
        token_estimate: hit.token_estimate,
        fts_score: Some(hit.bm25),
    }
}

/// Union dense and lexical hits by id, keep the richest copy, and score
/// `alpha * dense + beta * bm25_norm + gamma * code_match`. Output is
/// ordered by final score, then original source order, then id.
fn fuse_candidates(
    dense_items: Vec<RetrievedItem>,
    fts_hits: Vec<FtsHit>,
    weights: RerankWeights,
    query_identifiers: &HashSet<String>,
) -> Vec<RetrievedItem> {
    struct Candidate {
        item: RetrievedItem,
        dense: Option<f32>,
        lexical: Option<f32>,
        order: usize,
    }

    let mut by_id: HashMap<String, Candidate> = HashMap::new();
    let mut order = 0usize;

    for item in dense_items {
        let dense = item.similarity_score;
        by_id
            .entry(item.message.id.clone())
            .and_modify(|c| {
                if c.dense.map(|d| dense > d).unwrap_or(true) {
                    c.dense = Some(dense);
                }
            })
            .or_insert_with(|| {
                let candidate = Candidate {
                    item,
                    dense: Some(dense),
                    lexical: None,
                    order,
                };
                order += 1;
                candidate
            });
    }

    for hit in fts_hits {
        let lexical = hit.similarity;
        let bm25 = hit.bm25;
        match by_id.get_mut(&hit.id) {
            Some(candidate) => {
                if candidate.lexical.map(|l| lexical > l).unwrap_or(true) {
                    candidate.lexical = Some(lexical);
                    candidate.item.fts_score = Some(bm25);
                }
            }
            None => {
                by_id.insert(
                    hit.id.clone(),
                    Candidate {
                        item: item_from_fts_hit(hit),
                        dense: None,
                        lexical: Some(lexical),
                        order,
                    },
                );
                order += 1;
            }
        }
    }

    let mut fused: Vec<(f32, usize, RetrievedItem)> = by_id
        .into_values()
        .map(|candidate| {
            let code_match = if !query_identifiers.is_empty()
                && extract_code_identifiers(&candidate.item.message.content)
                    .intersection(query_identifiers)
                    .next()
                    .is_some()
            {
                1.0
            } else {
                0.0
            };
            let score = weights.alpha * candidate.dense.unwrap_or(0.0)
                + weights.beta * candidate.lexical.unwrap_or(0.0)
                + weights.gamma * code_match;
            let mut item = candidate.item;
            item.similarity_score = score;
            (score, candidate.order, item)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.message.id.cmp(&b.2.message.id))
    });

    fused.into_iter().map(|(_, _, item)| item).collect()
}

/// Deduplicate by id, keeping the maximum similarity per id and the first
/// occurrence's position.
fn dedup_keep_max(items: Vec<RetrievedItem>) -> Vec<RetrievedItem> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<RetrievedItem> = Vec::with_capacity(items.len());

    for item in items {
        match seen.get(&item.message.id) {
            Some(&index) => {
                if item.similarity_score > out[index].similarity_score {
                    out[index] = item;
                }
            }
            None => {
                seen.insert(item.message.id.clone(), out.len());
                out.push(item);
            }
        }
    }

    out
}
