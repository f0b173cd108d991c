//! Memory engine facade.
//!
//! Owns the storage, embedding, vector-index and retriever handles and
//! exposes the memory API surface. The write path throws (after recording
//! `embedding_status = failed`), the read path never does. No globals:
//! construct one engine per database and share it.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;

use crate::chunker::{chunk_message, token_estimate, ChunkDraft};
use crate::config::{EngineConfig, RuntimeFlags};
use crate::embedding::{CacheStats, EmbeddingClient};
use crate::error::{RecallError, Result};
use crate::ops::{OpsCategory, OpsCounters};
use crate::search::{assemble_context, extract_code_identifiers, Retriever, PROFILE_CONSENT_KEY};
use crate::storage::preferences::{
    get_bool_preference, get_number_preference, get_preference, set_preference, PreferenceValue,
};
use crate::storage::queries::{self, MessageOrder};
use crate::storage::{chunks, metrics, summaries, Storage};
use crate::summary::{self, RunOutcome};
use crate::types::{
    AugmentedPrompt, Conversation, EmbeddingStatus, MemoryStats, Message, MessageChunk,
    RetrievedItem, Role, SaveMessageOptions, VectorMetadata,
};
use crate::vector::{VectorIndex, WhereFilter};

/// Preference keys for the runtime-overridable flags
pub const PREF_HYBRID: &str = "rag.hybrid";
pub const PREF_CHUNKING: &str = "rag.chunking";
pub const PREF_TOKEN_BUDGET: &str = "rag.token_budget";
pub const PREF_SUMMARY_FREQUENCY: &str = "rag.summary_frequency";
/// Persisted vector-collection identity; a mismatch triggers the rebuild
const VECTOR_META_KEY: &str = "vector.collection_meta";

/// Result of a `save_message` call
#[derive(Debug, Clone)]
pub struct SavedMessage {
    pub message: Message,
    pub chunks: Vec<MessageChunk>,
    /// True when this message crossed the summary-frequency threshold
    pub summary_due: bool,
}

/// Runtime-overridable settings accepted by `update_runtime_settings`
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeUpdate {
    pub hybrid: Option<bool>,
    pub chunking: Option<bool>,
    pub token_budget: Option<usize>,
    pub summary_frequency: Option<u32>,
}

/// The long-term memory engine
pub struct MemoryEngine {
    config: EngineConfig,
    storage: Storage,
    ops: Arc<OpsCounters>,
    embeddings: Arc<EmbeddingClient>,
    vector: Arc<VectorIndex>,
    retriever: Retriever,
    flags: Arc<RwLock<RuntimeFlags>>,
}

impl MemoryEngine {
    /// Open (or create) the database at the configured path and wire up
    /// all handles. Runtime preference overrides are applied here.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let storage = Storage::open(&config.db_path)?;
        Self::with_storage(config, storage)
    }

    /// Same as `new`, with an externally opened storage handle (used by
    /// tests running on in-memory databases).
    pub fn with_storage(config: EngineConfig, storage: Storage) -> Result<Self> {
        let ops = Arc::new(OpsCounters::new());
        let embeddings = Arc::new(EmbeddingClient::new(&config, ops.clone()));
        let vector = Arc::new(VectorIndex::new(&config));

        let mut flags = config.flags;
        storage.with_connection(|conn| {
            if let Some(hybrid) = get_bool_preference(conn, PREF_HYBRID)? {
                flags.hybrid = hybrid;
            }
            if let Some(chunking) = get_bool_preference(conn, PREF_CHUNKING)? {
                flags.chunking = chunking;
            }
            if let Some(budget) = get_number_preference(conn, PREF_TOKEN_BUDGET)? {
                flags.token_budget = budget.max(0.0) as usize;
            }
            if let Some(frequency) = get_number_preference(conn, PREF_SUMMARY_FREQUENCY)? {
                flags.summary_frequency = frequency.max(0.0) as u32;
            }
            Ok(())
        })?;
        let flags = Arc::new(RwLock::new(flags.clamped()));

        let retriever = Retriever::new(
            storage.clone(),
            embeddings.clone(),
            vector.clone(),
            ops.clone(),
            flags.clone(),
            config.rerank,
            config.query_log_enabled,
            config.query_log_sample_rate,
        );

        Ok(Self {
            config,
            storage,
            ops,
            embeddings,
            vector,
            retriever,
            flags,
        })
    }

    pub fn ops(&self) -> &OpsCounters {
        &self.ops
    }

    pub fn embedding_cache_stats(&self) -> CacheStats {
        self.embeddings.cache_stats()
    }

    pub async fn embedding_available(&self) -> bool {
        self.embeddings.is_available().await
    }

    pub fn runtime_flags(&self) -> RuntimeFlags {
        *self.flags.read()
    }

    /// Reconcile the vector collection with the configured identity
    /// (collection name, embedding model, dimension). A mismatch against
    /// the persisted triple recreates the collection; this is the only
    /// rebuild trigger.
    pub async fn ensure_vector_collection(&self) -> Result<()> {
        let dimension = self.embeddings.dimension().await?;
        let expected = json!({
            "collection": self.config.collection_name,
            "model": self.config.embedding_model,
            "dimensions": dimension,
        });

        let persisted = self
            .storage
            .with_connection(|conn| get_preference(conn, VECTOR_META_KEY))?
            .and_then(|v| v.as_json().cloned());

        if persisted.as_ref() != Some(&expected) {
            if persisted.is_some() {
                tracing::warn!(
                    collection = %self.config.collection_name,
                    "vector collection identity changed, recreating (destructive)"
                );
                self.vector.delete_collection().await?;
            }
            self.vector.ensure_collection().await?;
            self.storage.with_connection(|conn| {
                set_preference(conn, VECTOR_META_KEY, &PreferenceValue::Json(expected))
            })?;
        } else {
            self.vector.ensure_collection().await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub fn create_conversation(
        &self,
        title: &str,
        model: Option<&str>,
        tags: Option<Vec<String>>,
    ) -> Result<Conversation> {
        self.storage.with_connection(|conn| {
            queries::create_conversation(conn, title, model, &tags.unwrap_or_default())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.storage
            .with_connection(|conn| queries::get_conversation(conn, id))
    }

    pub fn list_conversations(&self, limit: Option<i64>) -> Result<Vec<Conversation>> {
        self.storage
            .with_connection(|conn| queries::list_conversations(conn, limit))
    }

    /// Delete a conversation. SQL cascades cover messages, chunks,
    /// summaries, embedding bookkeeping and metrics; the vector records are
    /// cleaned up best-effort afterwards.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let deleted = self
            .storage
            .with_connection(|conn| queries::delete_conversation(conn, id))?;
        if !deleted {
            return Ok(false);
        }

        if let Err(err) = self
            .vector
            .delete_by_where(&WhereFilter::eq("conversation_id", id))
            .await
        {
            tracing::warn!(error = %err, conversation_id = id, "vector cleanup after delete failed");
            self.ops.record_failure(
                OpsCategory::Storage,
                "engine.delete_conversation",
                err.to_string(),
            );
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Persist a message, mirror it into the lexical index (via triggers),
    /// chunk it when enabled, and upsert embeddings into the vector index.
    /// Chunks commit atomically before any vector work; a vector or
    /// embedding failure records `embedding_status = failed` and then
    /// propagates, leaving the message readable.
    pub async fn save_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        options: Option<SaveMessageOptions>,
    ) -> Result<SavedMessage> {
        if content.trim().is_empty() {
            return Err(RecallError::invalid("engine", "message content is empty"));
        }

        let flags = self.runtime_flags();
        let options = options.unwrap_or_default();
        let identifiers: Vec<String> = {
            let mut ids: Vec<String> = extract_code_identifiers(content).into_iter().collect();
            ids.sort();
            ids
        };

        let message = queries::new_message(conversation_id, role, content, &options, identifiers);
        let drafts = if flags.chunking && role.is_fts_indexed() {
            chunk_message(content, crate::chunker::DEFAULT_CHUNK_BUDGET)
        } else {
            vec![]
        };
        let chunk_rows = drafts_to_rows(&message, &drafts);

        let added_tokens = options.tokens_used.unwrap_or(token_estimate(content) as i64);
        let indexed = role.is_fts_indexed();

        // One transaction: message + chunk set + pending bookkeeping
        self.storage.with_transaction(|conn| {
            queries::insert_message(conn, &message)?;
            queries::touch_conversation(conn, conversation_id, added_tokens)?;
            if !chunk_rows.is_empty() {
                chunks::replace_message_chunks(conn, &message.id, &chunk_rows)?;
            }
            if indexed {
                summaries::record_embedding_pending(conn, &message.id, conversation_id)?;
            }
            Ok(())
        })?;

        // Best-effort vector upserts after the commit
        if indexed {
            if let Err(err) = self.index_message(&message, &chunk_rows).await {
                self.storage.with_connection(|conn| {
                    summaries::mark_embedding_outcome(
                        conn,
                        &message.id,
                        EmbeddingStatus::Failed,
                        None,
                        Some(&err.to_string()),
                    )
                })?;
                self.ops.record_failure(
                    OpsCategory::Storage,
                    "engine.save_message",
                    err.to_string(),
                );
                return Err(err);
            }
            self.storage.with_connection(|conn| {
                summaries::mark_embedding_outcome(
                    conn,
                    &message.id,
                    EmbeddingStatus::Success,
                    Some(&message.id),
                    None,
                )
            })?;
        }

        // Summary scheduling on every N-th assistant message
        let mut summary_due = false;
        if role == Role::Assistant {
            let assistant_count = self.storage.with_connection(|conn| {
                queries::count_messages(conn, conversation_id, Some(Role::Assistant))
            })?;
            if summary::summary_due(assistant_count, flags.summary_frequency) {
                self.storage
                    .with_connection(|conn| {
                        summary::queue(
                            conn,
                            conversation_id,
                            Some(&json!({ "assistant_messages": assistant_count })),
                        )
                    })?;
                summary_due = true;
            }
        }

        Ok(SavedMessage {
            message,
            chunks: chunk_rows,
            summary_due,
        })
    }

    /// Embed the message and its chunks (one batch) and upsert them into
    /// the vector collection with typed metadata.
    async fn index_message(&self, message: &Message, chunk_rows: &[MessageChunk]) -> Result<()> {
        let mut ids = vec![message.id.clone()];
        let mut documents = vec![message.content.clone()];
        let mut metadatas = vec![VectorMetadata::Message {
            conversation_id: message.conversation_id.clone(),
            role: message.role,
            created_at: message.created_at,
        }];

        for chunk in chunk_rows {
            ids.push(chunk.id.clone());
            documents.push(chunk.content.clone());
            metadatas.push(VectorMetadata::Chunk {
                conversation_id: chunk.conversation_id.clone(),
                role: message.role,
                created_at: chunk.created_at,
                parent_message_id: chunk.parent_message_id.clone(),
                chunk_index: chunk.chunk_index,
                chunk_kind: chunk.chunk_kind,
                chunk_language: chunk.language.clone(),
                token_estimate: chunk.token_estimate,
            });
        }

        let texts: Vec<&str> = documents.iter().map(String::as_str).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;
        let embeddings: Vec<Vec<f32>> = vectors.iter().map(|v| v.to_vec()).collect();

        self.vector
            .add(&ids, &embeddings, &documents, &metadatas)
            .await
    }

    /// Chunk historical user/assistant messages that predate chunking.
    /// Honors the `backfill_chunks` flag; returns how many messages were
    /// processed.
    pub async fn backfill_message_chunks(&self, limit: i64) -> Result<usize> {
        let flags = self.runtime_flags();
        if !flags.backfill_chunks || !flags.chunking {
            return Ok(0);
        }

        let pending = self
            .storage
            .with_connection(|conn| chunks::messages_without_chunks(conn, limit))?;

        let mut processed = 0;
        for message in pending {
            let drafts = chunk_message(&message.content, crate::chunker::DEFAULT_CHUNK_BUDGET);
            if drafts.is_empty() {
                continue;
            }
            let chunk_rows = drafts_to_rows(&message, &drafts);
            self.storage.with_transaction(|conn| {
                chunks::replace_message_chunks(conn, &message.id, &chunk_rows)
            })?;

            if let Err(err) = self.index_message(&message, &chunk_rows).await {
                tracing::warn!(error = %err, message_id = %message.id, "backfill indexing failed");
                self.storage.with_connection(|conn| {
                    summaries::mark_embedding_outcome(
                        conn,
                        &message.id,
                        EmbeddingStatus::Failed,
                        None,
                        Some(&err.to_string()),
                    )
                })?;
            }
            processed += 1;
        }
        Ok(processed)
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.storage
            .with_connection(|conn| queries::get_message(conn, id))
    }

    pub fn get_conversation_messages(
        &self,
        conversation_id: &str,
        order: Option<MessageOrder>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>> {
        self.storage.with_connection(|conn| {
            queries::get_conversation_messages(
                conn,
                conversation_id,
                order.unwrap_or_default(),
                limit,
            )
        })
    }

    /// Hybrid retrieval; non-throwing, empty on any failure.
    pub async fn retrieve_similar_messages(
        &self,
        query: &str,
        top_k: Option<usize>,
        conversation_id: Option<&str>,
        include_profile: bool,
    ) -> Vec<RetrievedItem> {
        self.retriever
            .retrieve(query, top_k.unwrap_or(5), conversation_id, include_profile)
            .await
    }

    /// Token-budgeted memory block for prompt assembly
    pub fn build_memory_context_block(
        &self,
        results: &[RetrievedItem],
        query: Option<&str>,
    ) -> String {
        let flags = self.runtime_flags();
        assemble_context(results, query, flags.token_budget, flags.chunking)
    }

    /// Retrieve and assemble in one call.
    pub async fn augment_with_memory(
        &self,
        query: &str,
        top_k: usize,
        conversation_id: Option<&str>,
        include_profile: bool,
    ) -> AugmentedPrompt {
        let retrieved = self
            .retriever
            .retrieve(query, top_k, conversation_id, include_profile)
            .await;
        let enhanced_system_prompt = self.build_memory_context_block(&retrieved, Some(query));
        AugmentedPrompt {
            retrieved,
            enhanced_system_prompt,
        }
    }

    // ------------------------------------------------------------------
    // Summaries and profile
    // ------------------------------------------------------------------

    /// Write the summary row and its vector record (`summary_<id>`),
    /// keeping `conversations.summary` and the embedding status in sync.
    pub async fn upsert_conversation_summary_embedding(
        &self,
        conversation_id: &str,
        summary: &str,
    ) -> Result<()> {
        if summary.trim().is_empty() {
            return Err(RecallError::invalid("engine", "summary text is empty"));
        }

        self.storage.with_transaction(|conn| {
            summaries::upsert_summary(conn, conversation_id, summary)?;
            queries::set_conversation_summary(conn, conversation_id, summary)
        })?;

        let vector_id = format!("summary_{}", conversation_id);
        let outcome = self
            .index_single(
                &vector_id,
                summary,
                VectorMetadata::Summary {
                    conversation_id: conversation_id.to_string(),
                    created_at: chrono::Utc::now(),
                },
            )
            .await;

        match outcome {
            Ok(()) => {
                self.storage.with_connection(|conn| {
                    summaries::set_summary_embedding_status(
                        conn,
                        conversation_id,
                        EmbeddingStatus::Success,
                        None,
                    )
                })?;
                self.ops.record_success(OpsCategory::Summary);
                Ok(())
            }
            Err(err) => {
                self.storage.with_connection(|conn| {
                    summaries::set_summary_embedding_status(
                        conn,
                        conversation_id,
                        EmbeddingStatus::Failed,
                        Some(&err.to_string()),
                    )
                })?;
                self.ops.record_failure(
                    OpsCategory::Summary,
                    "engine.upsert_summary_embedding",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Write the profile row and its vector record. Consent gates reads,
    /// not this explicit write.
    pub async fn upsert_user_profile_embedding(&self, profile: &str) -> Result<()> {
        if profile.trim().is_empty() {
            return Err(RecallError::invalid("engine", "profile text is empty"));
        }

        self.storage
            .with_connection(|conn| summaries::upsert_profile(conn, profile))?;

        let outcome = self
            .index_single(
                PROFILE_VECTOR_ID,
                profile,
                VectorMetadata::Profile {
                    created_at: chrono::Utc::now(),
                },
            )
            .await;

        match outcome {
            Ok(()) => {
                self.storage.with_connection(|conn| {
                    summaries::set_profile_embedding_status(conn, EmbeddingStatus::Success, None)
                })?;
                self.ops.record_success(OpsCategory::Profile);
                Ok(())
            }
            Err(err) => {
                self.storage.with_connection(|conn| {
                    summaries::set_profile_embedding_status(
                        conn,
                        EmbeddingStatus::Failed,
                        Some(&err.to_string()),
                    )
                })?;
                self.ops.record_failure(
                    OpsCategory::Profile,
                    "engine.upsert_profile_embedding",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    pub async fn delete_user_profile_embedding(&self) -> Result<bool> {
        let existed = self
            .storage
            .with_connection(summaries::delete_profile)?;
        self.vector
            .delete_ids(&[PROFILE_VECTOR_ID.to_string()])
            .await?;
        Ok(existed)
    }

    async fn index_single(
        &self,
        id: &str,
        text: &str,
        metadata: VectorMetadata,
    ) -> Result<()> {
        let vector = self.embeddings.embed(text).await?;
        self.vector
            .add(
                &[id.to_string()],
                &[vector.to_vec()],
                &[text.to_string()],
                &[metadata],
            )
            .await
    }

    pub fn set_profile_consent(&self, granted: bool) -> Result<()> {
        self.storage.with_connection(|conn| {
            set_preference(conn, PROFILE_CONSENT_KEY, &PreferenceValue::Boolean(granted))
        })
    }

    pub fn is_profile_consent_granted(&self) -> Result<bool> {
        self.storage.with_connection(|conn| {
            Ok(get_bool_preference(conn, PROFILE_CONSENT_KEY)?.unwrap_or(false))
        })
    }

    // ------------------------------------------------------------------
    // Summary lifecycle hooks (driven by the external summarizer)
    // ------------------------------------------------------------------

    pub fn begin_summary_run(&self, conversation_id: &str) -> Result<i64> {
        self.storage
            .with_connection(|conn| summary::begin_run(conn, conversation_id))
    }

    pub fn complete_summary_run(
        &self,
        conversation_id: &str,
        attempt: i64,
        outcome: &RunOutcome,
    ) -> Result<()> {
        self.storage
            .with_connection(|conn| summary::complete_run(conn, conversation_id, attempt, outcome))
    }

    pub fn skip_summary_no_consent(&self, conversation_id: &str) -> Result<()> {
        self.storage.with_connection(|conn| {
            let attempt = summary::begin_run(conn, conversation_id)?;
            summary::complete_run(conn, conversation_id, attempt, &RunOutcome::SkippedNoConsent)
        })
    }

    pub fn summary_health_snapshot(
        &self,
        conversation_id: Option<&str>,
        window_hours: Option<i64>,
    ) -> Result<summary::HealthSnapshot> {
        self.storage
            .with_connection(|conn| summary::snapshot(conn, conversation_id, window_hours))
    }

    // ------------------------------------------------------------------
    // Stats, metrics, runtime settings
    // ------------------------------------------------------------------

    pub fn get_stats(&self) -> Result<MemoryStats> {
        self.storage.with_connection(queries::get_stats)
    }

    /// Drop retrieval metrics older than the retention window.
    pub fn cleanup_retrieval_metrics(&self) -> Result<usize> {
        self.storage.with_connection(|conn| {
            metrics::cleanup_metrics(conn, self.config.metrics_retention_days)
        })
    }

    /// Persist and apply runtime overrides for the flag subset.
    pub fn update_runtime_settings(&self, update: RuntimeUpdate) -> Result<RuntimeFlags> {
        let mut flags = self.runtime_flags();
        self.storage.with_connection(|conn| {
            if let Some(hybrid) = update.hybrid {
                flags.hybrid = hybrid;
                set_preference(conn, PREF_HYBRID, &PreferenceValue::Boolean(hybrid))?;
            }
            if let Some(chunking) = update.chunking {
                flags.chunking = chunking;
                set_preference(conn, PREF_CHUNKING, &PreferenceValue::Boolean(chunking))?;
            }
            if let Some(budget) = update.token_budget {
                flags.token_budget = budget;
                set_preference(conn, PREF_TOKEN_BUDGET, &PreferenceValue::Number(budget as f64))?;
            }
            if let Some(frequency) = update.summary_frequency {
                flags.summary_frequency = frequency;
                set_preference(
                    conn,
                    PREF_SUMMARY_FREQUENCY,
                    &PreferenceValue::Number(frequency as f64),
                )?;
            }
            Ok(())
        })?;

        let clamped = flags.clamped();
        *self.flags.write() = clamped;
        Ok(clamped)
    }
}

/// Vector id of the singleton profile record
pub const PROFILE_VECTOR_ID: &str = "user_profile_default";

fn drafts_to_rows(message: &Message, drafts: &[ChunkDraft]) -> Vec<MessageChunk> {
    drafts
        .iter()
        .map(|draft| MessageChunk {
            id: MessageChunk::derived_id(&message.id, draft.index as i64),
            parent_message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            chunk_index: draft.index as i64,
            chunk_kind: draft.kind,
            content: draft.content.clone(),
            language: draft.language.clone(),
            token_estimate: draft.token_estimate as i64,
            created_at: message.created_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkKind;

    fn engine() -> MemoryEngine {
        let config = EngineConfig {
            db_path: ":memory:".into(),
            ..Default::default()
        };
        let storage = Storage::open_in_memory().unwrap();
        MemoryEngine::with_storage(config, storage).unwrap()
    }

    #[test]
    fn test_consent_round_trip() {
        let engine = engine();
        assert!(!engine.is_profile_consent_granted().unwrap());
        engine.set_profile_consent(true).unwrap();
        assert!(engine.is_profile_consent_granted().unwrap());
        engine.set_profile_consent(false).unwrap();
        assert!(!engine.is_profile_consent_granted().unwrap());
    }

    #[test]
    fn test_runtime_settings_persist_and_clamp() {
        let engine = engine();
        let flags = engine
            .update_runtime_settings(RuntimeUpdate {
                hybrid: Some(false),
                token_budget: Some(9999),
                ..Default::default()
            })
            .unwrap();
        assert!(!flags.hybrid);
        // Out-of-range budgets clamp instead of crashing
        assert_eq!(flags.token_budget, 5000);
        assert_eq!(engine.runtime_flags().token_budget, 5000);
    }

    #[test]
    fn test_runtime_settings_applied_at_startup() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                set_preference(conn, PREF_HYBRID, &PreferenceValue::Boolean(false))?;
                set_preference(conn, PREF_TOKEN_BUDGET, &PreferenceValue::Number(500.0))
            })
            .unwrap();

        let config = EngineConfig {
            db_path: ":memory:".into(),
            ..Default::default()
        };
        let engine = MemoryEngine::with_storage(config, storage).unwrap();
        let flags = engine.runtime_flags();
        assert!(!flags.hybrid);
        assert_eq!(flags.token_budget, 500);
    }

    #[test]
    fn test_drafts_to_rows_derives_ids() {
        let message = queries::new_message(
            "c1",
            Role::Assistant,
            "text",
            &SaveMessageOptions::default(),
            vec![],
        );
        let drafts = chunk_message("alpha\n\n```rust\nfn x() {}\n```", 320);
        let rows = drafts_to_rows(&message, &drafts);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, format!("{}_chunk_0", message.id));
        assert_eq!(rows[1].chunk_kind, ChunkKind::Code);
        assert_eq!(rows[1].chunk_index, 1);
    }
}
