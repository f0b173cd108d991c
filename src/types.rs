//! Core types for recall

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Message author role. Only `user` and `assistant` rows are indexed
/// for lexical search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Whether messages with this role are mirrored into the FTS index.
    pub fn is_fts_indexed(&self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a message chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[default]
    Prose,
    Code,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Prose => "prose",
            ChunkKind::Code => "code",
        }
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prose" => Ok(ChunkKind::Prose),
            "code" => Ok(ChunkKind::Code),
            _ => Err(format!("Unknown chunk kind: {}", s)),
        }
    }
}

/// Per-item embedding outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Success => "success",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EmbeddingStatus::Pending),
            "success" => Ok(EmbeddingStatus::Success),
            "failed" => Ok(EmbeddingStatus::Failed),
            _ => Err(format!("Unknown embedding status: {}", s)),
        }
    }
}

/// Summary lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    SkippedNoConsent,
}

impl SummaryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryState::Queued => "queued",
            SummaryState::Running => "running",
            SummaryState::Succeeded => "succeeded",
            SummaryState::Failed => "failed",
            SummaryState::SkippedNoConsent => "skipped_no_consent",
        }
    }

    /// Terminal states close out a `running` attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SummaryState::Succeeded | SummaryState::Failed | SummaryState::SkippedNoConsent
        )
    }
}

impl std::str::FromStr for SummaryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(SummaryState::Queued),
            "running" => Ok(SummaryState::Running),
            "succeeded" => Ok(SummaryState::Succeeded),
            "failed" => Ok(SummaryState::Failed),
            "skipped_no_consent" => Ok(SummaryState::SkippedNoConsent),
            _ => Err(format!("Unknown summary state: {}", s)),
        }
    }
}

/// Content type carried as vector metadata and on retrieval results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Message,
    MessageChunk,
    ConversationSummary,
    UserProfile,
    KnowledgeChunk,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Message => "message",
            ContentType::MessageChunk => "message_chunk",
            ContentType::ConversationSummary => "conversation_summary",
            ContentType::UserProfile => "user_profile",
            ContentType::KnowledgeChunk => "knowledge_chunk",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "message" => Ok(ContentType::Message),
            "message_chunk" => Ok(ContentType::MessageChunk),
            "conversation_summary" => Ok(ContentType::ConversationSummary),
            "user_profile" => Ok(ContentType::UserProfile),
            "knowledge_chunk" => Ok(ContentType::KnowledgeChunk),
            _ => Err(format!("Unknown content type: {}", s)),
        }
    }
}

/// A conversation in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub total_tokens: i64,
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub model: Option<String>,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub tokens_used: Option<i64>,
    pub tool_calls: Option<Value>,
    pub tool_results: Option<Value>,
    pub model_used: Option<String>,
    pub temperature: Option<f64>,
    /// Code identifiers extracted from the content at write time
    #[serde(default)]
    pub code_identifiers: Vec<String>,
}

/// Optional fields accepted by `save_message`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveMessageOptions {
    pub tokens_used: Option<i64>,
    pub tool_calls: Option<Value>,
    pub tool_results: Option<Value>,
    pub model_used: Option<String>,
    pub temperature: Option<f64>,
}

/// A prose or code span of a message, embedded and indexed independently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageChunk {
    /// Derived id: `<message_id>_chunk_<n>`
    pub id: String,
    pub parent_message_id: String,
    pub conversation_id: String,
    /// 0-based, gap-free within a message
    pub chunk_index: i64,
    pub chunk_kind: ChunkKind,
    pub content: String,
    /// Normalized lowercase language for code chunks
    pub language: Option<String>,
    pub token_estimate: i64,
    pub created_at: DateTime<Utc>,
}

impl MessageChunk {
    pub fn derived_id(message_id: &str, index: i64) -> String {
        format!("{}_chunk_{}", message_id, index)
    }
}

/// Per-conversation summary row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub embedding_status: EmbeddingStatus,
    pub error_message: Option<String>,
}

/// Singleton profile row (id "default"), only consulted under consent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub profile: String,
    pub updated_at: DateTime<Utc>,
    pub embedding_status: EmbeddingStatus,
    pub error_message: Option<String>,
}

/// Per-message embedding outcome, tracked independently of vector-index
/// presence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub chroma_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub embedding_status: EmbeddingStatus,
    pub error_message: Option<String>,
}

/// Per-conversation summary health counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryHealth {
    pub conversation_id: String,
    pub last_state: Option<SummaryState>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
    pub total_runs: i64,
    pub total_successes: i64,
    pub total_failures: i64,
    pub total_retries: i64,
    pub updated_at: DateTime<Utc>,
}

/// Append-only summary lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub id: i64,
    pub conversation_id: String,
    pub state: SummaryState,
    pub attempt: i64,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Result counts per retrieval source
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounts {
    pub conversation_dense: i64,
    pub global_dense: i64,
    pub summaries: i64,
    pub profile: i64,
    pub fts_lexical: i64,
}

/// Per-phase retrieval latencies in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseLatencies {
    pub total_ms: f64,
    pub dense_ms: f64,
    pub fts_ms: f64,
    pub rerank_ms: f64,
}

/// Feature-flag snapshot attached to each retrieval metric
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSnapshot {
    pub hybrid: bool,
    pub chunking: bool,
    pub token_budget: i64,
    pub summary_frequency: i64,
}

/// One row per retrieval query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalMetric {
    pub id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub sources: SourceCounts,
    pub latencies: PhaseLatencies,
    pub top_similarities: Vec<f32>,
    pub flags: FlagSnapshot,
}

/// The message slice of a retrieval result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A single retrieval result, in the common `[0, 1]` similarity space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub message: MessageRef,
    pub similarity_score: f32,
    pub content_type: ContentType,
    pub parent_message_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub chunk_kind: Option<ChunkKind>,
    pub chunk_language: Option<String>,
    pub token_estimate: Option<i64>,
    /// Raw BM25, kept for diagnostics (lower is better)
    pub fts_score: Option<f64>,
}

/// Retrieval output plus the assembled memory block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentedPrompt {
    pub retrieved: Vec<RetrievedItem>,
    pub enhanced_system_prompt: String,
}

/// Store-wide statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub conversations: i64,
    pub messages: i64,
    pub pending_embeddings: i64,
    pub total_tokens: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Typed metadata stored alongside each vector record.
///
/// The index itself carries a flat map; this sum keeps the shape honest on
/// our side. Unknown `content_type` values decode as `Message`.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorMetadata {
    Message {
        conversation_id: String,
        role: Role,
        created_at: DateTime<Utc>,
    },
    Chunk {
        conversation_id: String,
        role: Role,
        created_at: DateTime<Utc>,
        parent_message_id: String,
        chunk_index: i64,
        chunk_kind: ChunkKind,
        chunk_language: Option<String>,
        token_estimate: i64,
    },
    Summary {
        conversation_id: String,
        created_at: DateTime<Utc>,
    },
    Profile {
        created_at: DateTime<Utc>,
    },
}

impl VectorMetadata {
    pub fn content_type(&self) -> ContentType {
        match self {
            VectorMetadata::Message { .. } => ContentType::Message,
            VectorMetadata::Chunk { .. } => ContentType::MessageChunk,
            VectorMetadata::Summary { .. } => ContentType::ConversationSummary,
            VectorMetadata::Profile { .. } => ContentType::UserProfile,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            VectorMetadata::Message {
                conversation_id, ..
            }
            | VectorMetadata::Chunk {
                conversation_id, ..
            }
            | VectorMetadata::Summary {
                conversation_id, ..
            } => Some(conversation_id),
            VectorMetadata::Profile { .. } => None,
        }
    }

    /// Flatten to the map shape the vector index stores.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "content_type".into(),
            Value::String(self.content_type().as_str().into()),
        );
        match self {
            VectorMetadata::Message {
                conversation_id,
                role,
                created_at,
            } => {
                map.insert("conversation_id".into(), conversation_id.clone().into());
                map.insert("role".into(), role.as_str().into());
                map.insert("created_at".into(), created_at.to_rfc3339().into());
            }
            VectorMetadata::Chunk {
                conversation_id,
                role,
                created_at,
                parent_message_id,
                chunk_index,
                chunk_kind,
                chunk_language,
                token_estimate,
            } => {
                map.insert("conversation_id".into(), conversation_id.clone().into());
                map.insert("role".into(), role.as_str().into());
                map.insert("created_at".into(), created_at.to_rfc3339().into());
                map.insert("parent_message_id".into(), parent_message_id.clone().into());
                map.insert("chunk_index".into(), (*chunk_index).into());
                map.insert("chunk_kind".into(), chunk_kind.as_str().into());
                if let Some(lang) = chunk_language {
                    map.insert("chunk_language".into(), lang.clone().into());
                }
                map.insert("token_estimate".into(), (*token_estimate).into());
            }
            VectorMetadata::Summary {
                conversation_id,
                created_at,
            } => {
                map.insert("conversation_id".into(), conversation_id.clone().into());
                map.insert("created_at".into(), created_at.to_rfc3339().into());
            }
            VectorMetadata::Profile { created_at } => {
                map.insert("created_at".into(), created_at.to_rfc3339().into());
            }
        }
        map
    }

    /// Decode from the index's flat map. Unknown variants degrade to
    /// `Message` so stale records stay retrievable.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let str_field = |key: &str| map.get(key).and_then(|v| v.as_str()).unwrap_or_default();
        let conversation_id = str_field("conversation_id").to_string();
        let role = str_field("role").parse().unwrap_or(Role::User);
        let created_at = chrono::DateTime::parse_from_rfc3339(str_field("created_at"))
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        match str_field("content_type").parse().unwrap_or_default() {
            ContentType::MessageChunk => VectorMetadata::Chunk {
                conversation_id,
                role,
                created_at,
                parent_message_id: str_field("parent_message_id").to_string(),
                chunk_index: map
                    .get("chunk_index")
                    .and_then(|v| v.as_i64())
                    .unwrap_or_default(),
                chunk_kind: str_field("chunk_kind").parse().unwrap_or_default(),
                chunk_language: map
                    .get("chunk_language")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                token_estimate: map
                    .get("token_estimate")
                    .and_then(|v| v.as_i64())
                    .unwrap_or_default(),
            },
            ContentType::ConversationSummary => VectorMetadata::Summary {
                conversation_id,
                created_at,
            },
            ContentType::UserProfile => VectorMetadata::Profile { created_at },
            ContentType::Message | ContentType::KnowledgeChunk => VectorMetadata::Message {
                conversation_id,
                role,
                created_at,
            },
        }
    }
}

/// SHA-256 content hash used for cache keys and summary change detection
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
