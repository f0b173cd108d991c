//! Summary, profile, and embedding-status bookkeeping.
//!
//! Writing a summary or profile resets its `embedding_status` to pending
//! and clears any previous error, so retries stay deterministic.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::queries::parse_ts;
use crate::error::Result;
use crate::types::{
    content_hash, ConversationSummary, EmbeddingMetadata, EmbeddingStatus, UserProfile,
};

/// Fixed id of the singleton profile row
pub const PROFILE_ID: &str = "default";

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationSummary> {
    let status: String = row.get("embedding_status")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(ConversationSummary {
        conversation_id: row.get("conversation_id")?,
        summary: row.get("summary")?,
        updated_at: parse_ts(&updated_at),
        content_hash: row.get("content_hash")?,
        embedding_status: status.parse().unwrap_or_default(),
        error_message: row.get("error_message")?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    let status: String = row.get("embedding_status")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(UserProfile {
        id: row.get("id")?,
        profile: row.get("profile")?,
        updated_at: parse_ts(&updated_at),
        embedding_status: status.parse().unwrap_or_default(),
        error_message: row.get("error_message")?,
    })
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<EmbeddingMetadata> {
    let status: String = row.get("embedding_status")?;
    let created_at: String = row.get("created_at")?;
    Ok(EmbeddingMetadata {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        conversation_id: row.get("conversation_id")?,
        chroma_id: row.get("chroma_id")?,
        created_at: parse_ts(&created_at),
        embedding_status: status.parse().unwrap_or_default(),
        error_message: row.get("error_message")?,
    })
}

/// Upsert the summary text; status resets to pending and the error clears.
pub fn upsert_summary(conn: &Connection, conversation_id: &str, summary: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_summaries
             (conversation_id, summary, updated_at, content_hash, embedding_status, error_message)
         VALUES (?1, ?2, ?3, ?4, 'pending', NULL)
         ON CONFLICT(conversation_id) DO UPDATE SET
             summary = excluded.summary,
             updated_at = excluded.updated_at,
             content_hash = excluded.content_hash,
             embedding_status = 'pending',
             error_message = NULL",
        params![
            conversation_id,
            summary,
            Utc::now().to_rfc3339(),
            content_hash(summary),
        ],
    )?;
    Ok(())
}

pub fn get_summary(conn: &Connection, conversation_id: &str) -> Result<Option<ConversationSummary>> {
    let row = conn
        .query_row(
            "SELECT conversation_id, summary, updated_at, content_hash, embedding_status, error_message
             FROM conversation_summaries WHERE conversation_id = ?1",
            params![conversation_id],
            summary_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn set_summary_embedding_status(
    conn: &Connection,
    conversation_id: &str,
    status: EmbeddingStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE conversation_summaries
         SET embedding_status = ?1, error_message = ?2, updated_at = ?3
         WHERE conversation_id = ?4",
        params![
            status.as_str(),
            error,
            Utc::now().to_rfc3339(),
            conversation_id
        ],
    )?;
    Ok(())
}

/// Upsert the singleton profile row; status resets to pending.
pub fn upsert_profile(conn: &Connection, profile: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO user_profile (id, profile, updated_at, embedding_status, error_message)
         VALUES (?1, ?2, ?3, 'pending', NULL)
         ON CONFLICT(id) DO UPDATE SET
             profile = excluded.profile,
             updated_at = excluded.updated_at,
             embedding_status = 'pending',
             error_message = NULL",
        params![PROFILE_ID, profile, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn get_profile(conn: &Connection) -> Result<Option<UserProfile>> {
    let row = conn
        .query_row(
            "SELECT id, profile, updated_at, embedding_status, error_message
             FROM user_profile WHERE id = ?1",
            params![PROFILE_ID],
            profile_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn set_profile_embedding_status(
    conn: &Connection,
    status: EmbeddingStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE user_profile SET embedding_status = ?1, error_message = ?2, updated_at = ?3
         WHERE id = ?4",
        params![status.as_str(), error, Utc::now().to_rfc3339(), PROFILE_ID],
    )?;
    Ok(())
}

pub fn delete_profile(conn: &Connection) -> Result<bool> {
    let changed = conn.execute("DELETE FROM user_profile WHERE id = ?1", params![PROFILE_ID])?;
    Ok(changed > 0)
}

/// Record that a message's embedding work has started. One bookkeeping row
/// per message; re-saving resets it to pending.
pub fn record_embedding_pending(
    conn: &Connection,
    message_id: &str,
    conversation_id: &str,
) -> Result<EmbeddingMetadata> {
    conn.execute(
        "DELETE FROM embedding_metadata WHERE message_id = ?1",
        params![message_id],
    )?;

    let metadata = EmbeddingMetadata {
        id: Uuid::new_v4().to_string(),
        message_id: message_id.to_string(),
        conversation_id: conversation_id.to_string(),
        chroma_id: None,
        created_at: Utc::now(),
        embedding_status: EmbeddingStatus::Pending,
        error_message: None,
    };

    conn.execute(
        "INSERT INTO embedding_metadata
             (id, message_id, conversation_id, chroma_id, created_at, embedding_status, error_message)
         VALUES (?1, ?2, ?3, NULL, ?4, 'pending', NULL)",
        params![
            metadata.id,
            metadata.message_id,
            metadata.conversation_id,
            metadata.created_at.to_rfc3339(),
        ],
    )?;

    Ok(metadata)
}

/// Record the embedding outcome for a message
pub fn mark_embedding_outcome(
    conn: &Connection,
    message_id: &str,
    status: EmbeddingStatus,
    chroma_id: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE embedding_metadata
         SET embedding_status = ?1, chroma_id = ?2, error_message = ?3
         WHERE message_id = ?4",
        params![status.as_str(), chroma_id, error, message_id],
    )?;
    Ok(())
}

pub fn get_embedding_metadata(
    conn: &Connection,
    message_id: &str,
) -> Result<Option<EmbeddingMetadata>> {
    let row = conn
        .query_row(
            "SELECT id, message_id, conversation_id, chroma_id, created_at, embedding_status, error_message
             FROM embedding_metadata WHERE message_id = ?1",
            params![message_id],
            metadata_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Whether the conversation has at least one successfully indexed message.
/// Drives the retriever's conversation-scope pre-check.
pub fn has_indexed_messages(conn: &Connection, conversation_id: &str) -> Result<bool> {
    let present: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM embedding_metadata
         WHERE conversation_id = ?1 AND embedding_status = 'success'",
        params![conversation_id],
        |row| row.get(0),
    )?;
    Ok(present)
}
