//! Message chunk rows.
//!
//! Chunks for a message form a contiguous 0-based sequence; replacement is
//! delete-then-insert so observers see either the full new set or the
//! previous one. Callers run `replace_message_chunks` inside
//! `Storage::with_transaction`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::queries::parse_ts;
use crate::error::{RecallError, Result};
use crate::types::{ChunkKind, MessageChunk, Role};

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<MessageChunk> {
    let kind: String = row.get("chunk_kind")?;
    let created_at: String = row.get("created_at")?;
    Ok(MessageChunk {
        id: row.get("id")?,
        parent_message_id: row.get("parent_message_id")?,
        conversation_id: row.get("conversation_id")?,
        chunk_index: row.get("chunk_index")?,
        chunk_kind: kind.parse().unwrap_or_default(),
        content: row.get("content")?,
        language: row.get("language")?,
        token_estimate: row.get("token_estimate")?,
        created_at: parse_ts(&created_at),
    })
}

/// Replace a message's chunk set. The rows must already carry derived ids
/// and a gap-free 0-based index sequence.
pub fn replace_message_chunks(
    conn: &Connection,
    message_id: &str,
    chunks: &[MessageChunk],
) -> Result<()> {
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_index != expected as i64 {
            return Err(RecallError::invalid(
                "storage",
                format!(
                    "chunk indices for {} must be gap-free, got {} at position {}",
                    message_id, chunk.chunk_index, expected
                ),
            ));
        }
    }

    conn.execute(
        "DELETE FROM message_chunks WHERE parent_message_id = ?1",
        params![message_id],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO message_chunks (id, parent_message_id, conversation_id, chunk_index,
                                     chunk_kind, content, language, token_estimate, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for chunk in chunks {
        stmt.execute(params![
            chunk.id,
            chunk.parent_message_id,
            chunk.conversation_id,
            chunk.chunk_index,
            chunk.chunk_kind.as_str(),
            chunk.content,
            chunk.language,
            chunk.token_estimate,
            chunk.created_at.to_rfc3339(),
        ])?;
    }

    Ok(())
}

pub fn get_message_chunks(conn: &Connection, message_id: &str) -> Result<Vec<MessageChunk>> {
    let mut stmt = conn.prepare(
        "SELECT id, parent_message_id, conversation_id, chunk_index, chunk_kind,
                content, language, token_estimate, created_at
         FROM message_chunks WHERE parent_message_id = ?1 ORDER BY chunk_index ASC",
    )?;
    let rows = stmt.query_map(params![message_id], chunk_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_chunk(conn: &Connection, id: &str) -> Result<Option<MessageChunk>> {
    let row = conn
        .query_row(
            "SELECT id, parent_message_id, conversation_id, chunk_index, chunk_kind,
                    content, language, token_estimate, created_at
             FROM message_chunks WHERE id = ?1",
            params![id],
            chunk_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn count_chunks(conn: &Connection, conversation_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM message_chunks WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// User/assistant messages that have no chunks yet, oldest first. Feeds the
/// backfill pass.
pub fn messages_without_chunks(
    conn: &Connection,
    limit: i64,
) -> Result<Vec<crate::types::Message>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.role, m.content, m.created_at, m.tokens_used,
                m.tool_calls, m.tool_results, m.model_used, m.temperature, m.code_identifiers
         FROM messages m
         WHERE m.role IN (?1, ?2)
           AND NOT EXISTS (SELECT 1 FROM message_chunks c WHERE c.parent_message_id = m.id)
         ORDER BY m.created_at ASC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![Role::User.as_str(), Role::Assistant.as_str(), limit],
        super::queries::message_from_row,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
