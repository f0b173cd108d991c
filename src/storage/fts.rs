//! Lexical full-text search over the FTS5 mirrors.
//!
//! Queries are rewritten into an OR of quoted alphanumeric terms, so user
//! input can never inject FTS5 operators. Raw BM25 is kept for diagnostics;
//! a normalized `1 / (1 + |bm25|)` score puts lexical hits in the same
//! `[0, 1]` space the dense path uses.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::queries::parse_ts;
use crate::error::Result;
use crate::types::{ChunkKind, ContentType, Role};

/// One lexical hit (a message or a chunk row)
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub content_type: ContentType,
    pub parent_message_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub chunk_kind: Option<ChunkKind>,
    pub chunk_language: Option<String>,
    pub token_estimate: Option<i64>,
    /// BM25 magnitude (FTS5 reports BM25 negated; the sign is dropped
    /// after ordering). Always positive for a match.
    pub bm25: f64,
    /// Normalized similarity in `[0, 1]`
    pub similarity: f32,
}

/// Normalize a raw BM25 rank into `(0, 1]`.
///
/// FTS5 reports BM25 negated (more negative = better); the magnitude feeds
/// `1 / (1 + bm25)`, and a zero-or-better rank maps to 1.
pub fn normalize_bm25(raw: f64) -> f32 {
    let magnitude = raw.abs();
    if magnitude <= f64::EPSILON {
        1.0
    } else {
        (1.0 / (1.0 + magnitude)) as f32
    }
}

/// Build a safe FTS5 match expression: underscores become spaces, terms are
/// alphanumeric runs of length >= 2, deduplicated, quoted, OR-joined.
/// Returns `None` when no usable term remains.
pub fn build_fts_query(query: &str) -> Option<String> {
    let lowered = query.replace('_', " ").to_lowercase();
    let mut terms: Vec<String> = Vec::new();

    for term in lowered.split(|c: char| !c.is_alphanumeric()) {
        if term.chars().count() < 2 {
            continue;
        }
        if !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }

    if terms.is_empty() {
        return None;
    }

    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Search messages (and, when enabled, chunks) lexically. Results are
/// ordered by ascending BM25 and truncated to `limit`.
pub fn fts_search(
    conn: &Connection,
    query: &str,
    conversation_id: Option<&str>,
    limit: i64,
    include_chunks: bool,
) -> Result<Vec<FtsHit>> {
    let match_expr = match build_fts_query(query) {
        Some(expr) => expr,
        None => return Ok(vec![]),
    };

    let mut hits = search_messages(conn, &match_expr, conversation_id, limit)?;
    if include_chunks {
        hits.extend(search_chunks(conn, &match_expr, conversation_id, limit)?);
    }

    // Raw BM25 ascending = best match first
    hits.sort_by(|a, b| {
        a.bm25
            .partial_cmp(&b.bm25)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit as usize);

    for hit in &mut hits {
        hit.bm25 = hit.bm25.abs();
    }

    Ok(hits)
}

fn search_messages(
    conn: &Connection,
    match_expr: &str,
    conversation_id: Option<&str>,
    limit: i64,
) -> Result<Vec<FtsHit>> {
    let mut sql = String::from(
        "SELECT m.id, m.conversation_id, m.role, m.content, m.created_at,
                bm25(messages_fts) AS score
         FROM messages_fts f
         JOIN messages m ON m.id = f.message_id
         WHERE messages_fts MATCH ?",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_expr.to_string())];

    if let Some(conversation_id) = conversation_id {
        sql.push_str(" AND f.conversation_id = ?");
        params_vec.push(Box::new(conversation_id.to_string()));
    }
    sql.push_str(" ORDER BY score ASC LIMIT ?");
    params_vec.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let role: String = row.get("role")?;
        let created_at: String = row.get("created_at")?;
        let score: f64 = row.get("score")?;
        Ok(FtsHit {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            role: role.parse().unwrap_or(Role::User),
            content: row.get("content")?,
            created_at: parse_ts(&created_at),
            content_type: ContentType::Message,
            parent_message_id: None,
            chunk_index: None,
            chunk_kind: None,
            chunk_language: None,
            token_estimate: None,
            bm25: score,
            similarity: normalize_bm25(score),
        })
    })?;

    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn search_chunks(
    conn: &Connection,
    match_expr: &str,
    conversation_id: Option<&str>,
    limit: i64,
) -> Result<Vec<FtsHit>> {
    let mut sql = String::from(
        "SELECT c.id, c.conversation_id, m.role, c.content, c.created_at,
                c.parent_message_id, c.chunk_index, c.chunk_kind, c.language,
                c.token_estimate, bm25(chunks_fts) AS score
         FROM chunks_fts f
         JOIN message_chunks c ON c.id = f.chunk_id
         JOIN messages m ON m.id = c.parent_message_id
         WHERE chunks_fts MATCH ?",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_expr.to_string())];

    if let Some(conversation_id) = conversation_id {
        sql.push_str(" AND f.conversation_id = ?");
        params_vec.push(Box::new(conversation_id.to_string()));
    }
    sql.push_str(" ORDER BY score ASC LIMIT ?");
    params_vec.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let role: String = row.get("role")?;
        let created_at: String = row.get("created_at")?;
        let kind: String = row.get("chunk_kind")?;
        let score: f64 = row.get("score")?;
        Ok(FtsHit {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            role: role.parse().unwrap_or(Role::User),
            content: row.get("content")?,
            created_at: parse_ts(&created_at),
            content_type: ContentType::MessageChunk,
            parent_message_id: row.get("parent_message_id")?,
            chunk_index: row.get("chunk_index")?,
            chunk_kind: kind.parse().ok(),
            chunk_language: row.get("language")?,
            token_estimate: row.get("token_estimate")?,
            bm25: score,
            similarity: normalize_bm25(score),
        })
    })?;

    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunks::replace_message_chunks;
    use crate::storage::queries::{create_conversation, insert_message, new_message};
    use crate::storage::Storage;
    use crate::types::{MessageChunk, SaveMessageOptions};
    use rusqlite::params;

    fn save(conn: &Connection, conversation_id: &str, role: Role, content: &str) -> String {
        let message = new_message(
            conversation_id,
            role,
            content,
            &SaveMessageOptions::default(),
            vec![],
        );
        insert_message(conn, &message).unwrap();
        message.id
    }

    #[test]
    fn test_build_fts_query() {
        assert_eq!(
            build_fts_query("handle_web_socket error!"),
            Some("\"handle\" OR \"web\" OR \"socket\" OR \"error\"".to_string())
        );
        // Short and duplicate terms drop out
        assert_eq!(
            build_fts_query("a of of sqlite"),
            Some("\"of\" OR \"sqlite\"".to_string())
        );
        assert_eq!(build_fts_query("a ! ?"), None);
        assert_eq!(build_fts_query(""), None);
    }

    #[test]
    fn test_normalize_bm25() {
        assert!((normalize_bm25(0.0) - 1.0).abs() < f32::EPSILON);
        let near = normalize_bm25(-1.0);
        assert!((near - 0.5).abs() < 1e-6);
        let far = normalize_bm25(-9.0);
        assert!(far < near);
        assert!(far > 0.0);
    }

    #[test]
    fn test_message_search_and_scoping() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let c1 = create_conversation(conn, "one", None, &[])?;
                let c2 = create_conversation(conn, "two", None, &[])?;
                save(conn, &c1.id, Role::User, "websocket reconnect logic");
                save(conn, &c2.id, Role::User, "websocket handshake details");
                save(conn, &c1.id, Role::User, "gardening tips");

                let global = fts_search(conn, "websocket", None, 10, false)?;
                assert_eq!(global.len(), 2);
                assert!(global.iter().all(|h| h.similarity > 0.0 && h.similarity <= 1.0));

                let scoped = fts_search(conn, "websocket", Some(&c1.id), 10, false)?;
                assert_eq!(scoped.len(), 1);
                assert_eq!(scoped[0].conversation_id, c1.id);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_system_messages_not_indexed() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let conversation = create_conversation(conn, "t", None, &[])?;
                save(conn, &conversation.id, Role::System, "secret system preamble");
                save(conn, &conversation.id, Role::User, "user asks about preamble");

                let hits = fts_search(conn, "preamble", None, 10, false)?;
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].role, Role::User);

                // Coverage: the FTS mirror holds exactly the user/assistant rows
                let fts_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM messages_fts", [], |r| r.get(0))?;
                let indexed_count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE role IN ('user', 'assistant')",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(fts_count, indexed_count);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_chunk_hits_included_when_enabled() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let conversation = create_conversation(conn, "t", None, &[])?;
                let message_id = save(conn, &conversation.id, Role::Assistant, "see snippet");
                let chunk = MessageChunk {
                    id: MessageChunk::derived_id(&message_id, 0),
                    parent_message_id: message_id.clone(),
                    conversation_id: conversation.id.clone(),
                    chunk_index: 0,
                    chunk_kind: ChunkKind::Code,
                    content: "```rust\nfn reconnect_socket() {}\n```".into(),
                    language: Some("rust".into()),
                    token_estimate: 10,
                    created_at: Utc::now(),
                };
                replace_message_chunks(conn, &message_id, &[chunk])?;

                let without = fts_search(conn, "reconnect_socket", None, 10, false)?;
                assert!(without.is_empty());

                let with = fts_search(conn, "reconnect_socket", None, 10, true)?;
                assert_eq!(with.len(), 1);
                assert_eq!(with[0].content_type, ContentType::MessageChunk);
                assert_eq!(with[0].parent_message_id.as_deref(), Some(message_id.as_str()));
                assert_eq!(with[0].role, Role::Assistant);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let hits = fts_search(conn, "  _ ", None, 10, true)?;
                assert!(hits.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_keeps_fts_in_sync() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let conversation = create_conversation(conn, "t", None, &[])?;
                let message_id = save(conn, &conversation.id, Role::User, "ephemeral note");
                assert_eq!(fts_search(conn, "ephemeral", None, 10, false)?.len(), 1);

                conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
                assert!(fts_search(conn, "ephemeral", None, 10, false)?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
