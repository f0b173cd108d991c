//! Conversation and message accessors.
//!
//! All statements are prepared and parameterized; timestamps are stored as
//! RFC 3339 text so ascending sorts reproduce authoring order.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{RecallError, Result};
use crate::types::{Conversation, MemoryStats, Message, Role, SaveMessageOptions};

/// Sort order for message listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageOrder {
    #[default]
    Asc,
    Desc,
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let tags_json: String = row.get("tags")?;
    Ok(Conversation {
        id: row.get("id")?,
        title: row.get("title")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        total_tokens: row.get("total_tokens")?,
        summary: row.get("summary")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        model: row.get("model")?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get("role")?;
    let created_at: String = row.get("created_at")?;
    let tool_calls: Option<String> = row.get("tool_calls")?;
    let tool_results: Option<String> = row.get("tool_results")?;
    let identifiers_json: String = row.get("code_identifiers")?;
    Ok(Message {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role: role_str.parse().unwrap_or(Role::User),
        content: row.get("content")?,
        created_at: parse_ts(&created_at),
        tokens_used: row.get("tokens_used")?,
        tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
        tool_results: tool_results.and_then(|s| serde_json::from_str(&s).ok()),
        model_used: row.get("model_used")?,
        temperature: row.get("temperature")?,
        code_identifiers: serde_json::from_str(&identifiers_json).unwrap_or_default(),
    })
}

/// Create a conversation with a fresh id
pub fn create_conversation(
    conn: &Connection,
    title: &str,
    model: Option<&str>,
    tags: &[String],
) -> Result<Conversation> {
    let now = Utc::now();
    let conversation = Conversation {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        created_at: now,
        updated_at: now,
        total_tokens: 0,
        summary: None,
        tags: tags.to_vec(),
        model: model.map(String::from),
    };

    conn.execute(
        "INSERT INTO conversations (id, title, created_at, updated_at, total_tokens, summary, tags, model)
         VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5, ?6)",
        params![
            conversation.id,
            conversation.title,
            now.to_rfc3339(),
            now.to_rfc3339(),
            serde_json::to_string(&conversation.tags)?,
            conversation.model,
        ],
    )?;

    Ok(conversation)
}

pub fn get_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let row = conn
        .query_row(
            "SELECT id, title, created_at, updated_at, total_tokens, summary, tags, model
             FROM conversations WHERE id = ?1",
            params![id],
            conversation_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_conversations(conn: &Connection, limit: Option<i64>) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, created_at, updated_at, total_tokens, summary, tags, model
         FROM conversations ORDER BY updated_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit.unwrap_or(-1)], conversation_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Bump `updated_at` and add to the running token total. Called on any
/// child mutation.
pub fn touch_conversation(conn: &Connection, id: &str, added_tokens: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE conversations SET updated_at = ?1, total_tokens = total_tokens + ?2 WHERE id = ?3",
        params![Utc::now().to_rfc3339(), added_tokens, id],
    )?;
    if changed == 0 {
        return Err(RecallError::invalid(
            "storage",
            format!("unknown conversation: {}", id),
        ));
    }
    Ok(())
}

/// Keep `conversations.summary` in sync with the summary table
pub fn set_conversation_summary(conn: &Connection, id: &str, summary: &str) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET summary = ?1, updated_at = ?2 WHERE id = ?3",
        params![summary, Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

/// Delete a conversation; messages, chunks, summaries, embeddings and
/// metrics cascade at the SQL layer.
pub fn delete_conversation(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Insert a message row. The caller owns id/timestamp assignment so the
/// write path can reuse them for chunk ids and vector records.
pub fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, role, content, created_at, tokens_used,
                               tool_calls, tool_results, model_used, temperature, code_identifiers)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            message.id,
            message.conversation_id,
            message.role.as_str(),
            message.content,
            message.created_at.to_rfc3339(),
            message.tokens_used,
            message
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            message
                .tool_results
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            message.model_used,
            message.temperature,
            serde_json::to_string(&message.code_identifiers)?,
        ],
    )?;
    Ok(())
}

/// Build a message record ready for insertion
pub fn new_message(
    conversation_id: &str,
    role: Role,
    content: &str,
    options: &SaveMessageOptions,
    code_identifiers: Vec<String>,
) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        role,
        content: content.to_string(),
        created_at: Utc::now(),
        tokens_used: options.tokens_used,
        tool_calls: options.tool_calls.clone(),
        tool_results: options.tool_results.clone(),
        model_used: options.model_used.clone(),
        temperature: options.temperature,
        code_identifiers,
    }
}

pub fn get_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let row = conn
        .query_row(
            "SELECT id, conversation_id, role, content, created_at, tokens_used,
                    tool_calls, tool_results, model_used, temperature, code_identifiers
             FROM messages WHERE id = ?1",
            params![id],
            message_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_conversation_messages(
    conn: &Connection,
    conversation_id: &str,
    order: MessageOrder,
    limit: Option<i64>,
) -> Result<Vec<Message>> {
    let sql = match order {
        MessageOrder::Asc => {
            "SELECT id, conversation_id, role, content, created_at, tokens_used,
                    tool_calls, tool_results, model_used, temperature, code_identifiers
             FROM messages WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC LIMIT ?2"
        }
        MessageOrder::Desc => {
            "SELECT id, conversation_id, role, content, created_at, tokens_used,
                    tool_calls, tool_results, model_used, temperature, code_identifiers
             FROM messages WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![conversation_id, limit.unwrap_or(-1)], message_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Count messages in a conversation, optionally per role
pub fn count_messages(
    conn: &Connection,
    conversation_id: &str,
    role: Option<Role>,
) -> Result<i64> {
    let count = match role {
        Some(role) => conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND role = ?2",
            params![conversation_id, role.as_str()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}

/// Store-wide statistics
pub fn get_stats(conn: &Connection) -> Result<MemoryStats> {
    let conversations: i64 =
        conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
    let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
    let pending_embeddings: i64 = conn.query_row(
        "SELECT COUNT(*) FROM embedding_metadata WHERE embedding_status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    let total_tokens: i64 = conn.query_row(
        "SELECT COALESCE(SUM(total_tokens), 0) FROM conversations",
        [],
        |row| row.get(0),
    )?;
    let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM messages",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(MemoryStats {
        conversations,
        messages,
        pending_embeddings,
        total_tokens,
        oldest: oldest.as_deref().map(parse_ts),
        newest: newest.as_deref().map(parse_ts),
    })
}
