//! Retrieval metrics persistence.
//!
//! One row per query, retained for a rolling window. The
//! `retrieval_metrics_daily` view aggregates counts for dashboards.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::queries::parse_ts;
use crate::error::Result;
use crate::types::{FlagSnapshot, PhaseLatencies, RetrievalMetric, SourceCounts};

fn metric_from_row(row: &Row<'_>) -> rusqlite::Result<RetrievalMetric> {
    let created_at: String = row.get("created_at")?;
    let similarities_json: String = row.get("top_similarities")?;
    let flags_json: String = row.get("flags")?;
    Ok(RetrievalMetric {
        id: row.get("id")?,
        query: row.get("query")?,
        created_at: parse_ts(&created_at),
        conversation_id: row.get("conversation_id")?,
        sources: SourceCounts {
            conversation_dense: row.get("conversation_dense")?,
            global_dense: row.get("global_dense")?,
            summaries: row.get("summaries")?,
            profile: row.get("profile")?,
            fts_lexical: row.get("fts_lexical")?,
        },
        latencies: PhaseLatencies {
            total_ms: row.get("total_ms")?,
            dense_ms: row.get("dense_ms")?,
            fts_ms: row.get("fts_ms")?,
            rerank_ms: row.get("rerank_ms")?,
        },
        top_similarities: serde_json::from_str(&similarities_json).unwrap_or_default(),
        flags: serde_json::from_str(&flags_json).unwrap_or_default(),
    })
}

pub fn insert_metric(conn: &Connection, metric: &RetrievalMetric) -> Result<()> {
    conn.execute(
        "INSERT INTO retrieval_metrics
             (id, query, created_at, conversation_id, conversation_dense, global_dense,
              summaries, profile, fts_lexical, total_ms, dense_ms, fts_ms, rerank_ms,
              top_similarities, flags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            metric.id,
            metric.query,
            metric.created_at.to_rfc3339(),
            metric.conversation_id,
            metric.sources.conversation_dense,
            metric.sources.global_dense,
            metric.sources.summaries,
            metric.sources.profile,
            metric.sources.fts_lexical,
            metric.latencies.total_ms,
            metric.latencies.dense_ms,
            metric.latencies.fts_ms,
            metric.latencies.rerank_ms,
            serde_json::to_string(&metric.top_similarities)?,
            serde_json::to_string(&metric.flags)?,
        ],
    )?;
    Ok(())
}

/// Delete rows older than the retention window, returning how many went.
pub fn cleanup_metrics(conn: &Connection, retention_days: u32) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(retention_days as i64);
    let deleted = conn.execute(
        "DELETE FROM retrieval_metrics WHERE created_at < ?1",
        params![cutoff.to_rfc3339()],
    )?;
    Ok(deleted)
}

pub fn recent_metrics(conn: &Connection, limit: i64) -> Result<Vec<RetrievalMetric>> {
    let mut stmt = conn.prepare(
        "SELECT id, query, created_at, conversation_id, conversation_dense, global_dense,
                summaries, profile, fts_lexical, total_ms, dense_ms, fts_ms, rerank_ms,
                top_similarities, flags
         FROM retrieval_metrics ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], metric_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// One aggregated row per day, from the `retrieval_metrics_daily` view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub day: String,
    pub queries: i64,
    pub avg_total_ms: f64,
    pub avg_dense_ms: f64,
    pub avg_fts_ms: f64,
    pub fts_results: i64,
    pub dense_results: i64,
}

pub fn daily_metrics(conn: &Connection, limit: i64) -> Result<Vec<DailyMetrics>> {
    let mut stmt = conn.prepare(
        "SELECT day, queries, avg_total_ms, avg_dense_ms, avg_fts_ms, fts_results, dense_results
         FROM retrieval_metrics_daily ORDER BY day DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(DailyMetrics {
            day: row.get(0)?,
            queries: row.get(1)?,
            avg_total_ms: row.get(2)?,
            avg_dense_ms: row.get(3)?,
            avg_fts_ms: row.get(4)?,
            fts_results: row.get(5)?,
            dense_results: row.get(6)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
