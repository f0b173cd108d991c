//! Summary lifecycle.
//!
//! State machine `queued -> running -> (succeeded | failed |
//! skipped_no_consent)` with per-conversation health counters and an
//! append-only event log. A `running` transition is closed by exactly one
//! terminal transition carrying the same attempt number; retries are
//! coordinated by the caller, the health columns make bounded-retry
//! policies possible.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RecallError, Result};
use crate::storage::queries::parse_ts;
use crate::types::{SummaryEvent, SummaryHealth, SummaryState};

/// Terminal outcome of one summary run
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Succeeded,
    Failed {
        error: String,
        /// Count toward `total_retries`
        count_as_retry: bool,
        /// Count toward `consecutive_failures` (default true)
        count_as_failure: bool,
    },
    SkippedNoConsent,
}

impl RunOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        RunOutcome::Failed {
            error: error.into(),
            count_as_retry: false,
            count_as_failure: true,
        }
    }

    fn state(&self) -> SummaryState {
        match self {
            RunOutcome::Succeeded => SummaryState::Succeeded,
            RunOutcome::Failed { .. } => SummaryState::Failed,
            RunOutcome::SkippedNoConsent => SummaryState::SkippedNoConsent,
        }
    }
}

/// Whether the N-th assistant message triggers a summary job
pub fn summary_due(assistant_count: i64, frequency: u32) -> bool {
    frequency > 0 && assistant_count > 0 && assistant_count % frequency as i64 == 0
}

fn health_from_row(row: &Row<'_>) -> rusqlite::Result<SummaryHealth> {
    let last_state: Option<String> = row.get("last_state")?;
    let last_run_at: Option<String> = row.get("last_run_at")?;
    let last_success_at: Option<String> = row.get("last_success_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(SummaryHealth {
        conversation_id: row.get("conversation_id")?,
        last_state: last_state.and_then(|s| s.parse().ok()),
        last_run_at: last_run_at.as_deref().map(parse_ts),
        last_success_at: last_success_at.as_deref().map(parse_ts),
        last_error: row.get("last_error")?,
        consecutive_failures: row.get("consecutive_failures")?,
        total_runs: row.get("total_runs")?,
        total_successes: row.get("total_successes")?,
        total_failures: row.get("total_failures")?,
        total_retries: row.get("total_retries")?,
        updated_at: parse_ts(&updated_at),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<SummaryEvent> {
    let state: String = row.get("state")?;
    let created_at: String = row.get("created_at")?;
    let metadata: Option<String> = row.get("metadata")?;
    Ok(SummaryEvent {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        state: state.parse().unwrap_or(SummaryState::Queued),
        attempt: row.get("attempt")?,
        error_message: row.get("error_message")?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: parse_ts(&created_at),
    })
}

fn ensure_health_row(conn: &Connection, conversation_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO summary_health (conversation_id, updated_at) VALUES (?1, ?2)",
        params![conversation_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn append_event(
    conn: &Connection,
    conversation_id: &str,
    state: SummaryState,
    attempt: i64,
    error: Option<&str>,
    metadata: Option<&Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO summary_events (conversation_id, state, attempt, error_message, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            conversation_id,
            state.as_str(),
            attempt,
            error,
            metadata.map(|m| m.to_string()),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// The attempt number the next run will carry
pub fn next_attempt(conn: &Connection, conversation_id: &str) -> Result<i64> {
    let attempt: i64 = conn.query_row(
        "SELECT COALESCE(MAX(attempt), 0) + 1 FROM summary_events
         WHERE conversation_id = ?1 AND state = 'running'",
        params![conversation_id],
        |row| row.get(0),
    )?;
    Ok(attempt)
}

/// Record that a summary job is due for the conversation.
pub fn queue(conn: &Connection, conversation_id: &str, metadata: Option<&Value>) -> Result<i64> {
    let attempt = next_attempt(conn, conversation_id)?;
    ensure_health_row(conn, conversation_id)?;
    append_event(conn, conversation_id, SummaryState::Queued, attempt, None, metadata)?;
    conn.execute(
        "UPDATE summary_health SET last_state = 'queued', updated_at = ?1 WHERE conversation_id = ?2",
        params![Utc::now().to_rfc3339(), conversation_id],
    )?;
    Ok(attempt)
}

/// Open a run: bumps `total_runs`, sets `last_run_at`, and returns the
/// attempt number the matching terminal transition must carry.
pub fn begin_run(conn: &Connection, conversation_id: &str) -> Result<i64> {
    let attempt = next_attempt(conn, conversation_id)?;
    ensure_health_row(conn, conversation_id)?;
    append_event(conn, conversation_id, SummaryState::Running, attempt, None, None)?;

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE summary_health
         SET last_state = 'running', last_run_at = ?1, total_runs = total_runs + 1, updated_at = ?1
         WHERE conversation_id = ?2",
        params![now, conversation_id],
    )?;
    Ok(attempt)
}

/// Close a run with its terminal transition. The attempt must match the
/// one handed out by `begin_run`.
pub fn complete_run(
    conn: &Connection,
    conversation_id: &str,
    attempt: i64,
    outcome: &RunOutcome,
) -> Result<()> {
    let open: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM summary_events
         WHERE conversation_id = ?1 AND state = 'running' AND attempt = ?2",
        params![conversation_id, attempt],
        |row| row.get(0),
    )?;
    if !open {
        return Err(RecallError::invalid(
            "summary",
            format!(
                "no running attempt {} for conversation {}",
                attempt, conversation_id
            ),
        ));
    }

    let now = Utc::now().to_rfc3339();
    match outcome {
        RunOutcome::Succeeded => {
            append_event(conn, conversation_id, SummaryState::Succeeded, attempt, None, None)?;
            conn.execute(
                "UPDATE summary_health
                 SET last_state = 'succeeded', last_success_at = ?1, last_error = NULL,
                     consecutive_failures = 0, total_successes = total_successes + 1,
                     updated_at = ?1
                 WHERE conversation_id = ?2",
                params![now, conversation_id],
            )?;
        }
        RunOutcome::Failed {
            error,
            count_as_retry,
            count_as_failure,
        } => {
            append_event(
                conn,
                conversation_id,
                SummaryState::Failed,
                attempt,
                Some(error),
                None,
            )?;
            conn.execute(
                "UPDATE summary_health
                 SET last_state = 'failed', last_error = ?1,
                     total_failures = total_failures + 1,
                     total_retries = total_retries + ?2,
                     consecutive_failures = consecutive_failures + ?3,
                     updated_at = ?4
                 WHERE conversation_id = ?5",
                params![
                    error,
                    *count_as_retry as i64,
                    *count_as_failure as i64,
                    now,
                    conversation_id
                ],
            )?;
        }
        RunOutcome::SkippedNoConsent => {
            // Recorded for observability; does not count toward failures
            append_event(
                conn,
                conversation_id,
                SummaryState::SkippedNoConsent,
                attempt,
                None,
                None,
            )?;
            conn.execute(
                "UPDATE summary_health SET last_state = 'skipped_no_consent', updated_at = ?1
                 WHERE conversation_id = ?2",
                params![now, conversation_id],
            )?;
        }
    }
    Ok(())
}

pub fn get_health(conn: &Connection, conversation_id: &str) -> Result<Option<SummaryHealth>> {
    let row = conn
        .query_row(
            "SELECT conversation_id, last_state, last_run_at, last_success_at, last_error,
                    consecutive_failures, total_runs, total_successes, total_failures,
                    total_retries, updated_at
             FROM summary_health WHERE conversation_id = ?1",
            params![conversation_id],
            health_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_events(
    conn: &Connection,
    conversation_id: &str,
    limit: i64,
) -> Result<Vec<SummaryEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, state, attempt, error_message, metadata, created_at
         FROM summary_events WHERE conversation_id = ?1
         ORDER BY id ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![conversation_id, limit], event_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Counts over a recent slice of the event log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub runs: i64,
    pub successes: i64,
    pub failures: i64,
}

/// Aggregated health: lifetime totals, rates, and a recent window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub conversation_id: Option<String>,
    pub total_runs: i64,
    pub total_successes: i64,
    pub total_failures: i64,
    pub total_retries: i64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub window_hours: i64,
    pub window: WindowStats,
}

/// Build a health snapshot, store-wide or for one conversation. The window
/// defaults to the last 24 hours of events.
pub fn snapshot(
    conn: &Connection,
    conversation_id: Option<&str>,
    window_hours: Option<i64>,
) -> Result<HealthSnapshot> {
    let window_hours = window_hours.unwrap_or(24);
    let cutoff = (Utc::now() - Duration::hours(window_hours)).to_rfc3339();

    let (total_runs, total_successes, total_failures, total_retries): (i64, i64, i64, i64) =
        match conversation_id {
            Some(id) => conn.query_row(
                "SELECT COALESCE(SUM(total_runs), 0), COALESCE(SUM(total_successes), 0),
                        COALESCE(SUM(total_failures), 0), COALESCE(SUM(total_retries), 0)
                 FROM summary_health WHERE conversation_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?,
            None => conn.query_row(
                "SELECT COALESCE(SUM(total_runs), 0), COALESCE(SUM(total_successes), 0),
                        COALESCE(SUM(total_failures), 0), COALESCE(SUM(total_retries), 0)
                 FROM summary_health",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?,
        };

    let window = match conversation_id {
        Some(id) => conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN state = 'running' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = 'succeeded' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0)
             FROM summary_events WHERE conversation_id = ?1 AND created_at >= ?2",
            params![id, cutoff],
            |row| {
                Ok(WindowStats {
                    runs: row.get(0)?,
                    successes: row.get(1)?,
                    failures: row.get(2)?,
                })
            },
        )?,
        None => conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN state = 'running' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = 'succeeded' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0)
             FROM summary_events WHERE created_at >= ?1",
            params![cutoff],
            |row| {
                Ok(WindowStats {
                    runs: row.get(0)?,
                    successes: row.get(1)?,
                    failures: row.get(2)?,
                })
            },
        )?,
    };

    let closed = total_successes + total_failures;
    Ok(HealthSnapshot {
        conversation_id: conversation_id.map(String::from),
        total_runs,
        total_successes,
        total_failures,
        total_retries,
        success_rate: if closed > 0 {
            total_successes as f64 / closed as f64
        } else {
            0.0
        },
        failure_rate: if closed > 0 {
            total_failures as f64 / closed as f64
        } else {
            0.0
        },
        window_hours,
        window,
    })
}
