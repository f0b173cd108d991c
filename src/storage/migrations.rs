//! Database migrations.
//!
//! Migrations are SQL scripts applied in lexicographic order of their
//! names, with `001_init` first. Applied names are recorded in
//! `schema_migrations`, so a second run applies nothing. Each script runs
//! through `execute_batch` in its own transaction, which keeps
//! multi-statement constructs (triggers, virtual tables) intact.

use rusqlite::Connection;

use crate::error::Result;

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_init", include_str!("migrations/001_init.sql")),
    (
        "002_summary_lifecycle",
        include_str!("migrations/002_summary_lifecycle.sql"),
    ),
    (
        "003_retrieval_metrics",
        include_str!("migrations/003_retrieval_metrics.sql"),
    ),
];

/// Run all pending migrations, returning how many were applied.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let mut ordered: Vec<(&str, &str)> = MIGRATIONS.to_vec();
    ordered.sort_by_key(|(name, _)| *name);

    let mut applied = 0;
    for (name, script) in ordered {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_migrations WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        if already_applied {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(script)?;
        tx.execute("INSERT INTO schema_migrations (name) VALUES (?1)", [name])?;
        tx.commit()?;

        tracing::info!(migration = name, "applied migration");
        applied += 1;
    }

    Ok(applied)
}

/// Names of all known migrations, in apply order
pub fn migration_names() -> Vec<&'static str> {
    let mut names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
    names.sort_unstable();
    names
}
