//! Typed key-value preferences, upserted atomically.
//!
//! Runtime overrides (hybrid, chunking, token budget, summary frequency),
//! the profile-consent bit, and the persisted vector-collection identity
//! all live here.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::Result;

/// A typed preference value
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Json(Value),
}

impl PreferenceValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            PreferenceValue::String(_) => "string",
            PreferenceValue::Number(_) => "number",
            PreferenceValue::Boolean(_) => "boolean",
            PreferenceValue::Json(_) => "json",
        }
    }

    fn encode(&self) -> String {
        match self {
            PreferenceValue::String(s) => s.clone(),
            PreferenceValue::Number(n) => n.to_string(),
            PreferenceValue::Boolean(b) => b.to_string(),
            PreferenceValue::Json(v) => v.to_string(),
        }
    }

    fn decode(raw: &str, type_tag: &str) -> Option<Self> {
        match type_tag {
            "string" => Some(PreferenceValue::String(raw.to_string())),
            "number" => raw.parse().ok().map(PreferenceValue::Number),
            "boolean" => raw.parse().ok().map(PreferenceValue::Boolean),
            "json" => serde_json::from_str(raw).ok().map(PreferenceValue::Json),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PreferenceValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PreferenceValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PreferenceValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Upsert a preference
pub fn set_preference(conn: &Connection, key: &str, value: &PreferenceValue) -> Result<()> {
    conn.execute(
        "INSERT INTO user_preferences (key, value, value_type, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             value_type = excluded.value_type,
             updated_at = excluded.updated_at",
        params![key, value.encode(), value.type_tag(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Read a preference, if present and decodable
pub fn get_preference(conn: &Connection, key: &str) -> Result<Option<PreferenceValue>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT value, value_type FROM user_preferences WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(raw, tag)| PreferenceValue::decode(&raw, &tag)))
}

pub fn get_bool_preference(conn: &Connection, key: &str) -> Result<Option<bool>> {
    Ok(get_preference(conn, key)?.and_then(|v| v.as_bool()))
}

pub fn get_number_preference(conn: &Connection, key: &str) -> Result<Option<f64>> {
    Ok(get_preference(conn, key)?.and_then(|v| v.as_number()))
}

pub fn delete_preference(conn: &Connection, key: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM user_preferences WHERE key = ?1", params![key])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use serde_json::json;

    #[test]
    fn test_typed_round_trips() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                set_preference(conn, "s", &PreferenceValue::String("abc".into()))?;
                set_preference(conn, "n", &PreferenceValue::Number(2.5))?;
                set_preference(conn, "b", &PreferenceValue::Boolean(true))?;
                set_preference(conn, "j", &PreferenceValue::Json(json!({"k": [1, 2]})))?;

                assert_eq!(
                    get_preference(conn, "s")?,
                    Some(PreferenceValue::String("abc".into()))
                );
                assert_eq!(get_number_preference(conn, "n")?, Some(2.5));
                assert_eq!(get_bool_preference(conn, "b")?, Some(true));
                assert_eq!(
                    get_preference(conn, "j")?.unwrap().as_json(),
                    Some(&json!({"k": [1, 2]}))
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_upsert_replaces_value_and_type() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                set_preference(conn, "budget", &PreferenceValue::Number(1000.0))?;
                set_preference(conn, "budget", &PreferenceValue::Number(1500.0))?;
                assert_eq!(get_number_preference(conn, "budget")?, Some(1500.0));

                // Type changes take effect on upsert
                set_preference(conn, "budget", &PreferenceValue::String("off".into()))?;
                assert_eq!(get_number_preference(conn, "budget")?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_missing_and_deleted_keys() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                assert!(get_preference(conn, "missing")?.is_none());
                set_preference(conn, "tmp", &PreferenceValue::Boolean(false))?;
                assert!(delete_preference(conn, "tmp")?);
                assert!(get_preference(conn, "tmp")?.is_none());
                Ok(())
            })
            .unwrap();
    }
}
