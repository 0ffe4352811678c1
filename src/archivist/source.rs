use crate::error::ArchivistError;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MS_SCALE_FLOOR: i64 = 1_000_000_000_000;
const SECONDS_SCALE_FLOOR: i64 = 1_000_000_000;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
    pub id: i64,
    pub name: String,
    /// Remote group key; falls back to the name when the row has no slug.
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceThread {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub prompt: String,
    pub response: String,
    pub created_at_ms: Option<i64>,
}

/// Normalize a timestamp of unknown unit to milliseconds by magnitude.
pub fn normalize_to_ms(raw: i64) -> i64 {
    if raw > MS_SCALE_FLOOR {
        raw
    } else if raw > SECONDS_SCALE_FLOOR {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

fn parse_text_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(normalize_to_ms(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

fn timestamp_from_value(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(normalize_to_ms(n)),
        ValueRef::Real(f) => Some(normalize_to_ms(f as i64)),
        ValueRef::Text(bytes) => parse_text_timestamp(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(_) => None,
    }
}

/// Responses are sometimes stored as a JSON envelope (`{"text": ..., "sources": [...]}`);
/// pull the text out, falling back to the raw value.
pub fn clean_ai_response(raw: &str) -> String {
    if !raw.trim_start().starts_with('{') {
        return raw.to_string();
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw)
        && let Some(text) = map.get("text")
    {
        return match text {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }

    // Truncated envelopes: scrape the text field by hand.
    const MARKER: &str = "text\":\"";
    if let Some(pos) = raw.find(MARKER) {
        let start = pos + MARKER.len();
        let rest = &raw[start..];
        let end = rest.find("\",\"sources\"").or_else(|| rest.find("\"}"));
        if let Some(end) = end {
            return rest[..end].replace("\\\"", "\"").replace("\\n", "\n");
        }
    }
    raw.to_string()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<SourceMessage> {
    let prompt: Option<String> = row.get(0)?;
    let response: Option<String> = row.get(1)?;
    let created_at_ms = timestamp_from_value(row.get_ref(2)?);
    Ok(SourceMessage {
        prompt: prompt.unwrap_or_default(),
        response: clean_ai_response(response.as_deref().unwrap_or_default()),
        created_at_ms,
    })
}

/// Read-only view over the chat database.
pub struct SourceStore {
    conn: Connection,
    path: PathBuf,
}

impl SourceStore {
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ArchivistError::SourceUnavailable(format!(
                "database not found at {}",
                path.display()
            ))
            .into());
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| {
            ArchivistError::SourceUnavailable(format!("failed to open {}: {err}", path.display()))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .with_context(|| format!("failed to set busy timeout on {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn groups(&self) -> Result<Vec<SourceGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, slug FROM workspaces ORDER BY id ASC")
            .map_err(|err| {
                ArchivistError::SourceUnavailable(format!(
                    "failed to list workspaces in {}: {err}",
                    self.path.display()
                ))
            })?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: Option<String> = row.get(1)?;
            let slug: Option<String> = row.get(2)?;
            let name = name.unwrap_or_else(|| format!("workspace_{id}"));
            let slug = slug
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| name.clone());
            Ok(SourceGroup { id, name, slug })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode workspace row")?);
        }
        Ok(out)
    }

    pub fn threads(&self, group_id: i64) -> Result<Vec<SourceThread>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name FROM workspace_threads WHERE workspace_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![group_id], |row| {
            Ok(SourceThread {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.with_context(|| format!("failed to decode thread of group {group_id}"))?);
        }
        Ok(out)
    }

    pub fn thread_messages(&self, thread_id: i64) -> Result<Vec<SourceMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT prompt, response, createdAt FROM workspace_chats \
             WHERE thread_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![thread_id], message_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.with_context(|| format!("failed to decode chat of thread {thread_id}"))?);
        }
        Ok(out)
    }

    /// Messages of a group that belong to no thread.
    pub fn default_messages(&self, group_id: i64) -> Result<Vec<SourceMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT prompt, response, createdAt FROM workspace_chats \
             WHERE workspaceId = ?1 AND thread_id IS NULL ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![group_id], message_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(
                row.with_context(|| format!("failed to decode default chat of group {group_id}"))?,
            );
        }
        Ok(out)
    }
}
