//! Append-only per-scope event log with server-assigned sequence numbers

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{CandidateEvent, Scope, SyncEvent};
use crate::util::{from_millis, to_millis};

/// Outcome of an append attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// Persisted with a freshly assigned `server_seq`
    Appended(SyncEvent),
    /// A uniqueness constraint (event id or dedupe key) rejected the row
    Conflict,
}

/// `SQLite` event log.
///
/// `append` reads and advances the scope counter in two statements, so it
/// must run inside a write transaction (`BEGIN IMMEDIATE`).
pub struct SqliteEventLog<'a> {
    conn: &'a Connection,
}

const EVENT_COLUMNS: &str = "id, scope, client_id, client_mutation_id, dedupe_key, event_type, payload, occurred_at, server_seq";

impl<'a> SqliteEventLog<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Highest `server_seq` assigned in the scope (0 for an empty log)
    pub fn head(&self, scope: Scope) -> Result<i64> {
        let head = self
            .conn
            .query_row(
                "SELECT last_seq FROM sync_sequences WHERE scope = ?",
                params![scope.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(head)
    }

    pub fn append(
        &self,
        scope: Scope,
        client_id: &str,
        client_mutation_id: &str,
        candidate: &CandidateEvent,
    ) -> Result<AppendOutcome> {
        let server_seq = self.head(scope)? + 1;
        let payload = serde_json::to_string(&candidate.payload)?;
        // Stored at millisecond precision; echo exactly what a pull returns
        let occurred_at = from_millis(to_millis(candidate.occurred_at));

        let inserted = self.conn.execute(
            "INSERT INTO sync_events
                (id, scope, client_id, client_mutation_id, dedupe_key, event_type, payload, occurred_at, server_seq, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT DO NOTHING",
            params![
                candidate.id,
                scope.as_str(),
                client_id,
                client_mutation_id,
                candidate.dedupe_key,
                candidate.event_type,
                payload,
                to_millis(occurred_at),
                server_seq,
                to_millis(Utc::now()),
            ],
        )?;
        if inserted == 0 {
            return Ok(AppendOutcome::Conflict);
        }

        self.conn.execute(
            "INSERT INTO sync_sequences (scope, last_seq) VALUES (?1, ?2)
             ON CONFLICT(scope) DO UPDATE SET last_seq = excluded.last_seq",
            params![scope.as_str(), server_seq],
        )?;

        Ok(AppendOutcome::Appended(SyncEvent {
            id: candidate.id.clone(),
            scope,
            client_id: client_id.to_string(),
            client_mutation_id: client_mutation_id.to_string(),
            dedupe_key: candidate.dedupe_key.clone(),
            event_type: candidate.event_type.clone(),
            payload: candidate.payload.clone(),
            occurred_at,
            server_seq,
        }))
    }

    pub fn dedupe_key_exists(&self, scope: Scope, dedupe_key: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_events WHERE scope = ? AND dedupe_key = ?)",
            params![scope.as_str(), dedupe_key],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn contains(&self, event_id: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_events WHERE id = ?)",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Events with `server_seq > after`, ascending
    pub fn events_after(&self, scope: Scope, after: i64, limit: usize) -> Result<Vec<SyncEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM sync_events
             WHERE scope = ?1 AND server_seq > ?2
             ORDER BY server_seq ASC
             LIMIT ?3"
        ))?;
        let events = stmt
            .query_map(
                params![scope.as_str(), after, limit as i64],
                Self::parse_event,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn count(&self, scope: Scope) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_events WHERE scope = ?",
            params![scope.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn parse_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncEvent> {
        let scope: String = row.get(1)?;
        let payload: String = row.get(6)?;
        Ok(SyncEvent {
            id: row.get(0)?,
            scope: super::parse_text_column(1, &scope)?,
            client_id: row.get(2)?,
            client_mutation_id: row.get(3)?,
            dedupe_key: row.get(4)?,
            event_type: row.get(5)?,
            payload: serde_json::from_str(&payload).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
            occurred_at: from_millis(row.get(7)?),
            server_seq: row.get(8)?,
        })
    }
}
