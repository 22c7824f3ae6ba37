//! `SQLite` implementation of the offline queue

#![allow(clippy::cast_possible_wrap)]

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    migrations, AuditAction, AuditEntry, OfflineQueue, PendingEvent, QueueStatus, RejectedEvent,
    SyncState,
};
use crate::db::parse_text_column;
use crate::error::{Error, Result};
use crate::models::{EventKind, Record, RecordChange, Scope, SyncEvent};
use crate::util::{from_millis, normalize_text_option, to_millis};

const OUTBOX_COLUMNS: &str = "id, scope, event_type, payload, dedupe_key, created_at, retry_count";

pub struct SqliteOfflineQueue {
    conn: Connection,
}

impl SqliteOfflineQueue {
    /// Open the queue at `path`, creating the file and its parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
            .ok();
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        migrations::run(&mut conn)?;
        Ok(Self { conn })
    }

    /// Number of pending events in a scope
    pub fn outbox_len(&self, scope: Scope) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE scope = ?",
            params![scope.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn load_state(conn: &Connection, scope: Scope) -> Result<Option<SyncState>> {
    let state = conn
        .query_row(
            "SELECT last_server_seq, updated_at, last_snapshot_at, status
             FROM sync_state WHERE scope = ?",
            params![scope.as_str()],
            |row| {
                let status: String = row.get(3)?;
                Ok(SyncState {
                    scope,
                    last_server_seq: row.get(0)?,
                    updated_at: Some(from_millis(row.get(1)?)),
                    last_snapshot_at: row.get::<_, Option<i64>>(2)?.map(from_millis),
                    status: parse_text_column(3, &status)?,
                })
            },
        )
        .optional()?;
    Ok(state)
}

fn watermark(conn: &Connection, scope: Scope) -> Result<i64> {
    Ok(load_state(conn, scope)?.map_or(0, |state| state.last_server_seq))
}

/// Synced when nothing is pending, dirty otherwise. An uninitialized scope
/// stays that way until the next snapshot.
fn refresh_status(conn: &Connection, scope: Scope) -> Result<()> {
    conn.execute(
        "UPDATE sync_state
         SET status = CASE WHEN EXISTS(SELECT 1 FROM outbox WHERE scope = ?1) THEN ?2 ELSE ?3 END
         WHERE scope = ?1 AND status != ?4",
        params![
            scope.as_str(),
            QueueStatus::Dirty.as_str(),
            QueueStatus::Synced.as_str(),
            QueueStatus::Uninitialized.as_str()
        ],
    )?;
    Ok(())
}

fn write_audit(
    conn: &Connection,
    scope: Scope,
    action: AuditAction,
    event_ids: &[String],
    server_seq: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (scope, action, event_ids, server_seq, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            scope.as_str(),
            action.as_str(),
            serde_json::to_string(event_ids)?,
            server_seq,
            to_millis(Utc::now()),
        ],
    )?;
    Ok(())
}

fn put_record(conn: &Connection, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT INTO cached_records (scope, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(scope, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![
            record.scope().as_str(),
            record.id(),
            serde_json::to_string(record)?,
            to_millis(record.updated_at()),
        ],
    )?;
    Ok(())
}

fn cached_record(conn: &Connection, scope: Scope, id: &str) -> Result<Option<Record>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM cached_records WHERE scope = ? AND id = ?",
            params![scope.as_str(), id],
            |row| row.get(0),
        )
        .optional()?;
    data.map(|data| decode_record(scope, &data)).transpose()
}

fn decode_record(scope: Scope, data: &str) -> Result<Record> {
    Ok(Record::from_value(scope, serde_json::from_str(data)?)?)
}

fn select_rejected(conn: &Connection, scope: Option<Scope>) -> Result<Vec<RejectedEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {OUTBOX_COLUMNS}, reason, rejected_at FROM rejected_events
         WHERE (?1 IS NULL OR scope = ?1)
         ORDER BY rejected_at ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map(params![scope.map(Scope::as_str)], |row| {
            let scope: String = row.get(1)?;
            Ok((
                PendingEvent {
                    id: row.get(0)?,
                    scope: parse_text_column(1, &scope)?,
                    event_type: row.get(2)?,
                    payload: serde_json::Value::Null,
                    dedupe_key: row.get(4)?,
                    created_at: from_millis(row.get(5)?),
                    retry_count: row.get(6)?,
                },
                row.get::<_, String>(3)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(mut event, payload, reason, rejected_at)| -> Result<RejectedEvent> {
            event.payload = serde_json::from_str(&payload)?;
            Ok(RejectedEvent {
                event,
                reason,
                rejected_at: from_millis(rejected_at),
            })
        })
        .collect()
}

/// Parked events among `event_ids`, grouped by scope in first-seen order
fn rejected_by_scope(
    conn: &Connection,
    event_ids: &[String],
) -> Result<Vec<(Scope, Vec<RejectedEvent>)>> {
    let mut groups: Vec<(Scope, Vec<RejectedEvent>)> = Vec::new();
    for rejected in select_rejected(conn, None)?
        .into_iter()
        .filter(|rejected| event_ids.contains(&rejected.event.id))
    {
        let scope = rejected.event.scope;
        match groups.iter_mut().find(|(group, _)| *group == scope) {
            Some((_, events)) => events.push(rejected),
            None => groups.push((scope, vec![rejected])),
        }
    }
    Ok(groups)
}

fn select_outbox(
    conn: &Connection,
    scope: Option<Scope>,
    limit: Option<usize>,
) -> Result<Vec<PendingEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {OUTBOX_COLUMNS} FROM outbox
         WHERE (?1 IS NULL OR scope = ?1)
         ORDER BY created_at ASC, id ASC
         LIMIT ?2"
    ))?;
    let limit = limit.map_or(-1, |limit| limit as i64);
    let rows = stmt
        .query_map(params![scope.map(Scope::as_str), limit], |row| {
            let scope: String = row.get(1)?;
            let payload: String = row.get(3)?;
            Ok((
                PendingEvent {
                    id: row.get(0)?,
                    scope: parse_text_column(1, &scope)?,
                    event_type: row.get(2)?,
                    payload: serde_json::Value::Null,
                    dedupe_key: row.get(4)?,
                    created_at: from_millis(row.get(5)?),
                    retry_count: row.get(6)?,
                },
                payload,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(mut event, payload)| -> Result<PendingEvent> {
            event.payload = serde_json::from_str(&payload)?;
            Ok(event)
        })
        .collect()
}

impl OfflineQueue for SqliteOfflineQueue {
    fn apply_snapshot(&mut self, scope: Scope, records: &[Record], server_seq: i64) -> Result<()> {
        if let Some(stray) = records.iter().find(|record| record.scope() != scope) {
            return Err(Error::InvalidInput(format!(
                "record `{}` does not belong to scope {scope}",
                stray.id()
            )));
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM cached_records WHERE scope = ?",
            params![scope.as_str()],
        )?;
        for record in records {
            put_record(&tx, record)?;
        }

        let now = to_millis(Utc::now());
        tx.execute(
            "INSERT INTO sync_state (scope, last_server_seq, updated_at, last_snapshot_at, status)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(scope) DO UPDATE SET
                last_server_seq = excluded.last_server_seq,
                updated_at = excluded.updated_at,
                last_snapshot_at = excluded.last_snapshot_at,
                status = excluded.status",
            params![
                scope.as_str(),
                server_seq,
                now,
                QueueStatus::Synced.as_str()
            ],
        )?;
        refresh_status(&tx, scope)?;
        write_audit(&tx, scope, AuditAction::Snapshot, &[], server_seq)?;
        tx.commit()?;

        tracing::debug!(%scope, records = records.len(), server_seq, "Applied snapshot");
        Ok(())
    }

    fn apply_deltas(&mut self, scope: Scope, events: &[SyncEvent]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let state = load_state(&tx, scope)?.ok_or(Error::NotInitialized(scope))?;

        let mut previous: Option<i64> = None;
        for event in events {
            if event.scope != scope {
                return Err(Error::InvalidInput(format!(
                    "event `{}` belongs to scope {}, not {scope}",
                    event.id, event.scope
                )));
            }
            if let Some(previous) = previous.filter(|previous| event.server_seq <= *previous) {
                return Err(Error::OutOfOrder {
                    scope,
                    previous,
                    received: event.server_seq,
                });
            }
            previous = Some(event.server_seq);
        }

        let mut watermark = state.last_server_seq;
        let mut applied = Vec::new();
        let mut stale = false;
        for event in events
            .iter()
            .filter(|event| event.server_seq > state.last_server_seq)
        {
            watermark = event.server_seq;
            applied.push(event.id.clone());

            let change = match event.kind() {
                Ok(kind) => {
                    let current = cached_record(&tx, scope, kind.record_id())?;
                    kind.apply(current, event.occurred_at)
                }
                Err(issues) => Err(issues),
            };
            match change {
                Ok(RecordChange::Upsert(record)) => put_record(&tx, &record)?,
                Ok(RecordChange::Delete { scope, id }) => {
                    tx.execute(
                        "DELETE FROM cached_records WHERE scope = ? AND id = ?",
                        params![scope.as_str(), id],
                    )?;
                }
                Err(issues) => {
                    stale = true;
                    tracing::warn!(
                        %scope,
                        server_seq = event.server_seq,
                        event_type = %event.event_type,
                        issues = issues.len(),
                        "Could not apply pulled event to local cache; baseline will reload"
                    );
                }
            }
        }

        if !applied.is_empty() {
            tx.execute(
                "UPDATE sync_state SET last_server_seq = ?1, updated_at = ?2 WHERE scope = ?3",
                params![watermark, to_millis(Utc::now()), scope.as_str()],
            )?;
            refresh_status(&tx, scope)?;
            if stale {
                tx.execute(
                    "UPDATE sync_state SET status = ?1 WHERE scope = ?2",
                    params![QueueStatus::Uninitialized.as_str(), scope.as_str()],
                )?;
            }
            write_audit(&tx, scope, AuditAction::Deltas, &applied, watermark)?;
        }
        tx.commit()?;

        Ok(applied.len())
    }

    fn enqueue_event(
        &mut self,
        kind: &EventKind,
        dedupe_key: Option<String>,
    ) -> Result<PendingEvent> {
        let scope = kind.scope();
        let dedupe_key = normalize_text_option(dedupe_key);
        let payload = kind.to_payload();
        let payload_text = serde_json::to_string(&payload)?;

        let tx = self.conn.transaction()?;
        let existing: Option<(String, i64, i64)> = match dedupe_key.as_deref() {
            Some(key) => tx
                .query_row(
                    "SELECT id, created_at, retry_count FROM outbox WHERE scope = ? AND dedupe_key = ?",
                    params![scope.as_str(), key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?,
            None => None,
        };

        let pending = if let Some((id, created_at, retry_count)) = existing {
            tx.execute(
                "UPDATE outbox SET event_type = ?1, payload = ?2 WHERE id = ?3",
                params![kind.event_type(), payload_text, id],
            )?;
            PendingEvent {
                id,
                scope,
                event_type: kind.event_type().to_string(),
                payload,
                dedupe_key,
                created_at: from_millis(created_at),
                retry_count,
            }
        } else {
            let pending = PendingEvent {
                id: Uuid::now_v7().to_string(),
                scope,
                event_type: kind.event_type().to_string(),
                payload,
                dedupe_key,
                created_at: from_millis(to_millis(Utc::now())),
                retry_count: 0,
            };
            tx.execute(
                &format!("INSERT INTO outbox ({OUTBOX_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)"),
                params![
                    pending.id,
                    scope.as_str(),
                    pending.event_type,
                    payload_text,
                    pending.dedupe_key,
                    to_millis(pending.created_at),
                ],
            )?;
            pending
        };

        refresh_status(&tx, scope)?;
        tx.commit()?;

        tracing::debug!(%scope, event_type = %pending.event_type, "Queued local event");
        Ok(pending)
    }

    fn consume_events(&mut self, scope: Scope, limit: usize) -> Result<Vec<PendingEvent>> {
        let tx = self.conn.transaction()?;
        let events = select_outbox(&tx, Some(scope), Some(limit))?;
        if events.is_empty() {
            return Ok(events);
        }

        for event in &events {
            tx.execute("DELETE FROM outbox WHERE id = ?", params![event.id])?;
        }
        let ids: Vec<String> = events.iter().map(|event| event.id.clone()).collect();
        let server_seq = watermark(&tx, scope)?;
        write_audit(&tx, scope, AuditAction::Consume, &ids, server_seq)?;
        tx.commit()?;

        Ok(events)
    }

    fn requeue_events(&mut self, scope: Scope, events: &[PendingEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        for event in events {
            // A newer local event with the same dedupe key supersedes this one
            tx.execute(
                &format!(
                    "INSERT INTO outbox ({OUTBOX_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT DO NOTHING"
                ),
                params![
                    event.id,
                    scope.as_str(),
                    event.event_type,
                    serde_json::to_string(&event.payload)?,
                    event.dedupe_key,
                    to_millis(event.created_at),
                    event.retry_count + 1,
                ],
            )?;
        }
        refresh_status(&tx, scope)?;
        let ids: Vec<String> = events.iter().map(|event| event.id.clone()).collect();
        let server_seq = watermark(&tx, scope)?;
        write_audit(&tx, scope, AuditAction::Requeue, &ids, server_seq)?;
        tx.commit()?;

        tracing::debug!(%scope, events = events.len(), "Requeued events after failed push");
        Ok(())
    }

    fn mark_acknowledged(&mut self, scope: Scope, event_ids: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        refresh_status(&tx, scope)?;
        let server_seq = watermark(&tx, scope)?;
        write_audit(&tx, scope, AuditAction::Acknowledge, event_ids, server_seq)?;
        tx.commit()?;
        Ok(())
    }

    fn reject_events(&mut self, scope: Scope, rejected: &[(PendingEvent, String)]) -> Result<()> {
        if rejected.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        let now = to_millis(Utc::now());
        for (event, reason) in rejected {
            tx.execute(
                &format!(
                    "INSERT INTO rejected_events ({OUTBOX_COLUMNS}, reason, rejected_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                        payload = excluded.payload,
                        reason = excluded.reason,
                        rejected_at = excluded.rejected_at"
                ),
                params![
                    event.id,
                    scope.as_str(),
                    event.event_type,
                    serde_json::to_string(&event.payload)?,
                    event.dedupe_key,
                    to_millis(event.created_at),
                    event.retry_count + 1,
                    reason,
                    now,
                ],
            )?;
        }
        refresh_status(&tx, scope)?;
        let ids: Vec<String> = rejected.iter().map(|(event, _)| event.id.clone()).collect();
        let server_seq = watermark(&tx, scope)?;
        write_audit(&tx, scope, AuditAction::Reject, &ids, server_seq)?;
        tx.commit()?;

        tracing::warn!(%scope, events = rejected.len(), "Parked events refused by the server");
        Ok(())
    }

    fn rejected_events(&self, scope: Option<Scope>) -> Result<Vec<RejectedEvent>> {
        select_rejected(&self.conn, scope)
    }

    fn restore_rejected(&mut self, event_ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut restored = 0;
        for (scope, events) in rejected_by_scope(&tx, event_ids)? {
            let mut ids = Vec::with_capacity(events.len());
            for RejectedEvent { event, .. } in events {
                let inserted = tx.execute(
                    &format!(
                        "INSERT INTO outbox ({OUTBOX_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                         ON CONFLICT DO NOTHING"
                    ),
                    params![
                        event.id,
                        scope.as_str(),
                        event.event_type,
                        serde_json::to_string(&event.payload)?,
                        event.dedupe_key,
                        to_millis(event.created_at),
                    ],
                )?;
                if inserted == 0 {
                    tracing::debug!(%scope, id = %event.id, "Dedupe key already pending; left parked");
                    continue;
                }
                tx.execute("DELETE FROM rejected_events WHERE id = ?", params![event.id])?;
                ids.push(event.id);
            }
            if ids.is_empty() {
                continue;
            }
            refresh_status(&tx, scope)?;
            let server_seq = watermark(&tx, scope)?;
            write_audit(&tx, scope, AuditAction::Restore, &ids, server_seq)?;
            restored += ids.len();
        }
        tx.commit()?;
        Ok(restored)
    }

    fn discard_rejected(&mut self, event_ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut discarded = 0;
        for (scope, events) in rejected_by_scope(&tx, event_ids)? {
            let ids: Vec<String> = events.into_iter().map(|rejected| rejected.event.id).collect();
            for id in &ids {
                tx.execute("DELETE FROM rejected_events WHERE id = ?", params![id])?;
            }
            let server_seq = watermark(&tx, scope)?;
            write_audit(&tx, scope, AuditAction::Discard, &ids, server_seq)?;
            discarded += ids.len();
        }
        tx.commit()?;
        Ok(discarded)
    }

    fn sync_state(&self, scope: Scope) -> Result<SyncState> {
        Ok(load_state(&self.conn, scope)?.unwrap_or_else(|| SyncState::uninitialized(scope)))
    }

    fn records(&self, scope: Scope) -> Result<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM cached_records WHERE scope = ? ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![scope.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.iter().map(|data| decode_record(scope, data)).collect()
    }

    fn pending_events(&self, scope: Option<Scope>) -> Result<Vec<PendingEvent>> {
        select_outbox(&self.conn, scope, None)
    }

    fn audit_trail(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, scope, action, event_ids, server_seq, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let scope: String = row.get(1)?;
                let action: String = row.get(2)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    parse_text_column::<Scope>(1, &scope)?,
                    parse_text_column::<AuditAction>(2, &action)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, scope, action, event_ids, server_seq, created_at)| -> Result<AuditEntry> {
                Ok(AuditEntry {
                    id,
                    scope,
                    action,
                    event_ids: serde_json::from_str(&event_ids)?,
                    server_seq,
                    created_at: from_millis(created_at),
                })
            })
            .collect()
    }

    fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, error)| Error::from(error))
    }
}
