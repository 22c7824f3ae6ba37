//! Local queue schema

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

const CURRENT_VERSION: i32 = 2;

pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    Ok(())
}

fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='queue_schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM queue_schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);
    Ok(version)
}

fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue_schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS cached_records (
            scope TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (scope, id)
        );

        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            scope TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            dedupe_key TEXT,
            created_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_outbox_dedupe
            ON outbox(scope, dedupe_key) WHERE dedupe_key IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_outbox_order ON outbox(scope, created_at, id);

        -- A row exists once the scope has a baseline
        CREATE TABLE IF NOT EXISTS sync_state (
            scope TEXT PRIMARY KEY,
            last_server_seq INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_snapshot_at INTEGER,
            status TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scope TEXT NOT NULL,
            action TEXT NOT NULL,
            event_ids TEXT NOT NULL,
            server_seq INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        INSERT INTO queue_schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;

    tracing::debug!("Migrated offline queue to version 1");
    Ok(())
}

fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS rejected_events (
            id TEXT PRIMARY KEY,
            scope TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            dedupe_key TEXT,
            created_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            reason TEXT NOT NULL,
            rejected_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rejected_order ON rejected_events(scope, rejected_at, id);

        INSERT INTO queue_schema_version (version) VALUES (2);",
    )?;
    tx.commit()?;

    tracing::debug!("Migrated offline queue to version {CURRENT_VERSION}");
    Ok(())
}
