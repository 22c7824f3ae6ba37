//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
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

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Migration to version 1: records, event log, sequences, ledger
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS inventory_items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sku TEXT,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            location TEXT,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            event_id TEXT NOT NULL,
            status TEXT NOT NULL,
            holder_name TEXT,
            checked_in_at INTEGER,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tickets_event ON tickets(event_id);

        -- One counter row per scope; advanced in the same transaction that inserts the event
        CREATE TABLE IF NOT EXISTS sync_sequences (
            scope TEXT PRIMARY KEY,
            last_seq INTEGER NOT NULL DEFAULT 0
        );
        INSERT OR IGNORE INTO sync_sequences (scope, last_seq) VALUES ('inventory', 0);
        INSERT OR IGNORE INTO sync_sequences (scope, last_seq) VALUES ('tickets', 0);

        CREATE TABLE IF NOT EXISTS sync_events (
            id TEXT PRIMARY KEY,
            scope TEXT NOT NULL,
            client_id TEXT NOT NULL,
            client_mutation_id TEXT NOT NULL,
            dedupe_key TEXT,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            occurred_at INTEGER NOT NULL,
            server_seq INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (scope, server_seq)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_events_dedupe
            ON sync_events(scope, dedupe_key) WHERE dedupe_key IS NOT NULL;

        CREATE TABLE IF NOT EXISTS sync_mutations (
            client_mutation_id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            event_count INTEGER NOT NULL,
            first_server_seq INTEGER,
            last_server_seq INTEGER,
            acknowledged_seq INTEGER,
            outcome TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: permission grants
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_permissions (
            user_id TEXT NOT NULL,
            permission TEXT NOT NULL,
            granted_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, permission)
        );
        CREATE INDEX IF NOT EXISTS idx_sync_mutations_client ON sync_mutations(client_id);

        INSERT INTO schema_version (version) VALUES (2);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_dedupe_index_is_partial() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let insert = "INSERT INTO sync_events
            (id, scope, client_id, client_mutation_id, dedupe_key, event_type, payload, occurred_at, server_seq, created_at)
            VALUES (?1, 'tickets', 'c', 'm', ?2, 'ticket.checkin', '{}', 0, ?3, 0)
            ON CONFLICT DO NOTHING";

        assert_eq!(
            conn.execute(insert, rusqlite::params!["e1", "ticket:T-1", 1])
                .unwrap(),
            1
        );
        assert_eq!(
            conn.execute(insert, rusqlite::params!["e2", "ticket:T-1", 2])
                .unwrap(),
            0
        );
        // Events without a dedupe key never collide on it
        assert_eq!(
            conn.execute(insert, rusqlite::params!["e3", None::<String>, 2])
                .unwrap(),
            1
        );
        assert_eq!(
            conn.execute(insert, rusqlite::params!["e4", None::<String>, 3])
                .unwrap(),
            1
        );
    }
}
