//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// Server-side store: records, event log, mutation ledger, and permission grants
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    fn configure(&self) -> Result<()> {
        // journal_mode reports the resulting mode as a row
        self.conn
            .query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
            .ok(); // in-memory databases stay in `memory` mode
        self.conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<()> {
        migrations::run(&mut self.conn)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access for opening write transactions
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
