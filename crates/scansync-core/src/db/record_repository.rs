//! Record store for the synchronized domain entities

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{InventoryItem, Record, RecordChange, Scope, Ticket};
use crate::util::{from_millis, to_millis};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for record storage operations
pub trait RecordRepository {
    /// Get a record by id
    fn get(&self, scope: Scope, id: &str) -> Result<Option<Record>>;

    /// Insert or replace a record
    fn upsert(&self, record: &Record) -> Result<()>;

    /// Delete a record; returns whether it existed
    fn delete(&self, scope: Scope, id: &str) -> Result<bool>;

    /// Records ordered by id, strictly after `cursor`
    fn list_page(&self, scope: Scope, cursor: Option<&str>, limit: usize) -> Result<Vec<Record>>;

    /// Persist the outcome of an event's effect
    fn apply(&self, change: &RecordChange) -> Result<()> {
        match change {
            RecordChange::Upsert(record) => self.upsert(record),
            RecordChange::Delete { scope, id } => self.delete(*scope, id).map(|_| ()),
        }
    }
}

/// `SQLite` implementation of `RecordRepository`
///
/// Takes a plain connection so it works inside a `Transaction` as well.
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        Ok(Record::Inventory(InventoryItem {
            id: row.get(0)?,
            name: row.get(1)?,
            sku: row.get(2)?,
            quantity: row.get(3)?,
            location: row.get(4)?,
            updated_at: from_millis(row.get(5)?),
        }))
    }

    fn parse_ticket(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let status: String = row.get(3)?;
        Ok(Record::Ticket(Ticket {
            id: row.get(0)?,
            code: row.get(1)?,
            event_id: row.get(2)?,
            status: super::parse_text_column(3, &status)?,
            holder_name: row.get(4)?,
            checked_in_at: row.get::<_, Option<i64>>(5)?.map(from_millis),
            updated_at: from_millis(row.get(6)?),
        }))
    }
}

const ITEM_COLUMNS: &str = "id, name, sku, quantity, location, updated_at";
const TICKET_COLUMNS: &str = "id, code, event_id, status, holder_name, checked_in_at, updated_at";

impl RecordRepository for SqliteRecordRepository<'_> {
    fn get(&self, scope: Scope, id: &str) -> Result<Option<Record>> {
        let record = match scope {
            Scope::Inventory => self
                .conn
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = ?"),
                    params![id],
                    Self::parse_item,
                )
                .optional()?,
            Scope::Tickets => self
                .conn
                .query_row(
                    &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?"),
                    params![id],
                    Self::parse_ticket,
                )
                .optional()?,
        };
        Ok(record)
    }

    fn upsert(&self, record: &Record) -> Result<()> {
        match record {
            Record::Inventory(item) => {
                self.conn.execute(
                    "INSERT INTO inventory_items (id, name, sku, quantity, location, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        sku = excluded.sku,
                        quantity = excluded.quantity,
                        location = excluded.location,
                        updated_at = excluded.updated_at",
                    params![
                        item.id,
                        item.name,
                        item.sku,
                        item.quantity,
                        item.location,
                        to_millis(item.updated_at)
                    ],
                )?;
            }
            Record::Ticket(ticket) => {
                self.conn.execute(
                    "INSERT INTO tickets (id, code, event_id, status, holder_name, checked_in_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        code = excluded.code,
                        event_id = excluded.event_id,
                        status = excluded.status,
                        holder_name = excluded.holder_name,
                        checked_in_at = excluded.checked_in_at,
                        updated_at = excluded.updated_at",
                    params![
                        ticket.id,
                        ticket.code,
                        ticket.event_id,
                        ticket.status.as_str(),
                        ticket.holder_name,
                        ticket.checked_in_at.map(to_millis),
                        to_millis(ticket.updated_at)
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn delete(&self, scope: Scope, id: &str) -> Result<bool> {
        let table = match scope {
            Scope::Inventory => "inventory_items",
            Scope::Tickets => "tickets",
        };
        let rows = self
            .conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?"), params![id])?;
        Ok(rows > 0)
    }

    fn list_page(&self, scope: Scope, cursor: Option<&str>, limit: usize) -> Result<Vec<Record>> {
        let (columns, table) = match scope {
            Scope::Inventory => (ITEM_COLUMNS, "inventory_items"),
            Scope::Tickets => (TICKET_COLUMNS, "tickets"),
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns} FROM {table}
             WHERE (?1 IS NULL OR id > ?1)
             ORDER BY id ASC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit as i64], |row| match scope {
            Scope::Inventory => Self::parse_item(row),
            Scope::Tickets => Self::parse_ticket(row),
        })?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
