//! Mutation ledger: one row per client push batch

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::SyncMutation;
use crate::util::{from_millis, to_millis};

/// Trait for the push idempotency ledger
pub trait MutationLedger {
    fn get(&self, client_mutation_id: &str) -> Result<Option<SyncMutation>>;

    /// Insert or update the row keyed by `client_mutation_id`.
    ///
    /// `created_at` of an existing row is preserved.
    fn upsert(&self, mutation: &SyncMutation) -> Result<()>;
}

pub struct SqliteMutationLedger<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMutationLedger<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncMutation> {
        let scope: String = row.get(2)?;
        let outcome: Option<String> = row.get(7)?;
        let outcome = outcome
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?;

        Ok(SyncMutation {
            client_mutation_id: row.get(0)?,
            client_id: row.get(1)?,
            scope: super::parse_text_column(2, &scope)?,
            event_count: row.get(3)?,
            first_server_seq: row.get(4)?,
            last_server_seq: row.get(5)?,
            acknowledged_seq: row.get(6)?,
            outcome,
            created_at: from_millis(row.get(8)?),
            updated_at: from_millis(row.get(9)?),
        })
    }
}

impl MutationLedger for SqliteMutationLedger<'_> {
    fn get(&self, client_mutation_id: &str) -> Result<Option<SyncMutation>> {
        let mutation = self
            .conn
            .query_row(
                "SELECT client_mutation_id, client_id, scope, event_count, first_server_seq,
                        last_server_seq, acknowledged_seq, outcome, created_at, updated_at
                 FROM sync_mutations WHERE client_mutation_id = ?",
                params![client_mutation_id],
                Self::parse_row,
            )
            .optional()?;
        Ok(mutation)
    }

    fn upsert(&self, mutation: &SyncMutation) -> Result<()> {
        let outcome = mutation
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO sync_mutations
                (client_mutation_id, client_id, scope, event_count, first_server_seq,
                 last_server_seq, acknowledged_seq, outcome, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(client_mutation_id) DO UPDATE SET
                event_count = excluded.event_count,
                first_server_seq = excluded.first_server_seq,
                last_server_seq = excluded.last_server_seq,
                acknowledged_seq = excluded.acknowledged_seq,
                outcome = excluded.outcome,
                updated_at = excluded.updated_at",
            params![
                mutation.client_mutation_id,
                mutation.client_id,
                mutation.scope.as_str(),
                mutation.event_count,
                mutation.first_server_seq,
                mutation.last_server_seq,
                mutation.acknowledged_seq,
                outcome,
                to_millis(mutation.created_at),
                to_millis(mutation.updated_at),
            ],
        )?;
        Ok(())
    }
}
