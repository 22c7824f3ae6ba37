//! Server-side database layer for scansync

mod connection;
mod event_log;
mod ledger;
mod migrations;
mod permission_repository;
mod record_repository;

use std::str::FromStr;

pub use connection::Database;
pub use event_log::{AppendOutcome, SqliteEventLog};
pub use ledger::{MutationLedger, SqliteMutationLedger};
pub use permission_repository::{PermissionRepository, SqlitePermissionRepository};
pub use record_repository::{RecordRepository, SqliteRecordRepository};

/// Parse an enum stored as TEXT, surfacing bad values as a conversion failure.
pub(crate) fn parse_text_column<T: FromStr<Err = String>>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    raw.parse().map_err(|message: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
    })
}
