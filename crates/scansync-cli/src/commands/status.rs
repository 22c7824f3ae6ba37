use std::path::Path;

use chrono::Utc;
use scansync_core::queue::{OfflineQueue, SqliteOfflineQueue, SyncState};
use scansync_core::Scope;
use serde::Serialize;

use crate::commands::common::{format_status_lines, open_queue, scopes_or_all};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeStatus {
    #[serde(flatten)]
    pub state: SyncState,
    pub outbox: usize,
    pub rejected: usize,
}

pub fn collect_status(
    queue: &SqliteOfflineQueue,
    scope: Option<Scope>,
) -> Result<Vec<ScopeStatus>, CliError> {
    scopes_or_all(scope)
        .into_iter()
        .map(|scope| -> Result<ScopeStatus, CliError> {
            Ok(ScopeStatus {
                state: queue.sync_state(scope)?,
                outbox: queue.outbox_len(scope)?,
                rejected: queue.rejected_events(Some(scope))?.len(),
            })
        })
        .collect()
}

pub fn run_status(scope: Option<Scope>, as_json: bool, queue_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(queue_path)?;
    let statuses = collect_status(&queue, scope)?;
    queue.close()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    let rows = statuses
        .into_iter()
        .map(|status| (status.state, status.outbox, status.rejected))
        .collect::<Vec<_>>();
    for line in format_status_lines(&rows, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}
