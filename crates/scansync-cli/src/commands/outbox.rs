use std::path::Path;

use chrono::Utc;
use scansync_core::queue::OfflineQueue;
use scansync_core::Scope;

use crate::commands::common::{format_pending_lines, open_queue};
use crate::error::CliError;

pub fn run_outbox(scope: Option<Scope>, as_json: bool, queue_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(queue_path)?;
    let pending = queue.pending_events(scope)?;
    queue.close()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }

    for line in format_pending_lines(&pending, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}
