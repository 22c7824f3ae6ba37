use std::path::Path;

use chrono::Utc;
use scansync_core::queue::OfflineQueue;

use crate::commands::common::{format_audit_lines, open_queue};
use crate::error::CliError;

pub fn run_audit(limit: usize, as_json: bool, queue_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(queue_path)?;
    let entries = queue.audit_trail(limit)?;
    queue.close()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No queue activity recorded.");
        return Ok(());
    }

    for line in format_audit_lines(&entries, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}
