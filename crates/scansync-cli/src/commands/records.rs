use std::path::Path;

use scansync_core::queue::OfflineQueue;
use scansync_core::Scope;

use crate::commands::common::{format_record_lines, open_queue};
use crate::error::CliError;

pub fn run_records(scope: Scope, as_json: bool, queue_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(queue_path)?;
    let records = queue.records(scope)?;
    queue.close()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No cached {scope} records. Run `scansync sync` first.");
        return Ok(());
    }

    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
