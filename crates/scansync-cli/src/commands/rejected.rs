use std::path::Path;

use chrono::{DateTime, Utc};
use scansync_core::queue::{OfflineQueue, RejectedEvent};
use scansync_core::Scope;

use crate::cli::RejectedCommands;
use crate::commands::common::{format_relative_time, open_queue};
use crate::error::CliError;

pub fn run_rejected(command: Option<RejectedCommands>, queue_path: &Path) -> Result<(), CliError> {
    match command.unwrap_or(RejectedCommands::List {
        scope: None,
        json: false,
    }) {
        RejectedCommands::List { scope, json } => list_rejected(scope, json, queue_path),
        RejectedCommands::Retry { ids } => {
            let mut queue = open_queue(queue_path)?;
            let restored = queue.restore_rejected(&ids)?;
            queue.close()?;
            println!("Moved {restored} of {} event(s) back to the outbox.", ids.len());
            if restored < ids.len() {
                println!("Unknown ids, or a newer event with the same dedupe key is pending.");
            }
            Ok(())
        }
        RejectedCommands::Discard { ids } => {
            let mut queue = open_queue(queue_path)?;
            let discarded = queue.discard_rejected(&ids)?;
            queue.close()?;
            println!("Discarded {discarded} event(s).");
            Ok(())
        }
    }
}

fn list_rejected(scope: Option<Scope>, as_json: bool, queue_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(queue_path)?;
    let rejected = queue.rejected_events(scope)?;
    queue.close()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&rejected)?);
        return Ok(());
    }

    if rejected.is_empty() {
        println!("No refused events.");
        return Ok(());
    }

    for line in format_rejected_lines(&rejected, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_rejected_lines(rejected: &[RejectedEvent], now: DateTime<Utc>) -> Vec<String> {
    rejected
        .iter()
        .map(|rejected| {
            format!(
                "{} [{}] {} {}",
                rejected.event.id,
                rejected.event.event_type,
                format_relative_time(rejected.rejected_at, now),
                rejected.reason
            )
        })
        .collect()
}
