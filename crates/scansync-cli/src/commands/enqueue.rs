use std::path::Path;

use chrono::{SubsecRound, Utc};
use scansync_core::models::{INVENTORY_ADJUST, TICKET_CHECKIN};
use scansync_core::queue::{OfflineQueue, PendingEvent};
use serde_json::json;

use crate::commands::common::{build_event, open_queue};
use crate::error::CliError;

pub fn enqueue_checkin<Q: OfflineQueue>(
    queue: &mut Q,
    ticket_id: &str,
    code: &str,
    event_id: &str,
    source: &str,
) -> Result<PendingEvent, CliError> {
    let payload = json!({
        "ticketId": ticket_id.trim(),
        "code": code.trim(),
        "eventId": event_id.trim(),
        "status": "checked_in",
        "attemptedAt": Utc::now().trunc_subsecs(3),
        "source": source.trim(),
    });
    let kind = build_event(TICKET_CHECKIN, &payload)?;
    Ok(queue.enqueue_event(&kind, kind.default_dedupe_key())?)
}

pub fn enqueue_adjust<Q: OfflineQueue>(
    queue: &mut Q,
    item_id: &str,
    delta: i64,
    reason: Option<&str>,
) -> Result<PendingEvent, CliError> {
    let mut payload = json!({
        "itemId": item_id.trim(),
        "delta": delta,
    });
    if let Some(reason) = reason.map(str::trim).filter(|reason| !reason.is_empty()) {
        payload["reason"] = json!(reason);
    }
    let kind = build_event(INVENTORY_ADJUST, &payload)?;
    Ok(queue.enqueue_event(&kind, None)?)
}

pub fn run_checkin(
    ticket_id: &str,
    code: &str,
    event_id: &str,
    source: &str,
    queue_path: &Path,
) -> Result<(), CliError> {
    let mut queue = open_queue(queue_path)?;
    let pending = enqueue_checkin(&mut queue, ticket_id, code, event_id, source)?;
    queue.close()?;

    println!("Queued check-in {} for ticket {}", pending.id, ticket_id.trim());
    Ok(())
}

pub fn run_adjust(
    item_id: &str,
    delta: i64,
    reason: Option<&str>,
    queue_path: &Path,
) -> Result<(), CliError> {
    let mut queue = open_queue(queue_path)?;
    let pending = enqueue_adjust(&mut queue, item_id, delta, reason)?;
    queue.close()?;

    println!(
        "Queued adjustment {} ({delta:+}) for item {}",
        pending.id,
        item_id.trim()
    );
    Ok(())
}
