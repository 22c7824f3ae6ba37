use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use scansync_core::models::EventKind;
use scansync_core::queue::{AuditEntry, PendingEvent, SqliteOfflineQueue, SyncState};
use scansync_core::util::normalize_text_option;
use scansync_core::{Record, Scope, ValidationIssue};
use serde_json::Value;

use crate::error::CliError;

/// Connection details for `sync`, taken from flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub api_url: Option<String>,
    pub session_token: Option<String>,
    pub client_id: Option<String>,
}

pub fn resolve_queue_path(cli_queue_path: Option<PathBuf>) -> PathBuf {
    cli_queue_path.unwrap_or_else(default_queue_path)
}

pub fn default_queue_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scansync")
        .join("queue.db")
}

pub fn open_queue(queue_path: &Path) -> Result<SqliteOfflineQueue, CliError> {
    Ok(SqliteOfflineQueue::open(queue_path)?)
}

pub fn scopes_or_all(scope: Option<Scope>) -> Vec<Scope> {
    scope.map_or_else(|| Scope::ALL.to_vec(), |scope| vec![scope])
}

/// Validate a payload with the same rules the server applies.
pub fn build_event(event_type: &'static str, payload: &Value) -> Result<EventKind, CliError> {
    EventKind::parse(event_type, payload).map_err(|issues| CliError::InvalidEvent {
        event_type,
        details: describe_issues(&issues),
    })
}

pub fn describe_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| {
            if issue.path.is_empty() {
                issue.message.clone()
            } else {
                format!("{} {}", issue.path, issue.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Reuse the stored client id, or the explicit one, or mint and store a new one.
pub fn resolve_client_id(explicit: Option<String>, queue_path: &Path) -> Result<String, CliError> {
    if let Some(client_id) = normalize_text_option(explicit) {
        return Ok(client_id);
    }

    let id_path = queue_path.with_file_name("client-id");
    if let Ok(stored) = std::fs::read_to_string(&id_path) {
        if let Some(client_id) = normalize_text_option(Some(stored)) {
            return Ok(client_id);
        }
    }

    let client_id = format!("scanner-{}", uuid::Uuid::now_v7());
    if let Some(parent) = id_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&id_path, &client_id)?;
    tracing::info!(path = %id_path.display(), "Generated client id");
    Ok(client_id)
}

pub fn format_status_lines(
    states: &[(SyncState, usize, usize)],
    now: DateTime<Utc>,
) -> Vec<String> {
    states
        .iter()
        .map(|(state, outbox, rejected)| {
            let updated = state
                .updated_at
                .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now));
            format!(
                "{:<10} {:<14} seq {:<6} outbox {:<4} rejected {:<4} updated {updated}",
                state.scope.as_str(),
                state.status.as_str(),
                state.last_server_seq,
                outbox,
                rejected
            )
        })
        .collect()
}

pub fn format_pending_lines(events: &[PendingEvent], now: DateTime<Utc>) -> Vec<String> {
    events
        .iter()
        .map(|event| {
            let mut line = format!(
                "{} [{}] {}",
                event.id,
                event.event_type,
                format_relative_time(event.created_at, now)
            );
            if let Some(key) = event.dedupe_key.as_deref() {
                line.push_str(&format!(" dedupe={key}"));
            }
            if event.retry_count > 0 {
                line.push_str(&format!(" retries={}", event.retry_count));
            }
            line
        })
        .collect()
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| match record {
            Record::Inventory(item) => {
                let mut line = format!("{} {} qty={}", item.id, item.name, item.quantity);
                if let Some(location) = item.location.as_deref() {
                    line.push_str(&format!(" @ {location}"));
                }
                line
            }
            Record::Ticket(ticket) => {
                format!("{} {} {}", ticket.id, ticket.code, ticket.status.as_str())
            }
        })
        .collect()
}

pub fn format_audit_lines(entries: &[AuditEntry], now: DateTime<Utc>) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{:<8} {:<10} {:<12} seq {:<6} events {}",
                format_relative_time(entry.created_at, now),
                entry.scope.as_str(),
                entry.action.as_str(),
                entry.server_seq,
                entry.event_ids.len()
            )
        })
        .collect()
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
