//! Durable client-side offline queue
//!
//! Holds the cached baseline records, the pending-event outbox, the
//! per-scope watermark, and an audit trail of queue operations.

mod migrations;
mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::models::{CandidateEvent, EventKind, Record, Scope, SyncEvent};

pub use sqlite::SqliteOfflineQueue;

/// Lifecycle of a scope in the local queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// No baseline applied yet
    Uninitialized,
    /// Cache matches the server up to the watermark and nothing is pending
    Synced,
    /// Local events are waiting to be pushed
    Dirty,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Synced => "synced",
            Self::Dirty => "dirty",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(Self::Uninitialized),
            "synced" => Ok(Self::Synced),
            "dirty" => Ok(Self::Dirty),
            other => Err(format!("unknown queue status `{other}`")),
        }
    }
}

/// Per-scope watermark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub scope: Scope,
    pub last_server_seq: i64,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub status: QueueStatus,
}

impl SyncState {
    pub const fn uninitialized(scope: Scope) -> Self {
        Self {
            scope,
            last_server_seq: 0,
            updated_at: None,
            last_snapshot_at: None,
            status: QueueStatus::Uninitialized,
        }
    }
}

/// An outbox entry awaiting push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    pub id: String,
    pub scope: Scope,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub dedupe_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: i64,
}

impl PendingEvent {
    /// Wire form for a push batch; the local creation time is the occurrence time.
    pub fn to_candidate(&self) -> CandidateEvent {
        CandidateEvent {
            id: self.id.clone(),
            dedupe_key: self.dedupe_key.clone(),
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            occurred_at: self.created_at,
        }
    }
}

/// An outbox entry the server refused, parked until it is retried or discarded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedEvent {
    #[serde(flatten)]
    pub event: PendingEvent,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Snapshot,
    Deltas,
    Consume,
    Requeue,
    Acknowledge,
    Reject,
    Restore,
    Discard,
}

impl AuditAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Deltas => "deltas",
            Self::Consume => "consume",
            Self::Requeue => "requeue",
            Self::Acknowledge => "acknowledge",
            Self::Reject => "reject",
            Self::Restore => "restore",
            Self::Discard => "discard",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(Self::Snapshot),
            "deltas" => Ok(Self::Deltas),
            "consume" => Ok(Self::Consume),
            "requeue" => Ok(Self::Requeue),
            "acknowledge" => Ok(Self::Acknowledge),
            "reject" => Ok(Self::Reject),
            "restore" => Ok(Self::Restore),
            "discard" => Ok(Self::Discard),
            other => Err(format!("unknown audit action `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub scope: Scope,
    pub action: AuditAction,
    /// Event ids touched by the operation (empty for snapshots)
    pub event_ids: Vec<String>,
    /// Watermark after the operation
    pub server_seq: i64,
    pub created_at: DateTime<Utc>,
}

/// Local store injected into the sync loop.
///
/// Every operation is one local transaction. The queue never retries on
/// its own; callers re-enqueue after network failures.
pub trait OfflineQueue {
    /// Replace every cached record of `scope` and reset the watermark.
    fn apply_snapshot(&mut self, scope: Scope, records: &[Record], server_seq: i64) -> Result<()>;

    /// Merge pulled events into the cache; returns how many were new.
    ///
    /// Fails on an uninitialized scope or when `events` are not in strictly
    /// ascending `serverSeq` order. Events at or below the watermark are
    /// skipped. An event the cache cannot absorb marks the scope
    /// uninitialized so the next cycle reloads the baseline.
    fn apply_deltas(&mut self, scope: Scope, events: &[SyncEvent]) -> Result<usize>;

    /// Queue a local event, merging with a pending event that shares its
    /// dedupe key (payload and type are replaced, id and creation time kept).
    fn enqueue_event(&mut self, kind: &EventKind, dedupe_key: Option<String>)
        -> Result<PendingEvent>;

    /// Atomically remove up to `limit` of the oldest pending events.
    fn consume_events(&mut self, scope: Scope, limit: usize) -> Result<Vec<PendingEvent>>;

    /// Put consumed events back after a failed push, bumping their retry count.
    fn requeue_events(&mut self, scope: Scope, events: &[PendingEvent]) -> Result<()>;

    /// Record a successful push of `event_ids`.
    fn mark_acknowledged(&mut self, scope: Scope, event_ids: &[String]) -> Result<()>;

    /// Park consumed events the server refused, each with its reason.
    fn reject_events(&mut self, scope: Scope, rejected: &[(PendingEvent, String)]) -> Result<()>;

    fn rejected_events(&self, scope: Option<Scope>) -> Result<Vec<RejectedEvent>>;

    /// Move parked events back to the outbox with a fresh retry count.
    /// Events whose dedupe key is already pending stay parked. Returns how
    /// many moved.
    fn restore_rejected(&mut self, event_ids: &[String]) -> Result<usize>;

    /// Drop parked events for good; returns how many were removed.
    fn discard_rejected(&mut self, event_ids: &[String]) -> Result<usize>;

    fn sync_state(&self, scope: Scope) -> Result<SyncState>;

    fn records(&self, scope: Scope) -> Result<Vec<Record>>;

    fn pending_events(&self, scope: Option<Scope>) -> Result<Vec<PendingEvent>>;

    /// Most recent entries first
    fn audit_trail(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Flush and release the underlying store.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}
