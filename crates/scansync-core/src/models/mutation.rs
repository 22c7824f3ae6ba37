//! Mutation ledger rows and push outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Scope, SyncEvent};

/// Why a submitted event was not persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Another persisted event in the scope already carries the dedupe key
    DuplicateDedupeKey,
    /// The event id itself was persisted by an earlier batch
    DuplicateEventId,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateDedupeKey => "duplicate-dedupe-key",
            Self::DuplicateEventId => "duplicate-event-id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEvent {
    pub id: String,
    pub dedupe_key: Option<String>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Applied,
}

impl PushStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
        }
    }
}

/// Result of one push batch, stored in the ledger for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub status: PushStatus,
    /// Accepted events with their assigned serverSeq
    pub events: Vec<SyncEvent>,
    pub skipped: Vec<SkippedEvent>,
}

impl PushOutcome {
    pub const fn applied(events: Vec<SyncEvent>, skipped: Vec<SkippedEvent>) -> Self {
        Self {
            status: PushStatus::Applied,
            events,
            skipped,
        }
    }

    pub fn first_server_seq(&self) -> Option<i64> {
        self.events.iter().map(|event| event.server_seq).min()
    }

    pub fn last_server_seq(&self) -> Option<i64> {
        self.events.iter().map(|event| event.server_seq).max()
    }
}

/// Ledger row keyed by `client_mutation_id`
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMutation {
    pub client_mutation_id: String,
    pub client_id: String,
    pub scope: Scope,
    pub event_count: i64,
    pub first_server_seq: Option<i64>,
    pub last_server_seq: Option<i64>,
    /// Log head the batch was acknowledged at
    pub acknowledged_seq: Option<i64>,
    pub outcome: Option<PushOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncMutation {
    /// A batch is fully acknowledged once its outcome is stored and the
    /// acknowledged sequence covers every event it persisted.
    pub fn is_acknowledged(&self) -> bool {
        let Some(acknowledged) = self.acknowledged_seq else {
            return false;
        };
        self.outcome.is_some() && self.last_server_seq.map_or(true, |last| acknowledged >= last)
    }
}
